use core::mem;

use bytes::BytesMut;
use log::trace;

/// Per-connection buffer with serialized events for a single peer.
///
/// The buffer accumulates all events written since the transport consumed it last time.
/// Consuming via [`Self::send_data`] doesn't clear the buffer immediately: the bytes stay
/// readable until the next write, which clears them first. This way any number of
/// writes between two consumptions (tick updates, immediate destroys) end up in
/// a single message.
///
/// Owned by [`AuthorityRegistry`](super::AuthorityRegistry) and
/// accessed via [`ChannelId`](crate::shared::ids::ChannelId).
#[derive(Debug)]
pub struct OutboundChannel {
    buffer: SendBuffer,

    /// Whether the channel got its first tick.
    ///
    /// The first tick includes every active entity into the update.
    synced: bool,
}

impl OutboundChannel {
    pub(super) fn new() -> Self {
        Self {
            buffer: SendBuffer::Accumulating(BytesMut::new()),
            synced: false,
        }
    }

    /// Returns the buffer for appending events.
    ///
    /// Clears the bytes that were already handed to the transport.
    pub(super) fn writer(&mut self) -> &mut BytesMut {
        if let SendBuffer::Idle(bytes) = &mut self.buffer {
            trace!("clearing {} consumed bytes", bytes.len());
            let mut bytes = mem::take(bytes);
            bytes.clear();
            self.buffer = SendBuffer::Accumulating(bytes);
        }

        let (SendBuffer::Accumulating(bytes) | SendBuffer::Idle(bytes)) = &mut self.buffer;
        bytes
    }

    /// Returns all events accumulated since the previous call.
    ///
    /// The transport must copy the returned bytes before the next write into the channel.
    /// Calling it again without writes in between returns the same bytes.
    pub fn send_data(&mut self) -> &[u8] {
        if let SendBuffer::Accumulating(bytes) = &mut self.buffer {
            self.buffer = SendBuffer::Idle(mem::take(bytes));
        }

        let (SendBuffer::Accumulating(bytes) | SendBuffer::Idle(bytes)) = &self.buffer;
        bytes
    }

    /// Returns the length of the data that [`Self::send_data`] returns.
    pub fn send_len(&self) -> usize {
        let (SendBuffer::Accumulating(bytes) | SendBuffer::Idle(bytes)) = &self.buffer;
        bytes.len()
    }

    /// Returns `true` if the buffer was consumed and will be cleared on the next write.
    pub fn is_pending_clear(&self) -> bool {
        matches!(self.buffer, SendBuffer::Idle(_))
    }

    pub(super) fn is_synced(&self) -> bool {
        self.synced
    }

    pub(super) fn mark_synced(&mut self) {
        self.synced = true;
    }
}

/// Storage for [`OutboundChannel`] with an explicit consumption state.
#[derive(Debug)]
enum SendBuffer {
    /// Events are being appended since the last consumption.
    Accumulating(BytesMut),
    /// Contains bytes that were already handed to the transport.
    Idle(BytesMut),
}
