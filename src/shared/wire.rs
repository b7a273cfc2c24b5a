//! Low-level primitives of the wire format.
//!
//! All integers are little-endian. Byte arrays are prefixed with their length
//! using the narrowest integer that fits the maximum length declared for the field,
//! see [`LenPrefix`].

use alloc::vec::Vec;

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};
use thiserror::Error;

use super::event::EventKind;

/// Prefix used for entity init payloads.
pub const INIT_PAYLOAD_PREFIX: LenPrefix = LenPrefix::for_max_len(u32::MAX);

/// Prefix used for each sub-message inside a message blob.
///
/// Posted messages never exceed `u16::MAX` bytes.
pub const SUB_MESSAGE_PREFIX: LenPrefix = LenPrefix::for_max_len(u16::MAX as u32);

/// Error returned when a received message can't be decoded.
///
/// Events decoded before the error stay applied, the rest of the message is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The message ended in the middle of an event.
    #[error("expected {requested} more bytes, but only {available} remain")]
    UnexpectedEnd { requested: usize, available: usize },

    /// The event tag doesn't match any [`EventKind`].
    #[error("unknown event tag {0}")]
    UnknownEvent(u8),

    /// The event is valid, but isn't accepted by the receiving side.
    #[error("event `{0:?}` isn't accepted by this side of the connection")]
    UnexpectedEvent(EventKind),

    /// A connect event carries an epoch of zero.
    #[error("connect event carries a zero epoch")]
    ZeroEpoch,
}

impl From<TryGetError> for DecodeError {
    fn from(value: TryGetError) -> Self {
        Self::UnexpectedEnd {
            requested: value.requested,
            available: value.available,
        }
    }
}

/// Width of the length written in front of a byte array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LenPrefix {
    U8,
    U16,
    U32,
}

impl LenPrefix {
    /// Picks the smallest prefix able to encode `max_len`.
    pub const fn for_max_len(max_len: u32) -> Self {
        if max_len <= u8::MAX as u32 {
            Self::U8
        } else if max_len <= u16::MAX as u32 {
            Self::U16
        } else {
            Self::U32
        }
    }

    /// Returns the size of the prefix in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Returns the largest length that the prefix can encode.
    pub const fn max_len(self) -> usize {
        match self {
            Self::U8 => u8::MAX as usize,
            Self::U16 => u16::MAX as usize,
            Self::U32 => u32::MAX as usize,
        }
    }

    /// Writes `data` prefixed with its length.
    ///
    /// # Panics
    ///
    /// Panics if the data is longer than [`Self::max_len`].
    pub fn write(self, data: &[u8], buf: &mut impl BufMut) {
        let len = data.len();
        assert!(
            len <= self.max_len(),
            "data of {len} bytes should fit into `{self:?}` prefix"
        );
        match self {
            Self::U8 => buf.put_u8(len as u8),
            Self::U16 => buf.put_u16_le(len as u16),
            Self::U32 => buf.put_u32_le(len as u32),
        }
        buf.put_slice(data);
    }

    /// Reads a length-prefixed byte array without copying.
    pub fn read(self, buf: &mut Bytes) -> Result<Bytes, DecodeError> {
        let len = match self {
            Self::U8 => buf.try_get_u8()? as usize,
            Self::U16 => buf.try_get_u16_le()? as usize,
            Self::U32 => buf.try_get_u32_le()? as usize,
        };
        read_bytes(buf, len)
    }
}

/// Splits `len` bytes from the front of `buf`.
pub(crate) fn read_bytes(buf: &mut Bytes, len: usize) -> Result<Bytes, DecodeError> {
    if buf.remaining() < len {
        return Err(DecodeError::UnexpectedEnd {
            requested: len,
            available: buf.remaining(),
        });
    }

    Ok(buf.split_to(len))
}

/// Appends a single sub-message to a message blob.
pub(crate) fn frame_message(message: &[u8], blob: &mut BytesMut) {
    SUB_MESSAGE_PREFIX.write(message, blob);
}

/// Splits a message blob into sub-messages.
///
/// Fails without returning anything if the blob is truncated.
pub(crate) fn split_messages(mut blob: Bytes) -> Result<Vec<Bytes>, DecodeError> {
    let mut messages = Vec::new();
    while blob.has_remaining() {
        messages.push(SUB_MESSAGE_PREFIX.read(&mut blob)?);
    }

    Ok(messages)
}
