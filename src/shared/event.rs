use alloc::vec::Vec;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{
    ids::{Epoch, WireId},
    wire::{self, DecodeError, INIT_PAYLOAD_PREFIX, LenPrefix},
};

/// Tag written before every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    /// Epoch and full snapshot of all active entities.
    ///
    /// Sent only once per connection.
    Connect = 0,
    /// A single entity that became active since the last tick.
    Create = 1,
    /// A single destroyed entity.
    Destroy = 2,
    /// Sync payloads of entities that changed since the last tick.
    Update = 3,
    /// Messages posted on entities since the last tick.
    Messages = 4,
}

impl TryFrom<u8> for EventKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Connect),
            1 => Ok(Self::Create),
            2 => Ok(Self::Destroy),
            3 => Ok(Self::Update),
            4 => Ok(Self::Messages),
            _ => Err(DecodeError::UnknownEvent(value)),
        }
    }
}

/// A fully decoded event.
///
/// The registry writes events directly into channel buffers using the `write_*` functions,
/// this type is used for decoding and for building events by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationEvent {
    Connect {
        epoch: Epoch,
        /// Wire IDs with init payloads.
        snapshot: Vec<(WireId, Bytes)>,
    },
    Create {
        wire_id: WireId,
        init_payload: Bytes,
    },
    Destroy {
        wire_id: WireId,
    },
    /// Wire IDs with their new sync payloads.
    Update(Vec<(WireId, Bytes)>),
    /// Wire IDs with their messages in posting order.
    Messages(Vec<(WireId, Vec<Bytes>)>),
}

impl ReplicationEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connect { .. } => EventKind::Connect,
            Self::Create { .. } => EventKind::Create,
            Self::Destroy { .. } => EventKind::Destroy,
            Self::Update(_) => EventKind::Update,
            Self::Messages(_) => EventKind::Messages,
        }
    }

    /// Decodes a single event from the front of `buf`.
    ///
    /// The event is decoded completely before returning, so on error nothing
    /// from it should be applied. `buf` is left in an unspecified position.
    pub fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let kind = EventKind::try_from(buf.try_get_u8()?)?;
        let event = match kind {
            EventKind::Connect => {
                let epoch = Epoch::new(buf.try_get_u32_le()?).ok_or(DecodeError::ZeroEpoch)?;
                let count = buf.try_get_u32_le()?;
                let mut snapshot = Vec::new();
                for _ in 0..count {
                    let wire_id = read_wire_id(buf)?;
                    let init_payload = INIT_PAYLOAD_PREFIX.read(buf)?;
                    snapshot.push((wire_id, init_payload));
                }
                Self::Connect { epoch, snapshot }
            }
            EventKind::Create => {
                let wire_id = read_wire_id(buf)?;
                let init_payload = INIT_PAYLOAD_PREFIX.read(buf)?;
                Self::Create {
                    wire_id,
                    init_payload,
                }
            }
            EventKind::Destroy => Self::Destroy {
                wire_id: read_wire_id(buf)?,
            },
            EventKind::Update => {
                let count = buf.try_get_u32_le()?;
                let mut entries = Vec::new();
                for _ in 0..count {
                    let wire_id = read_wire_id(buf)?;
                    let len = buf.try_get_u32_le()? as usize;
                    entries.push((wire_id, wire::read_bytes(buf, len)?));
                }
                Self::Update(entries)
            }
            EventKind::Messages => {
                let count = buf.try_get_u32_le()?;
                let mut entries = Vec::new();
                for _ in 0..count {
                    let wire_id = read_wire_id(buf)?;
                    let len = buf.try_get_u32_le()? as usize;
                    let blob = wire::read_bytes(buf, len)?;
                    entries.push((wire_id, wire::split_messages(blob)?));
                }
                Self::Messages(entries)
            }
        };

        Ok(event)
    }

    /// Appends the event to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Connect { epoch, snapshot } => write_connect(
                buf,
                *epoch,
                snapshot.iter().map(|(wire_id, init)| (*wire_id, &init[..])),
            ),
            Self::Create {
                wire_id,
                init_payload,
            } => write_create(buf, *wire_id, init_payload),
            Self::Destroy { wire_id } => write_destroy(buf, *wire_id),
            Self::Update(entries) => write_update(
                buf,
                entries
                    .iter()
                    .map(|(wire_id, payload)| (*wire_id, &payload[..])),
            ),
            Self::Messages(entries) => {
                let mut blobs = Vec::with_capacity(entries.len());
                for (wire_id, messages) in entries {
                    let mut blob = BytesMut::new();
                    for message in messages {
                        wire::frame_message(message, &mut blob);
                    }
                    blobs.push((*wire_id, blob));
                }
                write_messages(
                    buf,
                    blobs.iter().map(|(wire_id, blob)| (*wire_id, &blob[..])),
                );
            }
        }
    }
}

/// Iterator over events of a single received message.
///
/// Stops after the first error.
pub struct EventReader {
    buf: Bytes,
    failed: bool,
}

impl EventReader {
    pub fn new(message: Bytes) -> Self {
        Self {
            buf: message,
            failed: false,
        }
    }
}

impl Iterator for EventReader {
    type Item = Result<ReplicationEvent, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.buf.has_remaining() {
            return None;
        }

        let result = ReplicationEvent::decode(&mut self.buf);
        self.failed = result.is_err();
        Some(result)
    }
}

fn read_wire_id(buf: &mut Bytes) -> Result<WireId, DecodeError> {
    Ok(WireId::new(buf.try_get_u32_le()?))
}

pub(crate) fn write_connect<'a>(
    buf: &mut BytesMut,
    epoch: Epoch,
    entities: impl ExactSizeIterator<Item = (WireId, &'a [u8])>,
) {
    buf.put_u8(EventKind::Connect as u8);
    buf.put_u32_le(epoch.get());
    put_count(buf, entities.len());
    for (wire_id, init_payload) in entities {
        buf.put_u32_le(wire_id.get());
        INIT_PAYLOAD_PREFIX.write(init_payload, buf);
    }
}

pub(crate) fn write_create(buf: &mut BytesMut, wire_id: WireId, init_payload: &[u8]) {
    buf.put_u8(EventKind::Create as u8);
    buf.put_u32_le(wire_id.get());
    INIT_PAYLOAD_PREFIX.write(init_payload, buf);
}

pub(crate) fn write_destroy(buf: &mut BytesMut, wire_id: WireId) {
    buf.put_u8(EventKind::Destroy as u8);
    buf.put_u32_le(wire_id.get());
}

pub(crate) fn write_update<'a>(
    buf: &mut BytesMut,
    entries: impl ExactSizeIterator<Item = (WireId, &'a [u8])>,
) {
    buf.put_u8(EventKind::Update as u8);
    put_sized_entries(buf, entries);
}

/// Writes a messages event.
///
/// Each blob should already contain framed sub-messages.
pub(crate) fn write_messages<'a>(
    buf: &mut BytesMut,
    entries: impl ExactSizeIterator<Item = (WireId, &'a [u8])>,
) {
    buf.put_u8(EventKind::Messages as u8);
    put_sized_entries(buf, entries);
}

/// Entries with a `u32` count and `u32` data lengths.
fn put_sized_entries<'a>(
    buf: &mut BytesMut,
    entries: impl ExactSizeIterator<Item = (WireId, &'a [u8])>,
) {
    put_count(buf, entries.len());
    for (wire_id, data) in entries {
        buf.put_u32_le(wire_id.get());
        LenPrefix::U32.write(data, buf);
    }
}

fn put_count(buf: &mut BytesMut, count: usize) {
    let count = u32::try_from(count).expect("entity count should fit into `u32`");
    buf.put_u32_le(count);
}
