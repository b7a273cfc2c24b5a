use serde::{Deserialize, Serialize};

/// Replication stats accumulated by an [`InboundDirectory`](super::InboundDirectory)
/// over its lifetime.
///
/// Counters are never reset, use [`Self::since`] to measure an interval.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryStats {
    /// Incremented per entity that was added to the directory.
    pub entities_created: usize,
    /// Incremented per entity that received a new sync payload.
    pub entities_changed: usize,
    /// Incremented per entity that was destroyed.
    pub despawns: usize,
    /// Incremented per received sub-message.
    pub messages: usize,
    /// Incremented per applied event.
    pub events: usize,
    /// Incremented for every byte passed to `receive`.
    pub bytes: usize,
    /// Incremented per message that failed to decode.
    pub decode_errors: usize,
}

impl DirectoryStats {
    /// Returns the difference between these stats and earlier ones.
    ///
    /// `saturating_sub` prevents overflow if `earlier` was taken from another directory.
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            entities_created: self.entities_created.saturating_sub(earlier.entities_created),
            entities_changed: self.entities_changed.saturating_sub(earlier.entities_changed),
            despawns: self.despawns.saturating_sub(earlier.despawns),
            messages: self.messages.saturating_sub(earlier.messages),
            events: self.events.saturating_sub(earlier.events),
            bytes: self.bytes.saturating_sub(earlier.bytes),
            decode_errors: self.decode_errors.saturating_sub(earlier.decode_errors),
        }
    }
}
