use hashbrown::{HashMap, hash_map::Entry};
use log::trace;

use crate::shared::ids::{LocalId, WireId};

/// Bidirectional mapping between server and client entity IDs.
///
/// Both directions are always updated together.
#[derive(Default, Debug)]
pub struct WireIdMap {
    to_local: HashMap<WireId, LocalId>,
    to_wire: HashMap<LocalId, WireId>,
}

impl WireIdMap {
    /// Inserts a pair.
    ///
    /// # Panics
    ///
    /// Panics if the wire ID is already mapped.
    pub(crate) fn insert(&mut self, wire_id: WireId, local_id: LocalId) {
        match self.to_local.entry(wire_id) {
            Entry::Occupied(entry) => {
                panic!("`{wire_id}` is already mapped to `{}`", entry.get())
            }
            Entry::Vacant(entry) => {
                trace!("mapping `{wire_id}` to `{local_id}`");
                entry.insert(local_id);
                self.to_wire.insert(local_id, wire_id);
            }
        }
    }

    /// Removes a pair by its wire ID.
    ///
    /// Returns the local ID if the wire ID was mapped.
    pub(crate) fn remove_by_wire(&mut self, wire_id: WireId) -> Option<LocalId> {
        let local_id = self.to_local.remove(&wire_id)?;
        self.to_wire.remove(&local_id);
        trace!("unmapping `{wire_id}` from `{local_id}`");

        Some(local_id)
    }

    pub fn local(&self, wire_id: WireId) -> Option<LocalId> {
        self.to_local.get(&wire_id).copied()
    }

    pub fn wire(&self, local_id: LocalId) -> Option<WireId> {
        self.to_wire.get(&local_id).copied()
    }

    #[inline]
    pub fn to_local(&self) -> &HashMap<WireId, LocalId> {
        &self.to_local
    }

    #[inline]
    pub fn to_wire(&self) -> &HashMap<LocalId, WireId> {
        &self.to_wire
    }

    pub fn len(&self) -> usize {
        self.to_local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_local.is_empty()
    }
}
