pub mod diagnostics;
pub mod wire_id_map;

use alloc::{collections::VecDeque, vec::Vec};

use bytes::{Bytes, BytesMut};
use hashbrown::{HashMap, HashSet};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::shared::{
    event::{self, EventReader, ReplicationEvent},
    ids::{Epoch, IdCounter, LocalId, WireId},
    replicated_entity::ReplicatedEntity,
    wire::DecodeError,
};
use diagnostics::DirectoryStats;
use wire_id_map::WireIdMap;

/// Configuration for [`InboundDirectory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub on_decode_error: DecodeErrorPolicy,

    /// Maximum length of a single message posted on a mirror.
    ///
    /// Longer messages are logged and ignored.
    pub max_message_len: u16,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            on_decode_error: Default::default(),
            max_message_len: u16::MAX,
        }
    }
}

/// What the directory does after a received message fails to decode.
///
/// Events decoded before the error stay applied in both cases.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeErrorPolicy {
    /// Discard the rest of the message.
    #[default]
    Discard,
    /// Discard the rest of the message and forget the known epoch.
    ///
    /// The next connect event will be treated as coming from a new server,
    /// replacing all entities with its snapshot.
    ForgetEpoch,
}

/// Client-side mirror of an [`AuthorityRegistry`](crate::server::AuthorityRegistry).
///
/// Decodes messages produced by a single [`OutboundChannel`](crate::server::outbound_channel::OutboundChannel)
/// and keeps a non-authoritative [`ReplicatedEntity`] for each entity announced by the server.
///
/// New entities are queued and returned by [`Self::pump_created`]. Destroyed entities
/// are flagged with [`ReplicatedEntity::is_pending_destroy`] and stay accessible
/// until [`Self::reclaim`] is called.
#[derive(Debug, Default)]
pub struct InboundDirectory {
    config: DirectoryConfig,
    known_epoch: Option<Epoch>,

    entities: HashMap<LocalId, ReplicatedEntity>,
    wire_ids: WireIdMap,
    pending_created: VecDeque<LocalId>,
    local_ids: IdCounter,

    stats: DirectoryStats,
}

impl InboundDirectory {
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Returns the epoch from the last applied connect event.
    pub fn known_epoch(&self) -> Option<Epoch> {
        self.known_epoch
    }

    pub fn stats(&self) -> &DirectoryStats {
        &self.stats
    }

    pub fn wire_id_map(&self) -> &WireIdMap {
        &self.wire_ids
    }

    /// Returns the number of entities, including destroyed entities that weren't reclaimed yet.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, local_id: LocalId) -> Option<&ReplicatedEntity> {
        self.entities.get(&local_id)
    }

    pub fn entity_mut(&mut self, local_id: LocalId) -> Option<&mut ReplicatedEntity> {
        self.entities.get_mut(&local_id)
    }

    /// Iterates over all entities in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (LocalId, &ReplicatedEntity)> {
        self.entities
            .iter()
            .map(|(&local_id, entity)| (local_id, entity))
    }

    /// Returns the local entity for a server entity.
    ///
    /// Returns [`None`] for destroyed entities.
    pub fn local_id(&self, wire_id: WireId) -> Option<LocalId> {
        self.wire_ids.local(wire_id)
    }

    /// Returns the server entity for a local entity.
    ///
    /// Returns [`None`] for destroyed entities.
    pub fn wire_id(&self, local_id: LocalId) -> Option<WireId> {
        self.wire_ids.wire(local_id)
    }

    /// Pops the oldest entity created by the server.
    ///
    /// Entities destroyed before being popped are still returned so the
    /// application can reclaim them.
    pub fn pump_created(&mut self) -> Option<LocalId> {
        self.pending_created.pop_front()
    }

    /// Decodes and applies all events from a message.
    ///
    /// On error, events decoded before the failure stay applied and the rest of the message
    /// is discarded. See [`DirectoryConfig::on_decode_error`] for additional recovery.
    pub fn receive(&mut self, message: impl Into<Bytes>) -> Result<(), DecodeError> {
        let message = message.into();
        trace!("received message of {} bytes", message.len());
        self.stats.bytes += message.len();

        for event in EventReader::new(message) {
            match event {
                Ok(event) => self.apply(event),
                Err(e) => {
                    self.stats.decode_errors += 1;
                    debug!("discarding the rest of the message: {e}");
                    if self.config.on_decode_error == DecodeErrorPolicy::ForgetEpoch {
                        debug!("forgetting the known epoch to resync on the next connect");
                        self.known_epoch = None;
                    }
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Encodes messages posted on mirrors since the last call.
    ///
    /// Returns [`None`] if there are no messages. Messages posted on destroyed
    /// entities are dropped.
    pub fn take_messages(&mut self) -> Option<Bytes> {
        let posted: Vec<_> = self
            .entities
            .iter()
            .filter(|(_, entity)| entity.has_out_messages())
            .filter_map(|(&local_id, _)| Some((self.wire_ids.wire(local_id)?, local_id)))
            .collect();

        let mut message = BytesMut::new();
        if !posted.is_empty() {
            trace!("writing messages for {} entities", posted.len());
            let entities = &self.entities;
            event::write_messages(
                &mut message,
                posted
                    .iter()
                    .map(|(wire_id, local_id)| (*wire_id, entities[local_id].out_messages())),
            );
        }

        for entity in self.entities.values_mut() {
            entity.clear_out_messages();
        }

        if message.is_empty() {
            None
        } else {
            Some(message.freeze())
        }
    }

    /// Releases a destroyed entity and returns it.
    ///
    /// # Panics
    ///
    /// Panics if the entity doesn't exist, isn't destroyed or has unread messages.
    pub fn reclaim(&mut self, local_id: LocalId) -> ReplicatedEntity {
        let mut entity = self
            .entities
            .remove(&local_id)
            .unwrap_or_else(|| panic!("`{local_id}` should exist to be reclaimed"));
        entity.reclaim();
        self.pending_created.retain(|&id| id != local_id);
        trace!("reclaiming `{local_id}`");

        entity
    }

    fn apply(&mut self, event: ReplicationEvent) {
        self.stats.events += 1;
        match event {
            ReplicationEvent::Connect { epoch, snapshot } => self.apply_connect(epoch, snapshot),
            ReplicationEvent::Create {
                wire_id,
                init_payload,
            } => self.create_or_refresh(wire_id, init_payload),
            ReplicationEvent::Destroy { wire_id } => self.destroy_mirror(wire_id),
            ReplicationEvent::Update(entries) => {
                trace!("applying update for {} entities", entries.len());
                for (wire_id, payload) in entries {
                    let Some(entity) = self.mapped_mut(wire_id) else {
                        trace!("ignoring update for unknown `{wire_id}`");
                        continue;
                    };
                    entity.apply_sync_payload(payload);
                    self.stats.entities_changed += 1;
                }
            }
            ReplicationEvent::Messages(entries) => {
                for (wire_id, messages) in entries {
                    let count = messages.len();
                    let Some(entity) = self.mapped_mut(wire_id) else {
                        trace!("ignoring {count} messages for unknown `{wire_id}`");
                        continue;
                    };
                    trace!("received {count} messages for `{wire_id}`");
                    entity.push_messages(messages);
                    self.stats.messages += count;
                }
            }
        }
    }

    fn apply_connect(&mut self, epoch: Epoch, snapshot: Vec<(WireId, Bytes)>) {
        let stale: Vec<_> = if self.known_epoch == Some(epoch) {
            debug!(
                "resyncing {} entities with {} from the same {epoch}",
                self.wire_ids.len(),
                snapshot.len(),
            );
            let present: HashSet<_> = snapshot.iter().map(|&(wire_id, _)| wire_id).collect();
            self.wire_ids
                .to_local()
                .keys()
                .filter(|wire_id| !present.contains(*wire_id))
                .copied()
                .collect()
        } else {
            debug!(
                "replacing {} entities with {} from new {epoch}",
                self.wire_ids.len(),
                snapshot.len(),
            );
            self.wire_ids.to_local().keys().copied().collect()
        };

        for wire_id in stale {
            self.destroy_mirror(wire_id);
        }

        for (wire_id, init_payload) in snapshot {
            self.create_or_refresh(wire_id, init_payload);
        }

        self.known_epoch = Some(epoch);
    }

    fn create_or_refresh(&mut self, wire_id: WireId, init_payload: Bytes) {
        if let Some(entity) = self.mapped_mut(wire_id) {
            trace!("refreshing init payload of `{wire_id}`");
            entity.refresh_init_payload(init_payload);
            return;
        }

        let local_id = self.local_ids.next_local();
        debug!("creating `{local_id}` for `{wire_id}`");
        self.wire_ids.insert(wire_id, local_id);
        self.entities.insert(
            local_id,
            ReplicatedEntity::mirror(init_payload, self.config.max_message_len),
        );
        self.pending_created.push_back(local_id);
        self.stats.entities_created += 1;
    }

    fn destroy_mirror(&mut self, wire_id: WireId) {
        let Some(local_id) = self.wire_ids.remove_by_wire(wire_id) else {
            debug!("ignoring destruction of unknown `{wire_id}`");
            return;
        };

        debug!("destroying `{local_id}` for `{wire_id}`");
        let entity = self
            .entities
            .get_mut(&local_id)
            .expect("mapped entities should be registered");
        entity.mark_pending_destroy();
        entity.clear_out_messages();
        self.stats.despawns += 1;
    }

    fn mapped_mut(&mut self, wire_id: WireId) -> Option<&mut ReplicatedEntity> {
        let local_id = self.wire_ids.local(wire_id)?;
        self.entities.get_mut(&local_id)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use test_log::test;

    use super::*;

    #[test]
    fn create() {
        let mut directory = InboundDirectory::default();
        directory
            .receive(encode([
                connect(5, &[]),
                ReplicationEvent::Create {
                    wire_id: WireId::new(1),
                    init_payload: Bytes::from_static(b"green"),
                },
            ]))
            .unwrap();

        let local_id = directory.pump_created().unwrap();
        assert_eq!(directory.pump_created(), None);
        assert_eq!(directory.wire_id(local_id), Some(WireId::new(1)));

        let entity = directory.entity(local_id).unwrap();
        assert!(!entity.is_authority());
        assert_eq!(entity.init_payload().as_ref(), b"green");
        assert_eq!(directory.known_epoch(), Epoch::new(5));
    }

    #[test]
    fn create_refresh() {
        let mut directory = InboundDirectory::default();
        for init_payload in [&b"old"[..], b"new"] {
            directory
                .receive(encode([ReplicationEvent::Create {
                    wire_id: WireId::new(1),
                    init_payload: Bytes::copy_from_slice(init_payload),
                }]))
                .unwrap();
        }

        let local_id = directory.pump_created().unwrap();
        assert_eq!(directory.pump_created(), None, "should keep the same entity");
        assert_eq!(
            directory.entity(local_id).unwrap().init_payload().as_ref(),
            b"new"
        );
    }

    #[test]
    fn destroy_queued() {
        let mut directory = InboundDirectory::default();
        directory
            .receive(encode([
                ReplicationEvent::Create {
                    wire_id: WireId::new(1),
                    init_payload: Bytes::new(),
                },
                ReplicationEvent::Destroy {
                    wire_id: WireId::new(1),
                },
            ]))
            .unwrap();

        let local_id = directory.pump_created().unwrap();
        assert!(directory.entity(local_id).unwrap().is_pending_destroy());
        assert_eq!(directory.wire_id(local_id), None);

        directory.reclaim(local_id);
        assert!(directory.is_empty());
    }

    #[test]
    fn reclaim_removes_from_queue() {
        let mut directory = InboundDirectory::default();
        directory
            .receive(encode([
                ReplicationEvent::Create {
                    wire_id: WireId::new(1),
                    init_payload: Bytes::new(),
                },
                ReplicationEvent::Destroy {
                    wire_id: WireId::new(1),
                },
            ]))
            .unwrap();

        let (local_id, _) = directory.iter().next().unwrap();
        directory.reclaim(local_id);
        assert_eq!(directory.pump_created(), None);
    }

    #[test]
    #[should_panic]
    fn reclaim_active() {
        let mut directory = InboundDirectory::default();
        directory
            .receive(encode([ReplicationEvent::Create {
                wire_id: WireId::new(1),
                init_payload: Bytes::new(),
            }]))
            .unwrap();

        let local_id = directory.pump_created().unwrap();
        directory.reclaim(local_id);
    }

    #[test]
    fn unknown_ignored() {
        let mut directory = InboundDirectory::default();
        directory
            .receive(encode([
                ReplicationEvent::Destroy {
                    wire_id: WireId::new(3),
                },
                ReplicationEvent::Update(vec![(WireId::new(3), Bytes::from_static(b"x"))]),
                ReplicationEvent::Messages(vec![(
                    WireId::new(3),
                    vec![Bytes::from_static(b"m")],
                )]),
            ]))
            .unwrap();

        assert!(directory.is_empty());
        assert_eq!(directory.stats().events, 3);
        assert_eq!(directory.stats().entities_changed, 0);
    }

    #[test]
    fn update_replaces() {
        let mut directory = InboundDirectory::default();
        directory
            .receive(encode([
                ReplicationEvent::Create {
                    wire_id: WireId::new(1),
                    init_payload: Bytes::new(),
                },
                ReplicationEvent::Update(vec![(WireId::new(1), Bytes::from_static(b"x"))]),
                ReplicationEvent::Update(vec![(WireId::new(1), Bytes::new())]),
            ]))
            .unwrap();

        let local_id = directory.pump_created().unwrap();
        assert!(directory.entity(local_id).unwrap().sync_payload().is_empty());
    }

    #[test]
    fn same_epoch_difference() {
        let mut directory = InboundDirectory::default();
        directory
            .receive(encode([connect(5, &[1, 2])]))
            .unwrap();
        let first = directory.local_id(WireId::new(1)).unwrap();
        let second = directory.local_id(WireId::new(2)).unwrap();

        directory
            .receive(encode([connect(5, &[2, 3])]))
            .unwrap();

        assert!(directory.entity(first).unwrap().is_pending_destroy());
        assert_eq!(directory.local_id(WireId::new(2)), Some(second));
        assert!(!directory.entity(second).unwrap().is_pending_destroy());
        assert!(directory.local_id(WireId::new(3)).is_some());
        assert_eq!(directory.stats().entities_created, 3);
        assert_eq!(directory.stats().despawns, 1);
    }

    #[test]
    fn new_epoch_replaces() {
        let mut directory = InboundDirectory::default();
        directory
            .receive(encode([connect(5, &[1, 2])]))
            .unwrap();
        let first = directory.local_id(WireId::new(1)).unwrap();

        directory.receive(encode([connect(9, &[1])])).unwrap();

        assert!(directory.entity(first).unwrap().is_pending_destroy());
        let recreated = directory.local_id(WireId::new(1)).unwrap();
        assert_ne!(recreated, first);
        assert_eq!(directory.wire_id_map().len(), 1);
        assert_eq!(directory.known_epoch(), Epoch::new(9));
    }

    #[test]
    fn partial_apply() {
        let mut message = BytesMut::new();
        ReplicationEvent::Create {
            wire_id: WireId::new(1),
            init_payload: Bytes::new(),
        }
        .encode(&mut message);
        message.extend_from_slice(&[7]);

        let mut directory = InboundDirectory::default();
        assert_eq!(
            directory.receive(message.freeze()),
            Err(DecodeError::UnknownEvent(7))
        );
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.stats().decode_errors, 1);
    }

    #[test]
    fn forget_epoch() {
        let mut directory = InboundDirectory::new(DirectoryConfig {
            on_decode_error: DecodeErrorPolicy::ForgetEpoch,
            ..Default::default()
        });
        directory
            .receive(encode([connect(5, &[1])]))
            .unwrap();
        let first = directory.local_id(WireId::new(1)).unwrap();

        assert!(directory.receive(Bytes::from_static(&[3, 1])).is_err());
        assert_eq!(directory.known_epoch(), None);

        directory
            .receive(encode([connect(5, &[1])]))
            .unwrap();
        assert!(directory.entity(first).unwrap().is_pending_destroy());
    }

    #[test]
    fn take_messages() {
        let mut directory = InboundDirectory::default();
        directory
            .receive(encode([connect(5, &[1])]))
            .unwrap();
        assert_eq!(directory.take_messages(), None);

        let local_id = directory.local_id(WireId::new(1)).unwrap();
        let entity = directory.entity_mut(local_id).unwrap();
        entity.post_message(b"first");
        entity.post_message(b"second");

        let mut message = directory.take_messages().unwrap();
        assert_eq!(
            ReplicationEvent::decode(&mut message),
            Ok(ReplicationEvent::Messages(vec![(
                WireId::new(1),
                vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]
            )]))
        );
        assert_eq!(directory.take_messages(), None);
    }

    fn connect(epoch: u32, wire_ids: &[u32]) -> ReplicationEvent {
        ReplicationEvent::Connect {
            epoch: Epoch::new(epoch).unwrap(),
            snapshot: wire_ids
                .iter()
                .map(|&wire_id| (WireId::new(wire_id), Bytes::new()))
                .collect(),
        }
    }

    fn encode(events: impl IntoIterator<Item = ReplicationEvent>) -> Bytes {
        let mut message = BytesMut::new();
        for event in events {
            event.encode(&mut message);
        }
        message.freeze()
    }
}
