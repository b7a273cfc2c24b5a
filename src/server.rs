pub mod outbound_channel;
pub mod registry_tick;

use alloc::vec::Vec;

use bytes::Bytes;
use hashbrown::HashMap;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::shared::{
    event::{self, EventReader, ReplicationEvent},
    ids::{ChannelId, Epoch, IdCounter, LocalId, WireId},
    replicated_entity::ReplicatedEntity,
    wire::DecodeError,
};
use outbound_channel::OutboundChannel;
use registry_tick::RegistryTick;

/// Configuration for [`AuthorityRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Epoch sent to clients on connect.
    ///
    /// By default a random epoch is generated for each registry.
    /// Set it only for deterministic tests, reusing an epoch across server restarts
    /// makes clients treat stale entities as valid.
    pub epoch: Option<Epoch>,

    /// Maximum length of a single message posted on an entity.
    ///
    /// Longer messages are logged and ignored.
    pub max_message_len: u16,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            epoch: None,
            max_message_len: u16::MAX,
        }
    }
}

/// Server-side owner of all replicated entities.
///
/// Creates and destroys authoritative [`ReplicatedEntity`] instances and writes
/// the changes into every open [`OutboundChannel`].
///
/// Creation is buffered until the next [`Self::tick`], which allows entities created
/// in the same tick to reference each other's [`WireId`]s in their init payloads.
/// Destruction is written immediately.
///
/// # Examples
///
/// ```
/// use replicon_wire::prelude::*;
///
/// let mut registry = AuthorityRegistry::default();
/// let channel = registry.open_connection();
///
/// let player = registry.create_entity(&b"player"[..]);
/// registry.tick();
///
/// registry.entity_mut(player).unwrap().set_sync_payload(&b"position"[..]);
/// registry.tick();
///
/// let data = registry.send_data(channel).unwrap();
/// assert!(!data.is_empty());
/// ```
#[derive(Debug)]
pub struct AuthorityRegistry {
    config: RegistryConfig,
    epoch: Epoch,
    tick: RegistryTick,

    entities: HashMap<LocalId, EntityRecord>,
    wire_to_local: HashMap<WireId, LocalId>,

    /// Entities created since the last tick.
    ///
    /// Flushed into [`Self::active`] once their init payload is set.
    pending: Vec<LocalId>,

    /// Announced entities in creation order.
    active: Vec<LocalId>,

    /// Destroyed entities that still have unread messages.
    destroyed: Vec<LocalId>,

    channels: HashMap<ChannelId, OutboundChannel>,

    local_ids: IdCounter,
    wire_ids: IdCounter,
    channel_ids: IdCounter,

    /// Reused between ticks to avoid reallocations.
    ///
    /// Cleared before the insertion.
    changed: Vec<LocalId>,
    posted: Vec<LocalId>,
}

impl AuthorityRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let epoch = config.epoch.unwrap_or_else(Epoch::random);
        debug!("starting registry with {epoch}");

        Self {
            config,
            epoch,
            tick: Default::default(),
            entities: Default::default(),
            wire_to_local: Default::default(),
            pending: Default::default(),
            active: Default::default(),
            destroyed: Default::default(),
            channels: Default::default(),
            local_ids: Default::default(),
            wire_ids: Default::default(),
            channel_ids: Default::default(),
            changed: Default::default(),
            posted: Default::default(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Returns the number of completed ticks.
    pub fn current_tick(&self) -> RegistryTick {
        self.tick
    }

    /// Returns the number of entities, including destroyed entities that weren't reclaimed yet.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Creates an entity without init payload.
    ///
    /// The entity gets its [`WireId`] immediately, but will be announced only
    /// on the first tick after [`ReplicatedEntity::set_init_payload`] is called.
    pub fn create_pending_entity(&mut self) -> LocalId {
        let local_id = self.local_ids.next_local();
        let wire_id = self.wire_ids.next_wire();
        trace!("creating `{local_id}` with `{wire_id}`");

        self.entities.insert(
            local_id,
            EntityRecord {
                wire_id,
                entity: ReplicatedEntity::authoritative(self.config.max_message_len),
            },
        );
        self.wire_to_local.insert(wire_id, local_id);
        self.pending.push(local_id);

        local_id
    }

    /// Creates an entity that will be announced to all clients on the next tick.
    pub fn create_entity(&mut self, init_payload: impl Into<Bytes>) -> LocalId {
        let local_id = self.create_pending_entity();
        self.entities
            .get_mut(&local_id)
            .expect("entity should have just been created")
            .entity
            .set_init_payload(init_payload);

        local_id
    }

    pub fn entity(&self, local_id: LocalId) -> Option<&ReplicatedEntity> {
        self.entities.get(&local_id).map(|record| &record.entity)
    }

    pub fn entity_mut(&mut self, local_id: LocalId) -> Option<&mut ReplicatedEntity> {
        self.entities
            .get_mut(&local_id)
            .map(|record| &mut record.entity)
    }

    /// Returns the ID under which the entity is known to clients.
    pub fn wire_id(&self, local_id: LocalId) -> Option<WireId> {
        self.entities.get(&local_id).map(|record| record.wire_id)
    }

    /// Returns the entity with the given wire ID if it wasn't destroyed.
    pub fn local_id(&self, wire_id: WireId) -> Option<LocalId> {
        self.wire_to_local.get(&wire_id).copied()
    }

    /// Destroys an entity.
    ///
    /// If the entity wasn't announced yet, it's removed silently. Otherwise the destruction is
    /// written to every open channel immediately, without waiting for the next tick.
    ///
    /// The entity is reclaimed once all its received messages are pumped.
    ///
    /// # Panics
    ///
    /// Panics if the entity doesn't exist or is already destroyed.
    pub fn destroy_entity(&mut self, local_id: LocalId) {
        let record = self
            .entities
            .get_mut(&local_id)
            .unwrap_or_else(|| panic!("`{local_id}` should be registered to be destroyed"));
        assert!(
            !record.entity.is_pending_destroy(),
            "`{local_id}` should be destroyed only once"
        );

        let wire_id = record.wire_id;
        self.wire_to_local.remove(&wire_id);

        if let Some(index) = self.pending.iter().position(|&id| id == local_id) {
            debug!("removing unannounced `{local_id}`");
            self.pending.remove(index);
            self.entities.remove(&local_id);
            return;
        }

        debug!("destroying `{local_id}` with `{wire_id}`");
        record.entity.mark_pending_destroy();
        record.entity.clear_out_messages();
        if let Some(index) = self.active.iter().position(|&id| id == local_id) {
            self.active.remove(index);
        }

        for channel in self.channels.values_mut() {
            event::write_destroy(channel.writer(), wire_id);
        }

        if record.entity.pending_messages() == 0 {
            self.reclaim(local_id);
        } else {
            debug!(
                "delaying reclamation of `{local_id}` until {} messages are pumped",
                record.entity.pending_messages()
            );
            self.destroyed.push(local_id);
        }
    }

    /// Opens a channel for a new connection.
    ///
    /// Immediately writes the epoch and init payloads of all announced entities into it.
    pub fn open_connection(&mut self) -> ChannelId {
        let channel_id = self.channel_ids.next_channel();
        debug!(
            "opening `{channel_id}` with {} entities",
            self.active.len()
        );

        let mut channel = OutboundChannel::new();
        let entities = &self.entities;
        event::write_connect(
            channel.writer(),
            self.epoch,
            self.active.iter().map(move |local_id| {
                let record = &entities[local_id];
                (record.wire_id, &record.entity.init_payload()[..])
            }),
        );
        self.channels.insert(channel_id, channel);

        channel_id
    }

    /// Closes a channel.
    ///
    /// Has no effect on the wire, the peer detects the disconnect via the transport.
    pub fn close_connection(&mut self, channel_id: ChannelId) {
        if self.channels.remove(&channel_id).is_some() {
            debug!("closing `{channel_id}`");
        } else {
            debug!("ignoring close of unknown `{channel_id}`");
        }
    }

    pub fn channel(&self, channel_id: ChannelId) -> Option<&OutboundChannel> {
        self.channels.get(&channel_id)
    }

    /// Returns IDs of all open channels.
    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.keys().copied()
    }

    /// Returns events accumulated in a channel since the previous call.
    ///
    /// See [`OutboundChannel::send_data`].
    pub fn send_data(&mut self, channel_id: ChannelId) -> Option<&[u8]> {
        self.channels
            .get_mut(&channel_id)
            .map(|channel| channel.send_data())
    }

    /// Writes changes since the previous tick into all channels.
    ///
    /// In order:
    /// 1. Announces entities that got their init payload.
    /// 2. Recalculates hashes of sync payloads.
    /// 3. Writes an update with changed entities and posted messages into every channel.
    ///    Channels that didn't have a tick yet receive all active entities.
    /// 4. Clears posted messages, including messages of entities that weren't announced yet.
    ///
    /// Every channel receives at least an empty update, so each tick clears
    /// the previously consumed data.
    pub fn tick(&mut self) {
        self.tick.increment();
        trace!("starting {}", self.tick);

        self.flush_pending();
        self.reclaim_drained();

        self.changed.clear();
        self.posted.clear();
        for &local_id in &self.active {
            let entity = &mut self
                .entities
                .get_mut(&local_id)
                .expect("active entities should be registered")
                .entity;

            entity.update_hash();
            if entity.is_changed() {
                self.changed.push(local_id);
            }
            if entity.has_out_messages() {
                self.posted.push(local_id);
            }
        }

        trace!(
            "writing {} changed entities and {} entities with messages",
            self.changed.len(),
            self.posted.len()
        );
        let entities = &self.entities;
        for channel in self.channels.values_mut() {
            let updated = if channel.is_synced() {
                &self.changed
            } else {
                &self.active
            };
            let buf = channel.writer();
            event::write_update(
                buf,
                updated.iter().map(move |local_id| {
                    let record = &entities[local_id];
                    (record.wire_id, &record.entity.sync_payload()[..])
                }),
            );
            if !self.posted.is_empty() {
                event::write_messages(
                    buf,
                    self.posted.iter().map(move |local_id| {
                        let record = &entities[local_id];
                        (record.wire_id, record.entity.out_messages())
                    }),
                );
            }
            channel.mark_synced();
        }

        for &local_id in &self.active {
            let entity = &mut self
                .entities
                .get_mut(&local_id)
                .expect("active entities should be registered")
                .entity;
            entity.commit_hash();
            entity.clear_out_messages();
        }

        // Messages can't be delivered before the announcement.
        for local_id in &self.pending {
            let entity = &mut self
                .entities
                .get_mut(local_id)
                .expect("pending entities should be registered")
                .entity;
            if entity.has_out_messages() {
                debug!("dropping messages posted on unannounced `{local_id}`");
                entity.clear_out_messages();
            }
        }
    }

    /// Applies a message received from a client.
    ///
    /// Clients can only send messages for entities. Messages for destroyed, unknown
    /// or not yet announced entities are ignored.
    pub fn receive(
        &mut self,
        channel_id: ChannelId,
        message: impl Into<Bytes>,
    ) -> Result<(), DecodeError> {
        let message = message.into();
        if !self.channels.contains_key(&channel_id) {
            debug!(
                "ignoring {} bytes from closed `{channel_id}`",
                message.len()
            );
            return Ok(());
        }

        trace!("received {} bytes from `{channel_id}`", message.len());
        for event in EventReader::new(message) {
            let event = event.inspect_err(|e| {
                debug!("discarding the rest of the message from `{channel_id}`: {e}")
            })?;

            let kind = event.kind();
            let ReplicationEvent::Messages(entries) = event else {
                debug!(
                    "discarding the rest of the message from `{channel_id}` due to unexpected `{kind:?}`"
                );
                return Err(DecodeError::UnexpectedEvent(kind));
            };

            for (wire_id, messages) in entries {
                let Some(&local_id) = self.wire_to_local.get(&wire_id) else {
                    debug!(
                        "ignoring {} messages for unknown `{wire_id}` from `{channel_id}`",
                        messages.len()
                    );
                    continue;
                };
                if self.pending.contains(&local_id) {
                    debug!(
                        "ignoring {} messages for unannounced `{wire_id}` from `{channel_id}`",
                        messages.len()
                    );
                    continue;
                }
                let record = self
                    .entities
                    .get_mut(&local_id)
                    .expect("mapped entities should be registered");

                trace!(
                    "received {} messages for `{wire_id}` from `{channel_id}`",
                    messages.len()
                );
                record.entity.push_messages(messages);
            }
        }

        Ok(())
    }

    /// Moves entities with init payload from pending into active and announces them.
    fn flush_pending(&mut self) {
        let Self {
            pending,
            active,
            entities,
            channels,
            ..
        } = self;

        pending.retain(|&local_id| {
            let record = &entities[&local_id];
            if record.entity.is_pending_init() {
                return true;
            }

            debug!("announcing `{local_id}` as `{}`", record.wire_id);
            for channel in channels.values_mut() {
                event::write_create(
                    channel.writer(),
                    record.wire_id,
                    record.entity.init_payload(),
                );
            }
            active.push(local_id);

            false
        });
    }

    /// Reclaims destroyed entities whose messages were pumped.
    fn reclaim_drained(&mut self) {
        let Self {
            destroyed,
            entities,
            ..
        } = self;

        destroyed.retain(|local_id| {
            if entities[local_id].entity.pending_messages() != 0 {
                return true;
            }

            let mut record = entities
                .remove(local_id)
                .expect("destroyed entities should be registered until reclaimed");
            trace!("reclaiming drained `{local_id}`");
            record.entity.reclaim();
            false
        });
    }

    fn reclaim(&mut self, local_id: LocalId) {
        let mut record = self
            .entities
            .remove(&local_id)
            .expect("reclaimed entity should be registered");
        trace!("reclaiming `{local_id}`");
        record.entity.reclaim();
    }
}

impl Default for AuthorityRegistry {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

#[derive(Debug)]
struct EntityRecord {
    wire_id: WireId,
    entity: ReplicatedEntity,
}
