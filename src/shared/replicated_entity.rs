use alloc::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use log::{error, trace};
use xxhash_rust::xxh3::xxh3_64;

use super::wire;

/// Lifecycle of a [`ReplicatedEntity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Created on the server, but the init payload isn't set yet.
    ///
    /// Excluded from hashing, diffing and broadcasts.
    Pending,
    /// Init payload is known, the entity is replicated.
    Active,
    /// Destroyed, but storage is kept until inbound messages are drained.
    PendingDestroy,
    /// Storage released, the entity can't be accessed by its ID anymore.
    Reclaimed,
}

/// State container of a single replicated entity.
///
/// On the server the entity is authoritative and owned by an
/// [`AuthorityRegistry`](crate::server::AuthorityRegistry).
/// On the client it's a mirror owned by an [`InboundDirectory`](crate::client::InboundDirectory).
#[derive(Debug)]
pub struct ReplicatedEntity {
    authority: bool,
    state: EntityState,
    max_message_len: u16,

    /// Immutable payload sent once on creation.
    init_payload: Bytes,

    /// Current snapshot, replaced as a whole.
    sync_payload: Bytes,

    /// Hash of [`Self::sync_payload`] calculated on the last tick.
    hash: u64,

    /// Hash from the previous tick.
    ///
    /// [`None`] until the first tick after activation, which makes the entity
    /// appear as changed.
    prev_hash: Option<u64>,

    /// Sub-messages posted since the last drain, each prefixed with [`SUB_MESSAGE_PREFIX`](wire::SUB_MESSAGE_PREFIX).
    out_messages: BytesMut,

    in_messages: VecDeque<Bytes>,
}

impl ReplicatedEntity {
    pub(crate) fn authoritative(max_message_len: u16) -> Self {
        Self::new(true, EntityState::Pending, Bytes::new(), max_message_len)
    }

    pub(crate) fn mirror(init_payload: Bytes, max_message_len: u16) -> Self {
        Self::new(false, EntityState::Active, init_payload, max_message_len)
    }

    fn new(authority: bool, state: EntityState, init_payload: Bytes, max_message_len: u16) -> Self {
        Self {
            authority,
            state,
            max_message_len,
            init_payload,
            sync_payload: Default::default(),
            hash: 0,
            prev_hash: None,
            out_messages: Default::default(),
            in_messages: Default::default(),
        }
    }

    /// Returns `true` for server-side entities whose writes are the ground truth.
    pub fn is_authority(&self) -> bool {
        self.authority
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    /// Returns `true` if the init payload isn't set yet.
    pub fn is_pending_init(&self) -> bool {
        self.state == EntityState::Pending
    }

    /// Returns `true` if the entity was destroyed and waits to be reclaimed.
    pub fn is_pending_destroy(&self) -> bool {
        self.state == EntityState::PendingDestroy
    }

    pub fn init_payload(&self) -> &Bytes {
        &self.init_payload
    }

    /// Sets the payload that will be sent once together with the creation of the entity.
    ///
    /// Server only. Can be called only once, subsequent calls are logged and ignored.
    pub fn set_init_payload(&mut self, payload: impl Into<Bytes>) {
        if !self.authority {
            error!("ignoring init payload for a non-authoritative entity");
            return;
        }
        if self.state != EntityState::Pending {
            error!("ignoring init payload for an entity in `{:?}` state", self.state);
            return;
        }

        self.init_payload = payload.into();
        self.state = EntityState::Active;
    }

    /// Replaces the init payload after a resync.
    pub(crate) fn refresh_init_payload(&mut self, payload: Bytes) {
        self.init_payload = payload;
    }

    /// Returns the current snapshot.
    ///
    /// On the client it's the last payload received from the server.
    pub fn sync_payload(&self) -> &Bytes {
        &self.sync_payload
    }

    /// Replaces the current snapshot.
    ///
    /// Server only. The whole payload is replicated on the next tick if it differs from
    /// the payload replicated on the previous tick.
    pub fn set_sync_payload(&mut self, payload: impl Into<Bytes>) {
        if !self.authority {
            error!("ignoring sync payload for a non-authoritative entity");
            return;
        }

        self.sync_payload = payload.into();
    }

    pub(crate) fn apply_sync_payload(&mut self, payload: Bytes) {
        self.sync_payload = payload;
    }

    /// Queues a message for the other side.
    ///
    /// Messages are sent on the next tick in the order they were posted.
    /// Messages longer than the configured limit are logged and ignored.
    pub fn post_message(&mut self, message: &[u8]) {
        if message.len() > self.max_message_len as usize {
            error!(
                "ignoring message of {} bytes, the limit is {}",
                message.len(),
                self.max_message_len
            );
            return;
        }

        trace!("posting message of {} bytes", message.len());
        wire::frame_message(message, &mut self.out_messages);
    }

    /// Pops the oldest received message.
    pub fn pump_message(&mut self) -> Option<Bytes> {
        self.in_messages.pop_front()
    }

    /// Returns the number of received messages that weren't pumped yet.
    pub fn pending_messages(&self) -> usize {
        self.in_messages.len()
    }

    pub(crate) fn push_messages(&mut self, messages: impl IntoIterator<Item = Bytes>) {
        self.in_messages.extend(messages);
    }

    /// Returns framed messages posted since the last drain.
    pub(crate) fn out_messages(&self) -> &[u8] {
        &self.out_messages
    }

    pub(crate) fn has_out_messages(&self) -> bool {
        !self.out_messages.is_empty()
    }

    /// Clears posted messages.
    ///
    /// Keeps the allocated memory for reuse.
    pub(crate) fn clear_out_messages(&mut self) {
        self.out_messages.clear();
    }

    /// Recalculates the hash of the sync payload.
    pub(crate) fn update_hash(&mut self) {
        self.hash = xxh3_64(&self.sync_payload);
    }

    /// Returns `true` if the hash differs from the previous tick.
    pub(crate) fn is_changed(&self) -> bool {
        self.prev_hash != Some(self.hash)
    }

    /// Remembers the current hash as the previous one.
    pub(crate) fn commit_hash(&mut self) {
        self.prev_hash = Some(self.hash);
    }

    /// Flags the entity as destroyed.
    ///
    /// The flag is never cleared.
    pub(crate) fn mark_pending_destroy(&mut self) {
        self.state = EntityState::PendingDestroy;
    }

    /// Releases the entity.
    ///
    /// # Panics
    ///
    /// Panics if the entity isn't pending destroy or has unread messages.
    pub(crate) fn reclaim(&mut self) {
        assert_eq!(
            self.state,
            EntityState::PendingDestroy,
            "only destroyed entities can be reclaimed"
        );
        assert!(
            self.in_messages.is_empty(),
            "all {} received messages should be pumped before reclaiming",
            self.in_messages.len()
        );

        self.state = EntityState::Reclaimed;
        self.out_messages.clear();
    }
}
