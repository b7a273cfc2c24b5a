use core::{
    fmt::{self, Display, Formatter},
    num::NonZeroU32,
};

use serde::{Deserialize, Serialize};

/// Identifier of an entity inside a single [`AuthorityRegistry`](crate::server::AuthorityRegistry)
/// or [`InboundDirectory`](crate::client::InboundDirectory).
///
/// Never reused while its owner lives and meaningless outside of it.
/// Use [`WireId`] to refer to entities across the connection.
#[derive(Debug, Hash, PartialEq, Eq, Ord, PartialOrd, Clone, Copy)]
pub struct LocalId(u32);

impl LocalId {
    /// Returns the raw value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl Display for LocalId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "local#{}", self.0)
    }
}

/// Identifier assigned by the [`AuthorityRegistry`](crate::server::AuthorityRegistry)
/// and transmitted on the wire.
///
/// Never reused for the lifetime of the registry. Only valid together with the
/// [`Epoch`] of the registry that assigned it.
///
/// Implements [`Serialize`] and [`Deserialize`] to let entities reference each other
/// inside their payloads.
#[derive(Debug, Hash, PartialEq, Eq, Ord, PartialOrd, Clone, Copy, Serialize, Deserialize)]
pub struct WireId(u32);

impl WireId {
    /// Creates an ID from the value read from the wire.
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl Display for WireId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "wire#{}", self.0)
    }
}

/// Random token generated once per [`AuthorityRegistry`](crate::server::AuthorityRegistry).
///
/// Clients compare it to tell a reconnect to the same server session apart from
/// a restarted server whose [`WireId`]s mean something else.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct Epoch(NonZeroU32);

impl Epoch {
    /// Creates an epoch from a raw value.
    ///
    /// Returns [`None`] for zero.
    #[inline]
    pub const fn new(value: u32) -> Option<Self> {
        match NonZeroU32::new(value) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Generates a new random epoch.
    pub fn random() -> Self {
        let value = fastrand::u32(1..);
        Self(NonZeroU32::new(value).expect("range should exclude zero"))
    }

    /// Returns the raw value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl Display for Epoch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "epoch {:#010x}", self.0.get())
    }
}

/// Handle to an [`OutboundChannel`](crate::server::outbound_channel::OutboundChannel)
/// owned by an [`AuthorityRegistry`](crate::server::AuthorityRegistry).
#[derive(Debug, Hash, PartialEq, Eq, Ord, PartialOrd, Clone, Copy)]
pub struct ChannelId(u32);

impl ChannelId {
    /// Returns the raw value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "channel#{}", self.0)
    }
}

/// Generator of monotonically increasing IDs starting from 1.
#[derive(Debug, Default)]
pub(crate) struct IdCounter(u32);

impl IdCounter {
    /// Returns the next unused value.
    ///
    /// # Panics
    ///
    /// Panics when the ID space is exhausted, since IDs are never reused.
    pub(crate) fn advance(&mut self) -> u32 {
        self.0 = self
            .0
            .checked_add(1)
            .expect("IDs should never be reused, but all of them were used");
        self.0
    }

    pub(crate) fn next_local(&mut self) -> LocalId {
        LocalId(self.advance())
    }

    pub(crate) fn next_wire(&mut self) -> WireId {
        WireId(self.advance())
    }

    pub(crate) fn next_channel(&mut self) -> ChannelId {
        ChannelId(self.advance())
    }
}
