use core::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Number of [`AuthorityRegistry::tick`](super::AuthorityRegistry::tick) calls.
///
/// Can represent your simulation step. Not sent over the wire,
/// used to correlate registry logs with the simulation.
#[derive(Default, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistryTick(u32);

impl RegistryTick {
    /// Creates a new instance wrapping the given value.
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Gets the value of this tick.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Increments current tick by the specified `value` and takes wrapping into account.
    #[inline]
    pub fn increment_by(&mut self, value: u32) {
        self.0 = self.0.wrapping_add(value);
    }

    /// Same as [`Self::increment_by`], but increments only by 1.
    #[inline]
    pub fn increment(&mut self) {
        self.increment_by(1)
    }
}

impl Display for RegistryTick {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "tick {}", self.0)
    }
}
