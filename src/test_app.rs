use bytes::Bytes;

use crate::prelude::*;

/**
Extension for [`AuthorityRegistry`] to exchange data with an [`InboundDirectory`] directly,
without a messaging backend.

Convenient for testing.

# Example

```
use replicon_wire::{prelude::*, test_app::RegistryTestExt};

let mut registry = AuthorityRegistry::default();
let mut directory = InboundDirectory::default();
let channel = registry.connect_directory(&mut directory).unwrap();

let server_id = registry.create_entity(&b"tree"[..]);
registry.tick();
registry.exchange_with_directory(channel, &mut directory).unwrap();

let client_id = directory.pump_created().unwrap();
assert_eq!(directory.wire_id(client_id), registry.wire_id(server_id));
```
*/
pub trait RegistryTestExt {
    /// Opens a new channel and delivers its connect event to the directory.
    ///
    /// Returns the ID of the opened channel.
    fn connect_directory(
        &mut self,
        directory: &mut InboundDirectory,
    ) -> Result<ChannelId, DecodeError>;

    /// Delivers data accumulated in the channel to the directory and messages
    /// posted on the directory back to the registry.
    ///
    /// Data that was already delivered isn't delivered again, matching a backend
    /// that consumes each channel once per tick.
    ///
    /// # Panics
    ///
    /// Panics if the channel is closed.
    fn exchange_with_directory(
        &mut self,
        channel_id: ChannelId,
        directory: &mut InboundDirectory,
    ) -> Result<(), DecodeError>;
}

impl RegistryTestExt for AuthorityRegistry {
    fn connect_directory(
        &mut self,
        directory: &mut InboundDirectory,
    ) -> Result<ChannelId, DecodeError> {
        let channel_id = self.open_connection();
        self.exchange_with_directory(channel_id, directory)?;

        Ok(channel_id)
    }

    fn exchange_with_directory(
        &mut self,
        channel_id: ChannelId,
        directory: &mut InboundDirectory,
    ) -> Result<(), DecodeError> {
        let channel = self
            .channel(channel_id)
            .unwrap_or_else(|| panic!("`{channel_id}` should be open"));

        if !channel.is_pending_clear() {
            let data = self
                .send_data(channel_id)
                .map(Bytes::copy_from_slice)
                .unwrap_or_default();
            directory.receive(data)?;
        }

        if let Some(message) = directory.take_messages() {
            self.receive(channel_id, message)?;
        }

        Ok(())
    }
}
