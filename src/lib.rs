/*!
A server-authoritative entity-state replication protocol.

The server owns every replicated entity inside an [`AuthorityRegistry`](server::AuthorityRegistry).
Each remote connection gets an [`OutboundChannel`](server::outbound_channel::OutboundChannel) that
accumulates a compact binary event stream, and each client mirrors that stream into an
[`InboundDirectory`](client::InboundDirectory).

The crate doesn't move bytes between peers. A messaging backend is expected to:

- Copy [`AuthorityRegistry::send_data`](server::AuthorityRegistry::send_data) for every open
  channel to its peer after each [`AuthorityRegistry::tick`](server::AuthorityRegistry::tick),
  delivering it as one reliable, ordered message.
- Forward every received message to [`InboundDirectory::receive`](client::InboundDirectory::receive).
- Optionally forward [`InboundDirectory::take_messages`](client::InboundDirectory::take_messages)
  back to [`AuthorityRegistry::receive`](server::AuthorityRegistry::receive).

See `replicon_wire_example_backend` for an in-memory reference backend.

# Quick start

```
use replicon_wire::prelude::*;

let mut registry = AuthorityRegistry::default();
let channel = registry.open_connection();

let server_id = registry.create_entity(&b"green"[..]);
registry
    .entity_mut(server_id)
    .unwrap()
    .set_sync_payload(&b"position"[..]);
registry.tick();

// Normally transferred by the messaging backend.
let message = registry.send_data(channel).unwrap().to_vec();

let mut directory = InboundDirectory::default();
directory.receive(message).unwrap();

let client_id = directory.pump_created().unwrap();
let entity = directory.entity(client_id).unwrap();
assert_eq!(entity.init_payload().as_ref(), b"green");
assert_eq!(entity.sync_payload().as_ref(), b"position");
```

# Entity lifecycle

Entities move through [`EntityState`](shared::replicated_entity::EntityState):
`Pending` until their init payload is known, `Active` while replicated,
`PendingDestroy` once destroyed, and `Reclaimed` after their storage is released.

On the server, [`AuthorityRegistry::create_pending_entity`](server::AuthorityRegistry::create_pending_entity)
lets you defer the init payload, for example to embed the [`WireId`](shared::ids::WireId)s of other
entities created in the same tick.

On the client, destroyed mirrors stay readable until the application drains their messages and
calls [`InboundDirectory::reclaim`](client::InboundDirectory::reclaim):

```
# use replicon_wire::prelude::*;
# let mut directory = InboundDirectory::default();
let destroyed: Vec<_> = directory
    .iter()
    .filter(|(_, entity)| entity.is_pending_destroy())
    .map(|(id, _)| id)
    .collect();

for id in destroyed {
    let entity = directory.entity_mut(id).unwrap();
    while let Some(_message) = entity.pump_message() {
        // Handle the remaining messages.
    }
    directory.reclaim(id);
}
```
*/
#![no_std]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "server")]
pub mod server;
pub mod shared;
#[cfg(all(feature = "client", feature = "server"))]
pub mod test_app;

pub mod prelude {
    pub use super::shared::{
        event::{EventKind, EventReader, ReplicationEvent},
        ids::{ChannelId, Epoch, LocalId, WireId},
        replicated_entity::{EntityState, ReplicatedEntity},
        wire::{DecodeError, LenPrefix},
    };

    #[cfg(feature = "client")]
    pub use super::client::{
        DecodeErrorPolicy, DirectoryConfig, InboundDirectory, diagnostics::DirectoryStats,
        wire_id_map::WireIdMap,
    };

    #[cfg(feature = "server")]
    pub use super::server::{
        AuthorityRegistry, RegistryConfig, outbound_channel::OutboundChannel,
        registry_tick::RegistryTick,
    };
}
