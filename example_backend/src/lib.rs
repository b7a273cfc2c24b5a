/*!
A simple transport for `replicon_wire` intended only for examples and tests.

Uses non-blocking TCP sockets on localhost and frames every replication message
with its length. No encryption, no reconnection handling, no backpressure.

# Example

```no_run
use std::net::Ipv4Addr;

use replicon_wire::prelude::*;
use replicon_wire_example_backend::{ExampleClient, ExampleServer};

let mut registry = AuthorityRegistry::default();
let mut server = ExampleServer::new(0)?;

let mut directory = InboundDirectory::default();
let mut client = ExampleClient::new((Ipv4Addr::LOCALHOST, server.local_addr()?.port()))?;

loop {
    server.receive(&mut registry);
    registry.tick();
    server.send(&mut registry);

    client.receive(&mut directory)?;
    while let Some(local_id) = directory.pump_created() {
        println!("created `{local_id}`");
    }
    client.send(&mut directory)?;
}
# Ok::<(), std::io::Error>(())
```
*/

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "server")]
pub mod server;
mod tcp;

#[cfg(feature = "client")]
pub use client::ExampleClient;
#[cfg(feature = "server")]
pub use server::ExampleServer;
