use std::{io, net::Ipv4Addr, thread, time::Duration};

use bytes::Bytes;
use replicon_wire::prelude::*;
use replicon_wire_example_backend::{ExampleClient, ExampleServer};
use test_log::test;

#[test]
fn connect_disconnect() {
    let mut registry = AuthorityRegistry::default();
    let (mut server, client) = setup(&mut registry).unwrap();

    assert_eq!(server.connected_clients(), 1);
    assert_eq!(registry.channels().count(), 1);
    assert!(client.is_connected());

    drop(client);
    wait_until(|| {
        server.receive(&mut registry);
        server.connected_clients() == 0
    });

    assert_eq!(registry.channels().count(), 0);
}

#[test]
fn server_disconnect() {
    let mut registry = AuthorityRegistry::default();
    let (mut server, mut client) = setup(&mut registry).unwrap();
    let mut directory = InboundDirectory::default();

    let channel_id = server.channels().next().unwrap();
    server.disconnect(channel_id, &mut registry);

    wait_until(|| client.receive(&mut directory).is_err());
    assert!(!client.is_connected());
}

#[test]
fn replication() {
    let mut registry = AuthorityRegistry::default();
    let (mut server, mut client) = setup(&mut registry).unwrap();
    let mut directory = InboundDirectory::default();

    let server_id = registry.create_entity(&b"box"[..]);
    registry
        .entity_mut(server_id)
        .unwrap()
        .set_sync_payload(&b"position"[..]);

    server.receive(&mut registry);
    registry.tick();
    server.send(&mut registry);

    wait_until(|| {
        client.receive(&mut directory).unwrap();
        !directory.is_empty()
    });

    assert_eq!(directory.known_epoch(), Some(registry.epoch()));
    let client_id = directory.pump_created().unwrap();
    let entity = directory.entity(client_id).unwrap();
    assert_eq!(entity.init_payload().as_ref(), b"box");
    assert_eq!(entity.sync_payload().as_ref(), b"position");
}

#[test]
fn messages() {
    let mut registry = AuthorityRegistry::default();
    let (mut server, mut client) = setup(&mut registry).unwrap();
    let mut directory = InboundDirectory::default();

    let server_id = registry.create_entity(Bytes::new());
    registry
        .entity_mut(server_id)
        .unwrap()
        .post_message(b"to client");
    registry.tick();
    server.send(&mut registry);

    wait_until(|| {
        client.receive(&mut directory).unwrap();
        !directory.is_empty()
    });

    let client_id = directory.pump_created().unwrap();
    let entity = directory.entity_mut(client_id).unwrap();
    assert_eq!(entity.pump_message().as_deref(), Some(&b"to client"[..]));

    entity.post_message(b"to server");
    client.send(&mut directory).unwrap();

    wait_until(|| {
        server.receive(&mut registry);
        registry.entity(server_id).unwrap().pending_messages() != 0
    });

    let entity = registry.entity_mut(server_id).unwrap();
    assert_eq!(entity.pump_message().as_deref(), Some(&b"to server"[..]));
}

#[test]
fn nothing_to_resend() {
    let mut registry = AuthorityRegistry::default();
    let (mut server, mut client) = setup(&mut registry).unwrap();
    let mut directory = InboundDirectory::default();

    registry.tick();
    server.send(&mut registry);
    server.send(&mut registry);

    wait_until(|| {
        client.receive(&mut directory).unwrap();
        directory.known_epoch().is_some()
    });

    // Let the possible duplicate arrive.
    thread::sleep(Duration::from_millis(50));
    client.receive(&mut directory).unwrap();

    let stats = directory.stats();
    assert_eq!(
        stats.events, 2,
        "connect and the first update should be received only once"
    );
}

fn setup(registry: &mut AuthorityRegistry) -> io::Result<(ExampleServer, ExampleClient)> {
    let mut server = ExampleServer::new(0)?;
    let port = server.local_addr()?.port();
    let client = ExampleClient::new((Ipv4Addr::LOCALHOST, port))?;

    wait_until(|| {
        server.receive(registry);
        server.connected_clients() == 1
    });

    Ok((server, client))
}

/// Polls the condition until it's met.
///
/// Sockets on localhost deliver almost immediately, but not within a single call.
fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }

    panic!("condition should be met in 5 seconds");
}
