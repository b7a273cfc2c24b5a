use bytes::Bytes;
use replicon_wire::{prelude::*, test_app::RegistryTestExt};
use test_log::test;

#[test]
fn single() {
    let mut registry = AuthorityRegistry::default();
    let mut directory = InboundDirectory::default();
    let channel = registry.connect_directory(&mut directory).unwrap();

    let server_id = registry.create_entity(Bytes::new());

    registry.tick();
    registry
        .exchange_with_directory(channel, &mut directory)
        .unwrap();

    let client_id = directory.pump_created().unwrap();

    registry.destroy_entity(server_id);
    assert!(registry.entity(server_id).is_none());

    registry.tick();
    registry
        .exchange_with_directory(channel, &mut directory)
        .unwrap();

    let entity = directory.entity(client_id).unwrap();
    assert!(entity.is_pending_destroy());
    assert_eq!(directory.wire_id(client_id), None);

    let entity = directory.reclaim(client_id);
    assert_eq!(entity.state(), EntityState::Reclaimed);
    assert!(directory.is_empty());
}

#[test]
fn without_tick() {
    let mut registry = AuthorityRegistry::default();
    let mut directory = InboundDirectory::default();
    let channel = registry.connect_directory(&mut directory).unwrap();

    let server_id = registry.create_entity(Bytes::new());

    registry.tick();
    registry
        .exchange_with_directory(channel, &mut directory)
        .unwrap();

    let client_id = directory.pump_created().unwrap();

    registry.destroy_entity(server_id);
    registry
        .exchange_with_directory(channel, &mut directory)
        .unwrap();

    assert!(
        directory.entity(client_id).unwrap().is_pending_destroy(),
        "destruction should be written without waiting for a tick"
    );
}

#[test]
fn before_announce() {
    let mut registry = AuthorityRegistry::default();
    let mut directory = InboundDirectory::default();
    let channel = registry.connect_directory(&mut directory).unwrap();

    let server_id = registry.create_entity(Bytes::new());
    registry.destroy_entity(server_id);

    registry.tick();
    let data = registry.send_data(channel).unwrap();
    assert_eq!(data, [3, 0, 0, 0, 0], "should contain only an empty update");

    registry
        .exchange_with_directory(channel, &mut directory)
        .unwrap();
    assert!(directory.is_empty());
}

#[test]
fn after_mutation() {
    let mut registry = AuthorityRegistry::default();
    let mut directory = InboundDirectory::default();
    let channel = registry.connect_directory(&mut directory).unwrap();

    let server_id = registry.create_entity(Bytes::new());

    registry.tick();
    registry
        .exchange_with_directory(channel, &mut directory)
        .unwrap();

    let client_id = directory.pump_created().unwrap();

    registry
        .entity_mut(server_id)
        .unwrap()
        .set_sync_payload(&b"last"[..]);
    registry.tick();
    registry.destroy_entity(server_id);
    registry
        .exchange_with_directory(channel, &mut directory)
        .unwrap();

    let entity = directory.entity(client_id).unwrap();
    assert!(entity.is_pending_destroy());
    assert_eq!(
        entity.sync_payload().as_ref(),
        b"last",
        "update from the same message should be applied before destruction"
    );
}

#[test]
fn before_pump_created() {
    let mut registry = AuthorityRegistry::default();
    let mut directory = InboundDirectory::default();
    let channel = registry.connect_directory(&mut directory).unwrap();

    let server_id = registry.create_entity(Bytes::new());

    registry.tick();
    registry.destroy_entity(server_id);
    registry
        .exchange_with_directory(channel, &mut directory)
        .unwrap();

    let client_id = directory
        .pump_created()
        .expect("destroyed entity should still be reported as created");
    assert!(directory.entity(client_id).unwrap().is_pending_destroy());
    directory.reclaim(client_id);
}

#[test]
fn drain_before_reclaim() {
    let mut registry = AuthorityRegistry::default();
    let mut directory = InboundDirectory::default();
    let channel = registry.connect_directory(&mut directory).unwrap();

    let server_id = registry.create_entity(Bytes::new());

    registry.tick();
    registry
        .exchange_with_directory(channel, &mut directory)
        .unwrap();

    let client_id = directory.pump_created().unwrap();

    registry
        .entity_mut(server_id)
        .unwrap()
        .post_message(b"farewell");
    registry.tick();
    registry.destroy_entity(server_id);
    registry
        .exchange_with_directory(channel, &mut directory)
        .unwrap();

    let entity = directory.entity_mut(client_id).unwrap();
    assert!(entity.is_pending_destroy());
    assert_eq!(entity.pump_message().as_deref(), Some(&b"farewell"[..]));

    directory.reclaim(client_id);
}

#[test]
#[should_panic]
fn reclaim_undrained() {
    let mut registry = AuthorityRegistry::default();
    let mut directory = InboundDirectory::default();
    let channel = registry.connect_directory(&mut directory).unwrap();

    let server_id = registry.create_entity(Bytes::new());
    registry
        .entity_mut(server_id)
        .unwrap()
        .post_message(b"unread");

    registry.tick();
    registry.destroy_entity(server_id);
    registry
        .exchange_with_directory(channel, &mut directory)
        .unwrap();

    let client_id = directory.pump_created().unwrap();
    directory.reclaim(client_id);
}

#[test]
fn server_waits_for_drain() {
    let mut registry = AuthorityRegistry::default();
    let mut directory = InboundDirectory::default();
    let channel = registry.connect_directory(&mut directory).unwrap();

    let server_id = registry.create_entity(Bytes::new());

    registry.tick();
    registry
        .exchange_with_directory(channel, &mut directory)
        .unwrap();

    let client_id = directory.pump_created().unwrap();
    directory
        .entity_mut(client_id)
        .unwrap()
        .post_message(b"input");
    registry
        .exchange_with_directory(channel, &mut directory)
        .unwrap();

    registry.destroy_entity(server_id);
    registry.tick();
    let entity = registry
        .entity_mut(server_id)
        .expect("entity with unread messages shouldn't be reclaimed");
    assert!(entity.is_pending_destroy());
    assert_eq!(entity.pump_message().as_deref(), Some(&b"input"[..]));

    registry.tick();
    assert!(registry.entity(server_id).is_none());
    assert!(registry.is_empty());
}

#[test]
#[should_panic]
fn double_destroy() {
    let mut registry = AuthorityRegistry::default();
    let server_id = registry.create_entity(Bytes::new());
    registry.tick();

    registry.destroy_entity(server_id);
    registry.destroy_entity(server_id);
}
