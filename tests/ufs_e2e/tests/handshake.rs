//! CONTEXT: client handshake against the dispatcher's well-known ports
//! INTENT: Malformed acks, missing dispatcher, session teardown and shutdown behaviour
//! TESTS: short CONNECT_ACK is BadData; absent dispatcher is NotFound; last handle ends the
//!        session; abandoned handshake leaves no session; shutdown releases pending callers
// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::thread;

use ufs_client::{Error, ProxySlot, UserlandFs};
use ufs_e2e::{client_options, register_channels, start, wait_until, Gate, Harness};
use ufs_ipc::wire::{self, WellKnownNames};
use ufs_ipc::{CancelToken, PortNamespace, Wait};

#[test]
fn short_connect_ack_is_bad_data() {
    let namespace = Arc::new(PortNamespace::new());
    let names = WellKnownNames::for_product("shortfs");
    let connect = namespace.create(Some(&names.connect), 64).unwrap();
    let reply = namespace.create(Some(&names.connect_reply), 64).unwrap();
    let responder = thread::spawn(move || {
        assert_eq!(connect.receive(Wait::Blocking).unwrap().code, wire::CONNECT);
        reply.send(wire::CONNECT_ACK, &[0u8; 8]).unwrap();
    });

    let err = UserlandFs::connect(&namespace, client_options("shortfs"), None).unwrap_err();
    assert_eq!(err, Error::BadData);
    responder.join().unwrap();
}

#[test]
fn missing_dispatcher_is_not_found() {
    let namespace = Arc::new(PortNamespace::new());
    let slot = ProxySlot::new(namespace, client_options("ghostfs"));
    assert_eq!(slot.acquire().err(), Some(Error::NotFound));
    assert_eq!(slot.mount_count(), 0);
}

#[test]
fn dropping_last_handle_ends_the_session() {
    let harness = start("sessionfs", |ctx| register_channels(&ctx, 1, |contact| contact));
    let first = harness.slot.acquire().unwrap();
    let second = harness.slot.acquire().unwrap();
    first.register_file_system("svc").unwrap();
    assert_eq!(harness.dispatcher.session_count(), 1);

    drop(first);
    assert_eq!(harness.dispatcher.session_count(), 1);
    drop(second);
    assert!(wait_until(|| harness.dispatcher.session_count() == 0));
    // Records outlive the session.
    assert!(harness.dispatcher.table().get("svc").is_some());

    // A later acquire performs a fresh handshake.
    let again = harness.slot.acquire().unwrap();
    assert!(again.register_file_system("svc").is_ok());
    assert_eq!(harness.dispatcher.session_count(), 1);
    assert_eq!(harness.supervisor.spawn_count(), 1);
}

#[test]
fn abandoned_handshake_leaves_no_session_behind() {
    let harness = start("abandonfs", |ctx| register_channels(&ctx, 1, |contact| contact));
    let cancelled = CancelToken::new();
    cancelled.cancel();
    assert_eq!(harness.slot.acquire_with(Some(&cancelled)).err(), Some(Error::Cancelled));
    assert_eq!(harness.slot.mount_count(), 0);
    // The dispatcher still answered; its ack is waiting on the reply port.
    assert!(wait_until(|| harness.dispatcher.session_count() == 1));

    let proxy = harness.slot.acquire().unwrap();
    assert_eq!(proxy.register_file_system("svc").unwrap().channel_count(), 1);
    drop(proxy);
    assert!(wait_until(|| harness.dispatcher.session_count() == 0));
}

#[test]
fn shutdown_releases_pending_callers() {
    let gate = Arc::new(Gate::new());
    let worker_gate = Arc::clone(&gate);
    let Harness { namespace, dispatcher, slot, .. } = start("stopfs", move |ctx| {
        worker_gate.pass();
        register_channels(&ctx, 1, |contact| contact);
    });
    let caller = {
        let slot = Arc::clone(&slot);
        thread::spawn(move || {
            slot.acquire().unwrap().register_file_system("svc").map(|h| h.channel_count())
        })
    };
    assert!(wait_until(|| dispatcher.table().get("svc").map_or(false, |r| r.ref_count() == 1)));

    dispatcher.shutdown();
    let err = caller.join().unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled | Error::Disconnected), "unexpected {err}");
    assert!(namespace.discovery().owner("stopfs.dispatcher").is_none());
    assert!(namespace.lookup("stopfs.dispatcher").is_err());
    gate.open();
}
