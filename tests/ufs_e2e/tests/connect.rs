//! CONTEXT: connect-to-filesystem path through a live dispatcher
//! INTENT: On-demand launch, request coalescing, contact propagation, caller-side waits
//! TESTS: one spawn for concurrent callers; capabilities reach the handle; timeout and cancel
//!        abandon only the caller
// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ufs_client::Error;
use ufs_e2e::{register_channels, start, wait_for_refs, Gate};
use ufs_ipc::wire::{ClientFsType, FsCapabilities};
use ufs_ipc::{CancelToken, Wait};
use ufs_registry::RecordState;

#[test]
fn concurrent_callers_share_one_worker() {
    let gate = Arc::new(Gate::new());
    let worker_gate = Arc::clone(&gate);
    let harness = start("coalescefs", move |ctx| {
        worker_gate.pass();
        register_channels(&ctx, 2, |contact| contact);
    });
    let first = harness.slot.acquire().unwrap();

    let callers: Vec<_> = (0..4)
        .map(|_| {
            let slot = Arc::clone(&harness.slot);
            thread::spawn(move || {
                let proxy = slot.acquire().unwrap();
                let handle = proxy.register_file_system("svc").unwrap();
                handle.channels().to_vec()
            })
        })
        .collect();
    assert!(wait_for_refs(&harness, "svc", 4));
    assert_eq!(harness.dispatcher.table().get("svc").unwrap().state(), RecordState::Initializing);
    gate.open();

    let channels: Vec<_> = callers.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(channels[0].len(), 2);
    assert!(channels.iter().all(|c| *c == channels[0]));
    assert_eq!(harness.supervisor.spawn_count(), 1);

    // A second session gets the same channels without another launch.
    let options = ufs_e2e::client_options("coalescefs");
    let other = ufs_client::UserlandFs::connect(&harness.namespace, options, None).unwrap();
    assert_ne!(other.session(), first.session());
    assert_eq!(other.register_file_system("svc").unwrap().channels(), channels[0].as_slice());
    assert_eq!(harness.supervisor.spawn_count(), 1);
}

#[test]
fn capabilities_and_fs_type_reach_the_handle() {
    let harness = start("capsfs", |ctx| {
        register_channels(&ctx, 1, |mut contact| {
            contact.capabilities = FsCapabilities::from_bits(0b101);
            contact.fs_type = ClientFsType::Legacy;
            contact
        });
    });
    let proxy = harness.slot.acquire().unwrap();
    let handle = proxy.register_file_system("bfs").unwrap();
    assert_eq!(handle.name(), "bfs");
    assert_eq!(handle.channel_count(), 1);
    assert!(handle.capabilities().has(0) && handle.capabilities().has(2));
    assert_eq!(handle.fs_type(), ClientFsType::Legacy);
}

#[test]
fn empty_name_is_bad_data_without_launch() {
    let harness = start("emptyfs", |ctx| register_channels(&ctx, 1, |c| c));
    let proxy = harness.slot.acquire().unwrap();
    assert_eq!(proxy.register_file_system("").unwrap_err(), Error::BadData);
    assert_eq!(harness.supervisor.spawn_count(), 0);
}

#[test]
fn unknown_server_binary_is_not_found() {
    let harness = start("nobinfs", |ctx| register_channels(&ctx, 1, |c| c));
    let namespace = Arc::clone(&harness.namespace);
    drop(harness);
    // Same product, but the supervisor has no entry installed at the server path.
    let supervisor =
        Arc::new(ufs_dispatcher::ThreadSupervisor::new(Arc::clone(&namespace), "nobinfs"));
    let config = ufs_e2e::config("nobinfs");
    let dispatcher =
        ufs_dispatcher::Dispatcher::start(Arc::clone(&namespace), config, supervisor).unwrap();
    let slot =
        ufs_client::ProxySlot::new(Arc::clone(&namespace), ufs_e2e::client_options("nobinfs"));
    let proxy = slot.acquire().unwrap();
    assert_eq!(proxy.register_file_system("ramfs").unwrap_err(), Error::NotFound);
    // The failed record was released by its only waiter and is gone.
    assert!(dispatcher.table().get("ramfs").is_none());
}

#[test]
fn timeout_and_cancel_do_not_cancel_the_launch() {
    let gate = Arc::new(Gate::new());
    let worker_gate = Arc::clone(&gate);
    let harness = start("waitfs", move |ctx| {
        worker_gate.pass();
        register_channels(&ctx, 1, |contact| contact);
    });
    let proxy = harness.slot.acquire().unwrap();

    let err = proxy
        .register_file_system_with("slowfs", Wait::Timeout(Duration::from_millis(30)), None)
        .unwrap_err();
    assert_eq!(err, Error::Timeout);

    let token = CancelToken::new();
    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            token.cancel();
        })
    };
    let err = proxy.register_file_system_with("slowfs", Wait::Blocking, Some(&token)).unwrap_err();
    assert_eq!(err, Error::Cancelled);
    canceller.join().unwrap();

    // Both abandoned requests still wait inside the dispatcher; the launch carries on.
    assert!(wait_for_refs(&harness, "slowfs", 2));
    gate.open();
    let handle = proxy.register_file_system("slowfs").unwrap();
    assert_eq!(handle.channel_count(), 1);
    assert_eq!(harness.supervisor.spawn_count(), 1);
}
