//! CONTEXT: filesystem record lifecycle across worker crashes and reference drops
//! INTENT: Lock in the asymmetric removal policy (Ready stays, Failed goes)
//! TESTS: crash aborts every waiter; failed record is reclaimed and relaunched; ready record
//!        survives zero references; self-registered records are reused
// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use ufs_client::Error;
use ufs_dispatcher::worker::register_service;
use ufs_dispatcher::WorkerContext;
use ufs_e2e::{register_channels, start, wait_for_refs, wait_until, Gate, LONG};
use ufs_ipc::wire::{ProcessId, ServiceContact};
use ufs_ipc::{RequestServer, Wait};
use ufs_registry::RecordState;

#[test]
fn crash_before_registration_aborts_all_waiters() {
    let gate = Arc::new(Gate::new());
    let launches = Arc::new(AtomicUsize::new(0));
    let (worker_gate, worker_launches) = (Arc::clone(&gate), Arc::clone(&launches));
    let harness = start("crashfs", move |ctx| {
        // The first launch dies before registering; later ones behave.
        if worker_launches.fetch_add(1, Ordering::SeqCst) == 0 {
            worker_gate.pass();
            panic!("worker crashed before registering");
        }
        register_channels(&ctx, 1, |contact| contact);
    });

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let slot = Arc::clone(&harness.slot);
            thread::spawn(move || {
                let proxy = slot.acquire().unwrap();
                proxy.register_file_system("svc").map(|handle| handle.channel_count())
            })
        })
        .collect();
    assert!(wait_for_refs(&harness, "svc", 3));
    let record = harness.dispatcher.table().get("svc").unwrap();
    gate.open();

    for waiter in waiters {
        assert_eq!(waiter.join().unwrap(), Err(Error::Aborted));
    }
    assert_eq!(record.state(), RecordState::Failed);
    assert_eq!(record.error(), Some(Error::Aborted));
    // Every waiter released its reference, so the failed record is gone.
    assert!(harness.dispatcher.table().get("svc").is_none());

    // The next request launches a fresh worker.
    let proxy = harness.slot.acquire().unwrap();
    assert_eq!(proxy.register_file_system("svc").unwrap().channel_count(), 1);
    assert_eq!(harness.supervisor.spawn_count(), 2);
    let fresh = harness.dispatcher.table().get("svc").unwrap();
    assert!(!Arc::ptr_eq(&fresh, &record));
    assert_eq!(fresh.state(), RecordState::Ready);
}

#[test]
fn worker_returning_without_registering_is_aborted() {
    let harness = start("quitfs", |_ctx| {});
    let proxy = harness.slot.acquire().unwrap();
    assert_eq!(proxy.register_file_system("svc").unwrap_err(), Error::Aborted);
    assert!(harness.dispatcher.table().is_empty());
}

#[test]
fn exit_after_registration_keeps_record_ready() {
    let harness = start("exitfs", |ctx| register_channels(&ctx, 1, |contact| contact));
    let proxy = harness.slot.acquire().unwrap();
    proxy.register_file_system("svc").unwrap();
    assert!(wait_until(|| harness.supervisor.live_count() == 0));
    let record = harness.dispatcher.table().get("svc").unwrap();
    assert_eq!(record.state(), RecordState::Ready);
    assert!(proxy.register_file_system("svc").is_ok());
    assert_eq!(harness.supervisor.spawn_count(), 1);
}

#[test]
fn ready_survives_zero_references() {
    let harness = start("keepfs", |ctx| register_channels(&ctx, 1, |contact| contact));
    let proxy = harness.slot.acquire().unwrap();

    let handle = proxy.register_file_system("svc").unwrap();
    let channels = handle.channels().to_vec();
    assert!(proxy.unregister_file_system(handle));
    assert_eq!(proxy.reference_count("svc"), 0);

    let again = proxy.register_file_system("svc").unwrap();
    assert_eq!(again.channels(), channels.as_slice());
    assert_eq!(proxy.reference_count("svc"), 1);
    assert_eq!(harness.supervisor.spawn_count(), 1);
}

#[test]
fn self_registered_record_is_reused_at_zero_references() {
    let harness = start("selffs", |ctx| register_channels(&ctx, 1, |contact| contact));
    let server = RequestServer::create(&harness.namespace, 256).unwrap();
    let ctx = WorkerContext {
        pid: ProcessId::from_raw(9000),
        args: Vec::new(),
        namespace: Arc::clone(&harness.namespace),
        product: "selffs".into(),
    };
    let contact = ServiceContact::new(vec![server.descriptor()]);
    register_service(&ctx, "external", contact.clone(), Wait::Timeout(LONG)).unwrap();
    let record = harness.dispatcher.table().get("external").unwrap();
    assert_eq!((record.state(), record.ref_count()), (RecordState::Ready, 0));

    let proxy = harness.slot.acquire().unwrap();
    let handle = proxy.register_file_system("external").unwrap();
    assert_eq!(handle.channels(), &[server.descriptor()]);
    assert_eq!(harness.supervisor.spawn_count(), 0);

    // Another process claiming the same name is refused.
    let intruder = WorkerContext { pid: ProcessId::from_raw(9001), ..ctx.clone() };
    let err = register_service(&intruder, "external", contact, Wait::Timeout(LONG));
    assert_eq!(err.unwrap_err(), Error::Denied);
}
