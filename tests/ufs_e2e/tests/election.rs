//! CONTEXT: dispatcher singleton election
//! INTENT: Only one dispatcher per product can own the discovery key
//! TESTS: concurrent starts elect exactly one; a product restart after shutdown succeeds
// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Barrier};
use std::thread;

use ufs_dispatcher::{Dispatcher, DispatcherError, ThreadSupervisor};
use ufs_e2e::config;
use ufs_ipc::PortNamespace;

#[test]
fn concurrent_starts_elect_one_dispatcher() {
    let namespace = Arc::new(PortNamespace::new());
    let barrier = Arc::new(Barrier::new(8));
    let contenders: Vec<_> = (0..8)
        .map(|_| {
            let namespace = Arc::clone(&namespace);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let supervisor = Arc::new(ThreadSupervisor::new(Arc::clone(&namespace), "electfs"));
                barrier.wait();
                Dispatcher::start(namespace, config("electfs"), supervisor)
            })
        })
        .collect();
    let outcomes: Vec<_> = contenders.into_iter().map(|h| h.join().unwrap()).collect();

    let winners: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    let owner = winners[0].descriptor();
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(
                matches!(err, DispatcherError::AlreadyRunning(d) if *d == owner),
                "unexpected {err}"
            );
        }
    }
    assert_eq!(namespace.discovery().owner("electfs.dispatcher"), Some(owner));
}

#[test]
fn other_products_elect_independently() {
    let namespace = Arc::new(PortNamespace::new());
    let a = Dispatcher::start(
        Arc::clone(&namespace),
        config("alphafs"),
        Arc::new(ThreadSupervisor::new(Arc::clone(&namespace), "alphafs")),
    )
    .unwrap();
    let b = Dispatcher::start(
        Arc::clone(&namespace),
        config("betafs"),
        Arc::new(ThreadSupervisor::new(Arc::clone(&namespace), "betafs")),
    )
    .unwrap();
    assert_ne!(a.descriptor(), b.descriptor());
    a.shutdown();
    let again = Dispatcher::start(
        Arc::clone(&namespace),
        config("alphafs"),
        Arc::new(ThreadSupervisor::new(Arc::clone(&namespace), "alphafs")),
    );
    assert!(again.is_ok());
}
