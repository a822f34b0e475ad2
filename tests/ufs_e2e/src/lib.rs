// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for the userlandfs end-to-end tests: an isolated namespace with a running
//! dispatcher, a thread supervisor with one scripted worker entry, and a client slot.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use ufs_client::{ClientOptions, ProxySlot};
use ufs_dispatcher::worker::register_service;
use ufs_dispatcher::{
    Dispatcher, DispatcherConfig, DispatcherHandle, ThreadSupervisor, WorkerContext,
};
use ufs_ipc::wire::ServiceContact;
use ufs_ipc::{PortNamespace, RequestServer, Wait};

/// Executable path the fixtures install their worker entry at.
pub const SERVER_PATH: &str = "/system/servers/test_server";

/// Generous upper bound for anything a test waits on.
pub const LONG: Duration = Duration::from_secs(10);

/// Running dispatcher plus everything needed to talk to it.
pub struct Harness {
    /// Isolated namespace of this test.
    pub namespace: Arc<PortNamespace>,
    /// Supervisor the dispatcher launches workers through.
    pub supervisor: Arc<ThreadSupervisor>,
    /// The dispatcher.
    pub dispatcher: DispatcherHandle,
    /// Client slot connected to `namespace`.
    pub slot: Arc<ProxySlot>,
}

/// Dispatcher settings used by the fixtures.
pub fn config(product: &str) -> DispatcherConfig {
    DispatcherConfig {
        product: product.to_string(),
        server_path: SERVER_PATH.to_string(),
        request_workers: 4,
        handshake_poll_ms: 5,
        ..DispatcherConfig::default()
    }
}

/// Client settings used by the fixtures.
pub fn client_options(product: &str) -> ClientOptions {
    ClientOptions {
        product: product.to_string(),
        handshake_wait: Wait::Timeout(LONG),
        connect_wait: Wait::Timeout(LONG),
    }
}

/// Starts a dispatcher for `product` whose workers run `entry`.
pub fn start<F>(product: &str, entry: F) -> Harness
where
    F: Fn(WorkerContext) + Send + Sync + 'static,
{
    let namespace = Arc::new(PortNamespace::new());
    let supervisor = Arc::new(
        ThreadSupervisor::new(Arc::clone(&namespace), product).with_entry(SERVER_PATH, entry),
    );
    let dispatcher = Dispatcher::start(Arc::clone(&namespace), config(product), supervisor.clone())
        .expect("dispatcher starts");
    let slot = ProxySlot::new(Arc::clone(&namespace), client_options(product));
    Harness { namespace, supervisor, dispatcher, slot }
}

/// Worker body: opens `channels` request channels and registers them under the name it was
/// launched for. Returns once the dispatcher has answered.
pub fn register_channels(
    ctx: &WorkerContext,
    channels: usize,
    contact: impl FnOnce(ServiceContact) -> ServiceContact,
) {
    let name = ctx.fs_name().expect("worker launched with a name").to_string();
    let mut descriptors = Vec::with_capacity(channels);
    for _ in 0..channels {
        let server = RequestServer::create(&ctx.namespace, 1024).expect("worker channel");
        descriptors.push(server.descriptor());
    }
    register_service(ctx, &name, contact(ServiceContact::new(descriptors)), Wait::Timeout(LONG))
        .expect("registration accepted");
}

/// One-shot latch a worker can be held on.
pub struct Gate {
    open: Mutex<Option<Sender<()>>>,
    wait: Receiver<()>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Creates a closed gate.
    pub fn new() -> Self {
        let (open, wait) = crossbeam_channel::bounded(0);
        Self { open: Mutex::new(Some(open)), wait }
    }

    /// Blocks until [`Gate::open`] is called.
    pub fn pass(&self) {
        let _ = self.wait.recv();
    }

    /// Releases every current and future [`Gate::pass`].
    pub fn open(&self) {
        self.open.lock().take();
    }
}

/// Polls `condition` until it holds or [`LONG`] elapses.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + LONG;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Waits until the dispatcher's record for `name` holds `refs` references.
pub fn wait_for_refs(harness: &Harness, name: &str, refs: u32) -> bool {
    wait_until(|| {
        harness.dispatcher.table().get(name).map_or(false, |record| record.ref_count() == refs)
    })
}
