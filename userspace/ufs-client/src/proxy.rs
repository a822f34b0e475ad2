// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Connected proxy: discovery handshake, connect RPC and the local handle table.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use ufs_ipc::budget::{self, CancelToken, DEFAULT_SLICE};
use ufs_ipc::wire::{self, ChannelDescriptor, ConnectReply, ConnectRequest, WellKnownNames};
use ufs_ipc::{Port, PortNamespace, RequestClient, Wait};
use ufs_registry::{Error, Result, ServiceTable};

use crate::file_system::FileSystemHandle;

/// Acks on the shared reply port carry no caller identity, so at most one handshake per
/// process is in flight. Anything queued before ours was sent belongs to an abandoned one.
static HANDSHAKE: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Caller-side settings of the proxy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    /// Product prefix of the dispatcher's well-known ports.
    pub product: String,
    /// How long the handshake waits for CONNECT_ACK.
    pub handshake_wait: Wait,
    /// Default wait of [`UserlandFs::register_file_system`].
    pub connect_wait: Wait,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            product: "userlandfs".to_string(),
            handshake_wait: Wait::Timeout(Duration::from_secs(5)),
            connect_wait: Wait::Blocking,
        }
    }
}

/// Proxy connected to one dispatcher session.
pub struct UserlandFs {
    options: ClientOptions,
    session: RequestClient,
    table: ServiceTable,
}

impl fmt::Debug for UserlandFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserlandFs")
            .field("product", &self.options.product)
            .field("session", &self.session.descriptor())
            .finish()
    }
}

impl UserlandFs {
    /// Performs the discovery handshake and opens the session channel it returns.
    pub fn connect(
        namespace: &Arc<PortNamespace>,
        options: ClientOptions,
        cancel: Option<&CancelToken>,
    ) -> Result<Self> {
        let names = WellKnownNames::for_product(&options.product);
        let connect = namespace.lookup(&names.connect).map_err(|_| Error::NotFound)?;
        let connect_reply =
            namespace.lookup(&names.connect_reply).map_err(|_| Error::NotFound)?;
        let _handshake = HANDSHAKE.lock();
        discard_stale_acks(namespace, &connect_reply);
        connect.send(wire::CONNECT, &[])?;
        let ack = budget::run_sliced(options.handshake_wait, cancel, DEFAULT_SLICE, |step| {
            connect_reply.receive(step)
        })?;
        let descriptor = wire::decode_connect_ack(ack.code, &ack.payload).map_err(|err| {
            log::warn!(target: "ufs-client", "bad CONNECT_ACK from {}: {err}", names.connect);
            Error::BadData
        })?;
        let session = RequestClient::open(namespace, descriptor)?;
        log::debug!(
            target: "ufs-client",
            "connected to {} via {}",
            names.connect,
            descriptor.request
        );
        Ok(Self { options, session, table: ServiceTable::new() })
    }

    /// Session channel obtained from the handshake.
    pub fn session(&self) -> ChannelDescriptor {
        self.session.descriptor()
    }

    /// Connects to the filesystem `name`, launching its server if needed.
    pub fn register_file_system(&self, name: &str) -> Result<FileSystemHandle> {
        self.register_file_system_with(name, self.options.connect_wait, None)
    }

    /// [`Self::register_file_system`] with an explicit wait and cancellation token.
    ///
    /// Giving up the wait does not cancel the launch; other callers still receive its outcome.
    pub fn register_file_system_with(
        &self,
        name: &str,
        wait: Wait,
        cancel: Option<&CancelToken>,
    ) -> Result<FileSystemHandle> {
        let body = ConnectRequest { name: name.to_string() }.encode()?;
        let reply = self.session.call(wire::FS_CONNECT_REQUEST, &body, wait, cancel)?;
        if reply.code != wire::FS_CONNECT_REPLY {
            return Err(Error::BadData);
        }
        let reply = ConnectReply::decode(&reply.payload)?;
        Error::check_status(reply.status)?;
        if reply.contact.channels.is_empty() {
            return Err(Error::BadData);
        }
        let record = self.table.acquire_ready(name, reply.contact.clone());
        Ok(FileSystemHandle { record, contact: reply.contact })
    }

    /// Gives a handle back. Returns `true` when it was the last local reference to that
    /// filesystem. The dispatcher is not told.
    pub fn unregister_file_system(&self, handle: FileSystemHandle) -> bool {
        self.table.remove_reference(&handle.record)
    }

    /// Local references held on `name`.
    pub fn reference_count(&self, name: &str) -> u32 {
        self.table.get(name).map_or(0, |record| record.ref_count())
    }

    /// Ends the dispatcher session.
    pub(crate) fn disconnect(&self) {
        if let Err(err) = self.session.post(wire::UFS_DISCONNECT_REQUEST, &[]) {
            log::debug!(target: "ufs-client", "disconnect not delivered: {err}");
        }
    }
}

/// Ends the sessions behind acks left over from handshakes that gave up waiting.
fn discard_stale_acks(namespace: &PortNamespace, connect_reply: &Port) {
    while let Ok(stale) = connect_reply.receive(Wait::NonBlocking) {
        let Ok(descriptor) = wire::decode_connect_ack(stale.code, &stale.payload) else {
            log::debug!(target: "ufs-client", "dropping stray discovery reply {:#x}", stale.code);
            continue;
        };
        let posted = RequestClient::open(namespace, descriptor)
            .and_then(|session| session.post(wire::UFS_DISCONNECT_REQUEST, &[]));
        match posted {
            Ok(()) => {
                log::debug!(target: "ufs-client", "ended stale session {}", descriptor.request)
            }
            Err(err) => {
                log::debug!(target: "ufs-client", "stale session {}: {err}", descriptor.request)
            }
        }
    }
}
