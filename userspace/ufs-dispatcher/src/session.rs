// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-client request loop: resolves "connect to filesystem X", launching a worker on a miss.
//!
//! Several threads serve one session. Waiting for a worker only parks the thread handling that
//! request; registrations arrive on the control thread.

use std::sync::Arc;

use ufs_ipc::wire::{self, ConnectReply, ConnectRequest, ServiceContact};
use ufs_ipc::{Incoming, IpcError, RequestServer, Wait};
use ufs_registry::{Error, Lookup, Result, ServiceRecord};

use crate::dispatcher::Shared;
use crate::supervisor::{ExitNotifier, SpawnRequest};

pub(crate) fn serve(shared: &Arc<Shared>, server: &RequestServer) {
    let poll = Wait::Timeout(shared.config.poll_interval());
    loop {
        let request = match server.receive(poll) {
            Ok(request) => request,
            Err(IpcError::Timeout) | Err(IpcError::WouldBlock) => {
                if shared.shutdown.is_cancelled() {
                    break;
                }
                continue;
            }
            Err(IpcError::BadFrame) => {
                log::warn!(target: "ufsd::session", "dropping request without header");
                continue;
            }
            Err(_) => break,
        };
        if request.code == wire::UFS_DISCONNECT_REQUEST {
            let port = server.descriptor().request;
            log::debug!(target: "ufsd::session", "client disconnected from {port}");
            server.close();
            break;
        }
        handle(shared, server, request);
    }
}

fn handle(shared: &Arc<Shared>, server: &RequestServer, request: Incoming) {
    let reply = match request.code {
        wire::FS_CONNECT_REQUEST => match ConnectRequest::decode(&request.body) {
            Ok(body) => match connect(shared, &body.name) {
                Ok(contact) => ConnectReply::ok(contact),
                Err(err) => ConnectReply::failed(err.to_status()),
            },
            Err(err) => {
                log::warn!(target: "ufsd::session", "malformed connect request: {err}");
                ConnectReply::failed(wire::STATUS_BAD_DATA)
            }
        },
        other => {
            log::warn!(target: "ufsd::session", "unknown request code {other}");
            ConnectReply::failed(wire::STATUS_BAD_DATA)
        }
    };
    if let Err(err) = server.reply(request.nonce, wire::FS_CONNECT_REPLY, &reply.encode()) {
        log::debug!(target: "ufsd::session", "reply not delivered: {err}");
    }
}

/// Resolves `name` to a ready contact. On success the caller keeps the reference it took.
pub(crate) fn connect(shared: &Shared, name: &str) -> Result<ServiceContact> {
    if name.is_empty() {
        return Err(Error::BadData);
    }
    let lookup = shared.table.acquire(name);
    let record = Arc::clone(lookup.record());
    if let Lookup::Created(_) = lookup {
        log::info!(target: "ufsd::session", "launching worker for {name}");
        if let Err(err) = launch(shared, &record) {
            log::warn!(target: "ufsd::session", "failed to launch worker for {name}: {err}");
            shared.table.fail(&record, err);
        }
    }
    match record.wait_ready(Wait::Blocking, Some(&shared.shutdown)) {
        Ok(contact) => Ok(contact),
        Err(err) => {
            shared.table.remove_reference(&record);
            Err(err)
        }
    }
}

fn launch(shared: &Shared, record: &ServiceRecord) -> Result<()> {
    let request = SpawnRequest {
        executable: shared.config.server_path.clone(),
        args: vec![record.name().to_string()],
    };
    let pid = shared.supervisor.spawn(request)?;
    shared.table.begin_init(record, pid)?;
    let control = shared.control.clone();
    let notifier = ExitNotifier::new(move |pid| {
        // The dispatcher may already be gone; nobody is left to care.
        let _ = control.send(wire::WORKER_EXITED, &wire::encode_worker_exited(pid));
    });
    shared.supervisor.watch_exit(pid, notifier)?;
    shared.supervisor.resume(pid)?;
    Ok(())
}
