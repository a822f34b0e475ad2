// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Control loop: worker registrations and worker exits. Never blocks on a record.

use std::sync::Arc;

use ufs_ipc::wire::{self, RegisterService};
use ufs_ipc::{IpcError, Message, Port, Wait};
use ufs_registry::{Error, Registration};

use crate::dispatcher::Shared;

pub(crate) fn serve(shared: &Arc<Shared>, control: &Port) {
    let poll = Wait::Timeout(shared.config.poll_interval());
    loop {
        match control.receive(poll) {
            Ok(message) => dispatch(shared, message),
            Err(IpcError::Timeout) | Err(IpcError::WouldBlock) => {
                if shared.shutdown.is_cancelled() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    log::debug!(target: "ufsd::control", "control loop stopped");
}

fn dispatch(shared: &Shared, message: Message) {
    match message.code {
        wire::REGISTER_SERVICE => register(shared, &message.payload),
        wire::WORKER_EXITED => match wire::decode_worker_exited(&message.payload) {
            Ok(pid) => {
                if let Some(record) = shared.table.fail_by_owner(pid, Error::Aborted) {
                    let name = record.name();
                    log::warn!(target: "ufsd::control", "{pid} exited before registering {name}");
                } else {
                    log::debug!(target: "ufsd::control", "{pid} exited");
                }
            }
            Err(err) => log::warn!(target: "ufsd::control", "malformed exit notification: {err}"),
        },
        other => log::warn!(target: "ufsd::control", "unknown control code {other:#x}"),
    }
}

fn register(shared: &Shared, payload: &[u8]) {
    let request = match RegisterService::decode(payload) {
        Ok(request) => request,
        Err(err) => {
            // Without a decoded reply port there is nobody to answer.
            log::warn!(target: "ufsd::control", "malformed registration: {err}");
            return;
        }
    };
    let status = match shared.table.register(request.pid, &request.name, request.contact) {
        Ok(Registration::Completed(record)) => {
            log::info!(target: "ufsd::control", "{} ready ({})", record.name(), request.pid);
            wire::STATUS_OK
        }
        Ok(Registration::Inserted(record)) => {
            let name = record.name();
            log::info!(target: "ufsd::control", "{name} self-registered ({})", request.pid);
            wire::STATUS_OK
        }
        Err(err) => {
            log::warn!(
                target: "ufsd::control",
                "registration of {} by {} refused: {err}",
                request.name,
                request.pid
            );
            err.to_status()
        }
    };
    let delivered = shared
        .namespace
        .get(request.reply_port)
        .and_then(|port| port.send(wire::REGISTER_SERVICE_REPLY, &wire::encode_status(status)));
    if let Err(err) = delivered {
        let port = request.reply_port;
        log::debug!(target: "ufsd::control", "registration reply to {port} lost: {err}");
    }
}
