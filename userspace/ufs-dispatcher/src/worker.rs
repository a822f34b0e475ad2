// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Worker-side helpers: registering with the dispatcher, plus the built-in null server.

use std::time::Duration;

use ufs_ipc::wire::{self, RegisterService, ServiceContact, WellKnownNames};
use ufs_ipc::{IpcError, Port, RequestServer, Wait};
use ufs_registry::{Error, Result};

use crate::supervisor::WorkerContext;

const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);
const NULL_SERVER_CAPACITY: u32 = 4096;

/// Registers `contact` for `name` with the dispatcher and returns its verdict.
///
/// A worker spawned by the dispatcher completes the pending record owned by its pid. Any other
/// caller self-registers, which is [`Error::Denied`] when the name is already known.
pub fn register_service(
    ctx: &WorkerContext,
    name: &str,
    contact: ServiceContact,
    wait: Wait,
) -> Result<()> {
    let names = WellKnownNames::for_product(&ctx.product);
    let control = ctx.namespace.lookup(&names.control)?;
    let reply = ctx.namespace.create(None, 16)?;
    let result = exchange(ctx, &control, &reply, name, contact, wait);
    let _ = ctx.namespace.delete(reply.id());
    result
}

fn exchange(
    ctx: &WorkerContext,
    control: &Port,
    reply: &Port,
    name: &str,
    contact: ServiceContact,
    wait: Wait,
) -> Result<()> {
    let request =
        RegisterService { reply_port: reply.id(), pid: ctx.pid, name: name.to_string(), contact };
    control.send(wire::REGISTER_SERVICE, &request.encode()?)?;
    let verdict = reply.receive(wait)?;
    if verdict.code != wire::REGISTER_SERVICE_REPLY {
        return Err(Error::BadData);
    }
    Error::check_status(wire::decode_status(&verdict.payload)?)
}

/// Minimal filesystem server: publishes one request channel, registers it and acknowledges
/// every request with an empty reply until the channel closes.
pub fn null_server(ctx: WorkerContext) {
    let Some(name) = ctx.fs_name().map(str::to_string) else {
        log::warn!(target: "ufsd::worker", "{} started without a filesystem name", ctx.pid);
        return;
    };
    let server = match RequestServer::create(&ctx.namespace, NULL_SERVER_CAPACITY) {
        Ok(server) => server,
        Err(err) => {
            log::warn!(target: "ufsd::worker", "{name}: cannot open request channel: {err}");
            return;
        }
    };
    let contact = ServiceContact::new(vec![server.descriptor()]);
    if let Err(err) = register_service(&ctx, &name, contact, Wait::Timeout(REGISTER_TIMEOUT)) {
        log::warn!(target: "ufsd::worker", "{name}: registration failed: {err}");
        server.close();
        return;
    }
    loop {
        match server.receive(Wait::Blocking) {
            Ok(request) => {
                if let Err(err) = server.reply(request.nonce, request.code, &[]) {
                    log::debug!(target: "ufsd::worker", "{name}: reply lost: {err}");
                }
            }
            Err(IpcError::BadFrame) => continue,
            Err(_) => break,
        }
    }
}
