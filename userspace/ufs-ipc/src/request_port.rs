// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Request/reply channels over a port pair with nonce correlation.
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit-tested (host)
//!
//! Every frame on either port starts with an 8-byte little-endian nonce. The server echoes the
//! request nonce on its reply. Several threads may call through one [`RequestClient`]: at most
//! one of them reads the reply port at a time, and replies it picks up for someone else go into
//! a bounded stash (oldest evicted, drops counted) where their owner finds them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::budget::{self, CancelToken, DEFAULT_SLICE};
use crate::wire::ChannelDescriptor;
use crate::{IpcError, Message, Port, PortNamespace, Result, Wait};

const NONCE_LEN: usize = 8;
const STASH_CAPACITY: usize = 32;

/// A request received by the server side, nonce already split off.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Incoming {
    /// Correlation nonce to echo on the reply.
    pub nonce: u64,
    /// Request code.
    pub code: i32,
    /// Request body.
    pub body: Vec<u8>,
}

fn frame(nonce: u64, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(NONCE_LEN + body.len());
    out.extend_from_slice(&nonce.to_le_bytes());
    out.extend_from_slice(body);
    out
}

fn split(message: Message) -> Result<(u64, Message)> {
    if message.payload.len() < NONCE_LEN {
        return Err(IpcError::BadFrame);
    }
    let mut raw = [0u8; NONCE_LEN];
    raw.copy_from_slice(&message.payload[..NONCE_LEN]);
    let body = message.payload[NONCE_LEN..].to_vec();
    Ok((u64::from_le_bytes(raw), Message::new(message.code, body)))
}

/// Owner side of a request channel: receives requests, sends replies.
pub struct RequestServer {
    namespace: Arc<PortNamespace>,
    request: Port,
    reply: Port,
    capacity: u32,
}

impl RequestServer {
    /// Creates both (anonymous) ports in `namespace`. `capacity` bounds request and reply bodies.
    pub fn create(namespace: &Arc<PortNamespace>, capacity: u32) -> Result<Self> {
        let port_capacity = capacity as usize + NONCE_LEN;
        let request = namespace.create(None, port_capacity)?;
        let reply = match namespace.create(None, port_capacity) {
            Ok(port) => port,
            Err(err) => {
                let _ = namespace.delete(request.id());
                return Err(err);
            }
        };
        Ok(Self { namespace: Arc::clone(namespace), request, reply, capacity })
    }

    /// Descriptor handed to clients so they can [`RequestClient::open`] this channel.
    pub fn descriptor(&self) -> ChannelDescriptor {
        ChannelDescriptor::new(self.request.id(), self.reply.id(), self.capacity)
    }

    /// Receives the next request.
    pub fn receive(&self, wait: Wait) -> Result<Incoming> {
        let (nonce, message) = split(self.request.receive(wait)?)?;
        Ok(Incoming { nonce, code: message.code, body: message.payload })
    }

    /// Sends the reply for the request carrying `nonce`.
    pub fn reply(&self, nonce: u64, code: i32, body: &[u8]) -> Result<()> {
        self.reply.send(code, &frame(nonce, body))
    }

    /// Deletes both ports; blocked receivers wake with [`IpcError::Disconnected`].
    pub fn close(&self) {
        let _ = self.namespace.delete(self.request.id());
        let _ = self.namespace.delete(self.reply.id());
    }

    /// Returns `true` once the request port is closed.
    pub fn is_closed(&self) -> bool {
        self.request.is_closed()
    }
}

struct ReplyStash {
    entries: VecDeque<(u64, Message)>,
    drops: u64,
}

impl ReplyStash {
    fn new() -> Self {
        Self { entries: VecDeque::with_capacity(STASH_CAPACITY), drops: 0 }
    }

    fn push(&mut self, nonce: u64, message: Message) {
        if self.entries.len() >= STASH_CAPACITY {
            self.entries.pop_front();
            self.drops = self.drops.saturating_add(1);
        }
        self.entries.push_back((nonce, message));
    }

    fn take(&mut self, nonce: u64) -> Option<Message> {
        let idx = self.entries.iter().position(|(n, _)| *n == nonce)?;
        self.entries.remove(idx).map(|(_, message)| message)
    }
}

/// Caller side of a request channel.
pub struct RequestClient {
    descriptor: ChannelDescriptor,
    request: Port,
    reply: Port,
    next_nonce: AtomicU64,
    reader: Mutex<()>,
    stash: Mutex<ReplyStash>,
    stash_changed: Condvar,
}

impl RequestClient {
    /// Opens the channel described by `descriptor`.
    pub fn open(namespace: &PortNamespace, descriptor: ChannelDescriptor) -> Result<Self> {
        let request = namespace.get(descriptor.request)?;
        let reply = namespace.get(descriptor.reply)?;
        Ok(Self {
            descriptor,
            request,
            reply,
            next_nonce: AtomicU64::new(1),
            reader: Mutex::new(()),
            stash: Mutex::new(ReplyStash::new()),
            stash_changed: Condvar::new(),
        })
    }

    /// Descriptor this client was opened with.
    pub fn descriptor(&self) -> ChannelDescriptor {
        self.descriptor
    }

    /// Replies dropped from the stash because nobody claimed them in time.
    pub fn stash_drops(&self) -> u64 {
        self.stash.lock().drops
    }

    /// Sends a request without waiting for a reply.
    pub fn post(&self, code: i32, body: &[u8]) -> Result<()> {
        let nonce = self.next_nonce.fetch_add(1, Ordering::Relaxed);
        self.request.send(code, &frame(nonce, body))
    }

    /// Sends a request and waits for its reply.
    ///
    /// Cancellation or timeout only abandons this caller's wait; a reply arriving later is
    /// stashed and eventually evicted.
    pub fn call(
        &self,
        code: i32,
        body: &[u8],
        wait: Wait,
        cancel: Option<&CancelToken>,
    ) -> Result<Message> {
        let nonce = self.next_nonce.fetch_add(1, Ordering::Relaxed);
        self.request.send(code, &frame(nonce, body))?;
        budget::run_sliced(wait, cancel, DEFAULT_SLICE, |step| self.poll_reply(nonce, step))
    }

    fn poll_reply(&self, nonce: u64, step: Wait) -> Result<Message> {
        if let Some(_reader) = self.reader.try_lock() {
            if let Some(message) = self.stash.lock().take(nonce) {
                return Ok(message);
            }
            let (got, message) = match split(self.reply.receive(step)?) {
                Ok(parts) => parts,
                Err(err) => {
                    log::warn!(target: "ufs-ipc", "dropping reply without nonce header");
                    return Err(if err == IpcError::BadFrame { IpcError::WouldBlock } else { err });
                }
            };
            let mut stash = self.stash.lock();
            if got == nonce {
                // Hand the reader role to whoever is parked on the stash.
                self.stash_changed.notify_all();
                return Ok(message);
            }
            stash.push(got, message);
            self.stash_changed.notify_all();
            return Err(IpcError::WouldBlock);
        }

        let mut stash = self.stash.lock();
        if let Some(message) = stash.take(nonce) {
            return Ok(message);
        }
        if let Some(timeout) = step.timeout() {
            if !timeout.is_zero() {
                self.stash_changed.wait_for(&mut stash, timeout);
            }
        }
        stash.take(nonce).ok_or(IpcError::WouldBlock)
    }
}
