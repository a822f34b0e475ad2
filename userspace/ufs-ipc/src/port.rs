// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: In-process port namespace emulating kernel ports for the broker
//!
//! OWNERS: @runtime
//!
//! PUBLIC API:
//!   - PortNamespace::global(): process-wide namespace
//!   - PortNamespace::create/lookup/get/delete: port lifecycle by name or id
//!   - Port::send/receive: `(code, payload)` messages honouring `Wait`
//!
//! ERROR CONDITIONS:
//!   - IpcError::NotFound: no port under that name / id
//!   - IpcError::AlreadyExists: name collision on create or publish
//!   - IpcError::TooLarge: payload above the port capacity
//!   - IpcError::Disconnected: port closed (after queued messages drained)
//!   - IpcError::WouldBlock / Timeout: nothing queued within the wait

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::registry::DiscoveryRegistry;
use crate::{IpcError, Result, Wait};

/// Default maximum payload size accepted by a port.
pub const DEFAULT_PORT_CAPACITY: usize = 64 * 1024;

static GLOBAL: Lazy<Arc<PortNamespace>> = Lazy::new(|| Arc::new(PortNamespace::new()));

/// Numeric port identifier, unique within a namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId(u32);

impl PortId {
    /// Wraps a raw id (as decoded from the wire).
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// A single message: a 32-bit code plus an opaque payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Message code (opcode or request type).
    pub code: i32,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a message from its parts.
    pub fn new(code: i32, payload: impl Into<Vec<u8>>) -> Self {
        Self { code, payload: payload.into() }
    }
}

struct PortShared {
    id: PortId,
    name: Mutex<Option<String>>,
    capacity: usize,
    sender: Mutex<Option<Sender<Message>>>,
    receiver: Receiver<Message>,
}

/// Handle to a port. Clones refer to the same queue.
#[derive(Clone)]
pub struct Port {
    shared: Arc<PortShared>,
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.shared.id)
            .field("name", &*self.shared.name.lock())
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

impl Port {
    fn new(id: PortId, name: Option<String>, capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            shared: Arc::new(PortShared {
                id,
                name: Mutex::new(name),
                capacity,
                sender: Mutex::new(Some(sender)),
                receiver,
            }),
        }
    }

    /// Identifier of this port.
    pub fn id(&self) -> PortId {
        self.shared.id
    }

    /// Published name, if any.
    pub fn name(&self) -> Option<String> {
        self.shared.name.lock().clone()
    }

    /// Maximum payload size in bytes.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Returns `true` once the port was closed.
    pub fn is_closed(&self) -> bool {
        self.shared.sender.lock().is_none()
    }

    /// Queues a message. Sending never blocks; the queue is unbounded.
    pub fn send(&self, code: i32, payload: &[u8]) -> Result<()> {
        if payload.len() > self.shared.capacity {
            return Err(IpcError::TooLarge);
        }
        let sender = self.shared.sender.lock().clone().ok_or(IpcError::Disconnected)?;
        sender.send(Message::new(code, payload)).map_err(|_| IpcError::Disconnected)
    }

    /// Receives the next message according to `wait`.
    pub fn receive(&self, wait: Wait) -> Result<Message> {
        let receiver = &self.shared.receiver;
        let closed =
            || if self.is_closed() { IpcError::Disconnected } else { IpcError::WouldBlock };
        match wait {
            Wait::Blocking => receiver.recv().map_err(|_| IpcError::Disconnected),
            Wait::NonBlocking => receiver.try_recv().map_err(|err| match err {
                TryRecvError::Empty => closed(),
                TryRecvError::Disconnected => IpcError::Disconnected,
            }),
            Wait::Timeout(timeout) => {
                if timeout.is_zero() {
                    return receiver.try_recv().map_err(|err| match err {
                        TryRecvError::Empty => closed(),
                        TryRecvError::Disconnected => IpcError::Disconnected,
                    });
                }
                receiver.recv_timeout(timeout).map_err(|err| match err {
                    RecvTimeoutError::Timeout => IpcError::Timeout,
                    RecvTimeoutError::Disconnected => IpcError::Disconnected,
                })
            }
        }
    }

    /// Closes the port. Queued messages can still be drained; afterwards receivers observe
    /// [`IpcError::Disconnected`] and senders fail immediately.
    pub fn close(&self) {
        self.shared.sender.lock().take();
    }
}

#[derive(Default)]
struct NamespaceInner {
    by_id: HashMap<PortId, Port>,
    by_name: HashMap<String, PortId>,
}

/// A set of ports addressable by id and optionally by name, plus the discovery registry that
/// lives alongside them.
pub struct PortNamespace {
    inner: RwLock<NamespaceInner>,
    next_id: AtomicU32,
    discovery: DiscoveryRegistry,
}

impl Default for PortNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl PortNamespace {
    /// Creates an empty, isolated namespace.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(NamespaceInner::default()),
            next_id: AtomicU32::new(1),
            discovery: DiscoveryRegistry::new(),
        }
    }

    /// Process-wide namespace shared by every component that does not bring its own.
    pub fn global() -> Arc<PortNamespace> {
        Arc::clone(&GLOBAL)
    }

    /// Discovery registry attached to this namespace.
    pub fn discovery(&self) -> &DiscoveryRegistry {
        &self.discovery
    }

    /// Creates a port, publishing it under `name` when given.
    pub fn create(&self, name: Option<&str>, capacity: usize) -> Result<Port> {
        let mut inner = self.inner.write();
        if let Some(name) = name {
            if inner.by_name.contains_key(name) {
                return Err(IpcError::AlreadyExists);
            }
        }
        let id = PortId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let port = Port::new(id, name.map(str::to_string), capacity);
        if let Some(name) = name {
            inner.by_name.insert(name.to_string(), id);
        }
        inner.by_id.insert(id, port.clone());
        log::trace!(target: "ufs-ipc", "create {id} name={name:?}");
        Ok(port)
    }

    /// Publishes an existing anonymous port under `name`.
    pub fn publish(&self, id: PortId, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(name) {
            return Err(IpcError::AlreadyExists);
        }
        let port = inner.by_id.get(&id).ok_or(IpcError::NotFound)?;
        *port.shared.name.lock() = Some(name.to_string());
        inner.by_name.insert(name.to_string(), id);
        Ok(())
    }

    /// Finds a port by its published name.
    pub fn lookup(&self, name: &str) -> Result<Port> {
        let inner = self.inner.read();
        let id = inner.by_name.get(name).ok_or(IpcError::NotFound)?;
        inner.by_id.get(id).cloned().ok_or(IpcError::NotFound)
    }

    /// Finds a port by id.
    pub fn get(&self, id: PortId) -> Result<Port> {
        self.inner.read().by_id.get(&id).cloned().ok_or(IpcError::NotFound)
    }

    /// Closes the port and removes it (and its name) from the namespace.
    pub fn delete(&self, id: PortId) -> Result<()> {
        let port = {
            let mut inner = self.inner.write();
            let port = inner.by_id.remove(&id).ok_or(IpcError::NotFound)?;
            if let Some(name) = port.name() {
                if inner.by_name.get(&name) == Some(&id) {
                    inner.by_name.remove(&name);
                }
            }
            port
        };
        port.close();
        log::trace!(target: "ufs-ipc", "delete {id}");
        Ok(())
    }

    /// Number of live ports, mostly useful for leak checks in tests.
    pub fn port_count(&self) -> usize {
        self.inner.read().by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn lookup_by_name_and_id() {
        let ns = PortNamespace::new();
        let port = ns.create(Some("svc.requests"), 16).unwrap();
        assert_eq!(ns.lookup("svc.requests").unwrap().id(), port.id());
        assert_eq!(ns.get(port.id()).unwrap().name().as_deref(), Some("svc.requests"));
        assert_eq!(ns.lookup("missing").unwrap_err(), IpcError::NotFound);
    }

    #[test]
    fn duplicate_name_rejected() {
        let ns = PortNamespace::new();
        ns.create(Some("dup"), 16).unwrap();
        assert_eq!(ns.create(Some("dup"), 16).unwrap_err(), IpcError::AlreadyExists);
    }

    #[test]
    fn send_receive_preserves_code_and_payload() {
        let ns = PortNamespace::new();
        let port = ns.create(None, 16).unwrap();
        port.send(7, b"abc").unwrap();
        let msg = port.receive(Wait::Blocking).unwrap();
        assert_eq!(msg, Message::new(7, b"abc".to_vec()));
    }

    #[test]
    fn oversized_payload_rejected() {
        let ns = PortNamespace::new();
        let port = ns.create(None, 2).unwrap();
        assert_eq!(port.send(1, b"abc").unwrap_err(), IpcError::TooLarge);
    }

    #[test]
    fn receive_timeout_and_non_blocking() {
        let ns = PortNamespace::new();
        let port = ns.create(None, 16).unwrap();
        assert_eq!(port.receive(Wait::NonBlocking).unwrap_err(), IpcError::WouldBlock);
        assert_eq!(
            port.receive(Wait::Timeout(Duration::from_millis(5))).unwrap_err(),
            IpcError::Timeout
        );
    }

    #[test]
    fn delete_drains_then_disconnects() {
        let ns = PortNamespace::new();
        let port = ns.create(Some("gone"), 16).unwrap();
        port.send(1, b"x").unwrap();
        ns.delete(port.id()).unwrap();
        assert_eq!(ns.lookup("gone").unwrap_err(), IpcError::NotFound);
        assert_eq!(port.receive(Wait::Blocking).unwrap().code, 1);
        assert_eq!(port.receive(Wait::Blocking).unwrap_err(), IpcError::Disconnected);
        assert_eq!(port.send(2, b"y").unwrap_err(), IpcError::Disconnected);
    }

    #[test]
    fn close_wakes_blocked_receiver() {
        let ns = PortNamespace::new();
        let port = ns.create(None, 16).unwrap();
        let reader = port.clone();
        let handle = std::thread::spawn(move || reader.receive(Wait::Blocking));
        std::thread::sleep(Duration::from_millis(10));
        port.close();
        assert_eq!(handle.join().unwrap().unwrap_err(), IpcError::Disconnected);
    }

    #[test]
    fn publish_names_anonymous_port() {
        let ns = PortNamespace::new();
        let port = ns.create(None, 16).unwrap();
        ns.publish(port.id(), "late").unwrap();
        assert_eq!(ns.lookup("late").unwrap().id(), port.id());
        let other = ns.create(None, 16).unwrap();
        assert_eq!(ns.publish(other.id(), "late").unwrap_err(), IpcError::AlreadyExists);
    }
}
