// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Singleton dispatcher: election, discovery handshake and lifecycle
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests below + `tests/ufs_e2e`
//!
//! Startup claims the discovery key, publishes the connect, connectReply and control ports, and
//! starts two threads: the handshake loop (one session per CONNECT) and the control loop (worker
//! registrations and exits). Losing the election is fatal for the caller.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use thiserror::Error;
use ufs_ipc::wire::{self, ChannelDescriptor, WellKnownNames};
use ufs_ipc::{CancelToken, Claim, IpcError, Port, PortNamespace, RequestServer, Wait};
use ufs_registry::ServiceTable;

use crate::config::{ConfigError, DispatcherConfig};
use crate::supervisor::ProcessSupervisor;
use crate::{control, session};

/// Failure to start a dispatcher.
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Another dispatcher owns the discovery key.
    #[error("dispatcher already running at {0:?}")]
    AlreadyRunning(ChannelDescriptor),
    /// Creating or publishing a port failed.
    #[error("port setup failed: {0}")]
    Ipc(#[from] IpcError),
    /// The configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Loading the configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A dispatcher thread could not be started.
    #[error("failed to start {name} thread: {source}")]
    Thread {
        /// Thread role.
        name: &'static str,
        /// Reason reported by the thread builder.
        source: std::io::Error,
    },
}

impl From<&DispatcherError> for ufs_registry::Error {
    fn from(err: &DispatcherError) -> Self {
        match err {
            DispatcherError::AlreadyRunning(_) => Self::AlreadyRunning,
            DispatcherError::Ipc(err) => Self::from(*err),
            DispatcherError::InvalidConfig(_) | DispatcherError::Config(_) => Self::BadData,
            DispatcherError::Thread { .. } => Self::NoMemory,
        }
    }
}

/// State shared by every dispatcher thread.
pub(crate) struct Shared {
    pub(crate) namespace: Arc<PortNamespace>,
    pub(crate) config: DispatcherConfig,
    pub(crate) table: ServiceTable,
    pub(crate) supervisor: Arc<dyn ProcessSupervisor>,
    pub(crate) control: Port,
    pub(crate) shutdown: CancelToken,
}

struct Session {
    server: Arc<RequestServer>,
    threads: Vec<JoinHandle<()>>,
}

struct Ports {
    connect: Port,
    connect_reply: Port,
    control: Port,
}

/// Entry point for starting the dispatcher.
pub struct Dispatcher;

impl Dispatcher {
    /// Elects this instance as the dispatcher of `config.product` in `namespace` and starts it.
    pub fn start(
        namespace: Arc<PortNamespace>,
        config: DispatcherConfig,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> Result<DispatcherHandle, DispatcherError> {
        config.validate().map_err(DispatcherError::InvalidConfig)?;
        let names = config.names();
        let ports = open_ports(&namespace, &names, config.port_capacity)?;
        let descriptor = ChannelDescriptor::new(
            ports.connect.id(),
            ports.connect_reply.id(),
            config.port_capacity,
        );

        let claim = namespace.discovery().try_claim(&names.connect, descriptor);
        if let Claim::ExistingOwner(owner) = claim {
            close_ports(&namespace, &ports);
            log::error!(target: "ufsd", "{} already claimed by {owner:?}", names.connect);
            return Err(DispatcherError::AlreadyRunning(owner));
        }
        if let Err(err) = publish_ports(&namespace, &names, &ports) {
            namespace.discovery().withdraw(&names.connect, descriptor);
            close_ports(&namespace, &ports);
            return Err(err.into());
        }

        let shared = Arc::new(Shared {
            namespace: Arc::clone(&namespace),
            config,
            table: ServiceTable::new(),
            supervisor,
            control: ports.control.clone(),
            shutdown: CancelToken::new(),
        });
        let mut handle = DispatcherHandle {
            shared: Arc::clone(&shared),
            names,
            descriptor,
            ports,
            sessions: Arc::new(Mutex::new(Vec::new())),
            threads: Vec::new(),
            stopped: false,
        };

        let control_shared = Arc::clone(&shared);
        let control_port = handle.ports.control.clone();
        let spawned = thread::Builder::new()
            .name("ufsd-control".into())
            .spawn(move || control::serve(&control_shared, &control_port));
        match spawned {
            Ok(join) => handle.threads.push(join),
            Err(source) => {
                handle.stop();
                return Err(DispatcherError::Thread { name: "control", source });
            }
        }

        let connect = handle.ports.connect.clone();
        let connect_reply = handle.ports.connect_reply.clone();
        let sessions = Arc::clone(&handle.sessions);
        let spawned = thread::Builder::new()
            .name("ufsd-handshake".into())
            .spawn(move || handshake_loop(&shared, &connect, &connect_reply, &sessions));
        match spawned {
            Ok(join) => handle.threads.push(join),
            Err(source) => {
                handle.stop();
                return Err(DispatcherError::Thread { name: "handshake", source });
            }
        }

        log::info!(target: "ufsd", "dispatcher for {} listening", handle.shared.config.product);
        Ok(handle)
    }
}

fn open_ports(
    namespace: &PortNamespace,
    names: &WellKnownNames,
    capacity: u32,
) -> Result<Ports, IpcError> {
    let capacity = capacity as usize;
    let connect = namespace.create(None, capacity)?;
    let connect_reply = match namespace.create(None, capacity) {
        Ok(port) => port,
        Err(err) => {
            let _ = namespace.delete(connect.id());
            return Err(err);
        }
    };
    let control = match namespace.create(None, capacity) {
        Ok(port) => port,
        Err(err) => {
            let _ = namespace.delete(connect.id());
            let _ = namespace.delete(connect_reply.id());
            return Err(err);
        }
    };
    log::trace!(target: "ufsd", "opened ports for {}", names.connect);
    Ok(Ports { connect, connect_reply, control })
}

fn publish_ports(
    namespace: &PortNamespace,
    names: &WellKnownNames,
    ports: &Ports,
) -> Result<(), IpcError> {
    namespace.publish(ports.connect.id(), &names.connect)?;
    namespace.publish(ports.connect_reply.id(), &names.connect_reply)?;
    namespace.publish(ports.control.id(), &names.control)
}

fn close_ports(namespace: &PortNamespace, ports: &Ports) {
    for port in [&ports.connect, &ports.connect_reply, &ports.control] {
        let _ = namespace.delete(port.id());
    }
}

fn handshake_loop(
    shared: &Arc<Shared>,
    connect: &Port,
    connect_reply: &Port,
    sessions: &Mutex<Vec<Session>>,
) {
    let poll = Wait::Timeout(shared.config.poll_interval());
    loop {
        let message = match connect.receive(poll) {
            Ok(message) => message,
            Err(IpcError::Timeout) | Err(IpcError::WouldBlock) => {
                if shared.shutdown.is_cancelled() {
                    break;
                }
                continue;
            }
            Err(_) => break,
        };
        if message.code != wire::CONNECT {
            log::warn!(target: "ufsd", "ignoring discovery message {:#x}", message.code);
            continue;
        }
        match open_session(shared) {
            Ok(session) => {
                let descriptor = session.server.descriptor();
                // The ack goes out under the lock, so a counted session always has its ack queued.
                let mut sessions = sessions.lock();
                sessions.retain(|session| !session.server.is_closed());
                sessions.push(session);
                if let Err(err) = connect_reply.send(wire::CONNECT_ACK, &descriptor.encode()) {
                    log::warn!(target: "ufsd", "CONNECT_ACK not delivered: {err}");
                }
                drop(sessions);
                log::debug!(target: "ufsd", "session opened at {}", descriptor.request);
            }
            Err(err) => {
                // The client sees no ack and fails its handshake.
                log::error!(target: "ufsd", "failed to open session: {err}");
            }
        }
    }
    log::debug!(target: "ufsd", "handshake loop stopped");
}

fn open_session(shared: &Arc<Shared>) -> Result<Session, DispatcherError> {
    let server = Arc::new(RequestServer::create(&shared.namespace, shared.config.port_capacity)?);
    let mut threads = Vec::with_capacity(shared.config.request_workers);
    for index in 0..shared.config.request_workers {
        let worker_shared = Arc::clone(shared);
        let worker_server = Arc::clone(&server);
        let spawned = thread::Builder::new()
            .name(format!("ufsd-session-{}-{index}", server.descriptor().request.raw()))
            .spawn(move || session::serve(&worker_shared, &worker_server));
        match spawned {
            Ok(join) => threads.push(join),
            Err(source) => {
                server.close();
                for join in threads {
                    let _ = join.join();
                }
                return Err(DispatcherError::Thread { name: "session", source });
            }
        }
    }
    Ok(Session { server, threads })
}

/// Running dispatcher. Dropping it shuts the dispatcher down.
pub struct DispatcherHandle {
    shared: Arc<Shared>,
    names: WellKnownNames,
    descriptor: ChannelDescriptor,
    ports: Ports,
    sessions: Arc<Mutex<Vec<Session>>>,
    threads: Vec<JoinHandle<()>>,
    stopped: bool,
}

impl DispatcherHandle {
    /// Address published under the discovery key.
    pub fn descriptor(&self) -> ChannelDescriptor {
        self.descriptor
    }

    /// Published port names.
    pub fn names(&self) -> &WellKnownNames {
        &self.names
    }

    /// Filesystem records, for diagnostics.
    pub fn table(&self) -> &ServiceTable {
        &self.shared.table
    }

    /// Number of sessions whose request loop is still running.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().iter().filter(|session| !session.server.is_closed()).count()
    }

    /// Withdraws the discovery claim, closes every port, cancels pending waits and joins all
    /// dispatcher threads.
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Blocks until the dispatcher stops serving.
    pub fn wait(mut self) {
        for join in self.threads.drain(..) {
            let _ = join.join();
        }
        self.stop();
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        let namespace = &self.shared.namespace;
        self.shared.shutdown.cancel();
        namespace.discovery().withdraw(&self.names.connect, self.descriptor);
        close_ports(namespace, &self.ports);
        let sessions: Vec<Session> = self.sessions.lock().drain(..).collect();
        for session in &sessions {
            session.server.close();
        }
        for join in self.threads.drain(..) {
            let _ = join.join();
        }
        for session in sessions {
            for join in session.threads {
                let _ = join.join();
            }
        }
        log::info!(target: "ufsd", "dispatcher for {} stopped", self.shared.config.product);
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
