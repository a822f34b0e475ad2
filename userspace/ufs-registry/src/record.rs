// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-filesystem record and its one-shot init signal.
//!
//! State and reference count live behind the record's own mutex but are only changed by
//! [`crate::ServiceTable`] while it holds the table lock (lock order: table, then record).

use std::fmt;

use parking_lot::{Condvar, Mutex};
use ufs_ipc::budget::{self, CancelToken, DEFAULT_SLICE};
use ufs_ipc::wire::{ProcessId, ServiceContact};
use ufs_ipc::{IpcError, Wait};

use crate::{Error, Result};

/// Lifecycle of a record. Only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordState {
    /// Created on a lookup miss; no worker yet.
    Uninitialized,
    /// Worker spawned, registration pending.
    Initializing,
    /// Worker registered; the contact is valid.
    Ready,
    /// Worker failed to come up.
    Failed,
}

impl RecordState {
    /// Returns `true` for `Ready` and `Failed`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

/// Fires exactly once with the outcome of a worker's initialisation.
///
/// Waiters never consume the outcome, so any number of them observe the same result. Giving up
/// a wait (timeout or cancel) has no effect on the signal.
pub struct InitSignal {
    outcome: Mutex<Option<Result<ServiceContact>>>,
    fired: Condvar,
}

impl Default for InitSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl InitSignal {
    /// Creates an unfired signal.
    pub fn new() -> Self {
        Self { outcome: Mutex::new(None), fired: Condvar::new() }
    }

    /// Fires the signal. Returns `false` if it had already fired; the first outcome stands.
    pub fn complete(&self, outcome: Result<ServiceContact>) -> bool {
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.fired.notify_all();
        true
    }

    /// Outcome if the signal already fired.
    pub fn peek(&self) -> Option<Result<ServiceContact>> {
        self.outcome.lock().clone()
    }

    /// Blocks until the signal fires, the wait budget runs out, or `cancel` fires.
    pub fn wait(&self, wait: Wait, cancel: Option<&CancelToken>) -> Result<ServiceContact> {
        let outcome = budget::run_sliced(wait, cancel, DEFAULT_SLICE, |step| {
            let mut slot = self.outcome.lock();
            if slot.is_none() {
                if let Some(slice) = step.timeout() {
                    if !slice.is_zero() {
                        self.fired.wait_for(&mut slot, slice);
                    }
                }
            }
            slot.clone().ok_or(IpcError::WouldBlock)
        })?;
        outcome
    }
}

pub(crate) struct RecordInner {
    pub(crate) state: RecordState,
    pub(crate) owner: Option<ProcessId>,
    pub(crate) contact: ServiceContact,
    pub(crate) ref_count: u32,
    pub(crate) error: Option<Error>,
}

/// One named filesystem known to a [`crate::ServiceTable`].
pub struct ServiceRecord {
    name: String,
    pub(crate) inner: Mutex<RecordInner>,
    signal: InitSignal,
}

impl fmt::Debug for ServiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ServiceRecord")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("owner", &inner.owner)
            .field("ref_count", &inner.ref_count)
            .finish()
    }
}

impl ServiceRecord {
    pub(crate) fn new(name: &str, state: RecordState, contact: ServiceContact) -> Self {
        Self {
            name: name.to_string(),
            inner: Mutex::new(RecordInner {
                state,
                owner: None,
                contact,
                ref_count: 0,
                error: None,
            }),
            signal: InitSignal::new(),
        }
    }

    /// Filesystem name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> RecordState {
        self.inner.lock().state
    }

    /// Worker process that owns the record, once spawned.
    pub fn owner(&self) -> Option<ProcessId> {
        self.inner.lock().owner
    }

    /// Number of outstanding references, pending waiters included.
    pub fn ref_count(&self) -> u32 {
        self.inner.lock().ref_count
    }

    /// Contact of a `Ready` record.
    pub fn contact(&self) -> Option<ServiceContact> {
        let inner = self.inner.lock();
        (inner.state == RecordState::Ready).then(|| inner.contact.clone())
    }

    /// Error stored when the record failed.
    pub fn error(&self) -> Option<Error> {
        self.inner.lock().error
    }

    /// Terminal outcome, or `None` while initialisation is pending.
    pub fn outcome(&self) -> Option<Result<ServiceContact>> {
        let inner = self.inner.lock();
        match inner.state {
            RecordState::Ready => Some(Ok(inner.contact.clone())),
            RecordState::Failed => Some(Err(inner.error.unwrap_or(Error::Aborted))),
            RecordState::Uninitialized | RecordState::Initializing => None,
        }
    }

    /// Waits for the record to leave `Initializing`.
    pub fn wait_ready(&self, wait: Wait, cancel: Option<&CancelToken>) -> Result<ServiceContact> {
        if let Some(outcome) = self.outcome() {
            return outcome;
        }
        self.signal.wait(wait, cancel)
    }

    pub(crate) fn signal(&self) -> &InitSignal {
        &self.signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use ufs_ipc::wire::ChannelDescriptor;
    use ufs_ipc::PortId;

    fn contact() -> ServiceContact {
        let channel = ChannelDescriptor::new(PortId::from_raw(1), PortId::from_raw(2), 64);
        ServiceContact::new(vec![channel])
    }

    #[test]
    fn signal_fires_once_for_every_waiter() {
        let signal = Arc::new(InitSignal::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let signal = Arc::clone(&signal);
                thread::spawn(move || signal.wait(Wait::Blocking, None))
            })
            .collect();
        thread::sleep(Duration::from_millis(10));
        assert!(signal.complete(Err(Error::Aborted)));
        assert!(!signal.complete(Ok(contact())));
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Err(Error::Aborted));
        }
        assert_eq!(signal.peek(), Some(Err(Error::Aborted)));
    }

    #[test]
    fn abandoned_wait_leaves_signal_intact() {
        let signal = InitSignal::new();
        assert_eq!(
            signal.wait(Wait::Timeout(Duration::from_millis(10)), None),
            Err(Error::Timeout)
        );
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(signal.wait(Wait::Blocking, Some(&token)), Err(Error::Cancelled));
        assert_eq!(signal.wait(Wait::NonBlocking, None), Err(Error::Timeout));

        assert!(signal.complete(Ok(contact())));
        assert_eq!(signal.wait(Wait::NonBlocking, None), Ok(contact()));
    }

    #[test]
    fn contact_only_visible_when_ready() {
        let record = ServiceRecord::new("ramfs", RecordState::Initializing, contact());
        assert_eq!(record.contact(), None);
        assert_eq!(record.outcome(), None);
        record.inner.lock().state = RecordState::Ready;
        assert_eq!(record.contact(), Some(contact()));
        assert_eq!(record.wait_ready(Wait::NonBlocking, None), Ok(contact()));
    }
}
