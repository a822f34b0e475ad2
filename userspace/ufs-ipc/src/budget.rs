// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Deadline-bounded, cancellable wait loops for IPC operations.
//!
//! Blocking primitives in this crate never park for longer than one slice at a time. Between
//! slices the loop re-checks the caller's deadline and [`CancelToken`], which is how timeouts
//! and cancellation reach waits that are otherwise uninterruptible (channel receive, condvar).
//!
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Internal (crate public, but intended for in-tree use)
//! TEST_COVERAGE: Unit tests (host)

use core::time::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::{IpcError, Result, Wait};

/// Longest single park inside a sliced wait.
pub const DEFAULT_SLICE: Duration = Duration::from_millis(20);

/// Shared cancellation flag handed to blocking calls.
///
/// Cancelling only stops the waiters observing this token; the operation they wait for keeps
/// running for everyone else.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token in the non-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of every wait observing this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns `true` once [`CancelToken::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Absolute deadline derived from a [`Wait`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
    non_blocking: bool,
}

impl Deadline {
    /// Computes the deadline for `wait` relative to now.
    pub fn from_wait(wait: Wait) -> Self {
        match wait {
            Wait::Blocking => Self { at: None, non_blocking: false },
            Wait::NonBlocking => Self { at: None, non_blocking: true },
            Wait::Timeout(budget) => Self {
                at: Instant::now().checked_add(budget),
                non_blocking: budget.is_zero(),
            },
        }
    }

    /// Returns `true` once the deadline has passed. Blocking deadlines never expire.
    pub fn expired(&self) -> bool {
        match self.at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Wait to use for the next slice, or `Timeout` when the budget is spent.
    pub fn next_slice(&self, slice: Duration) -> Result<Wait> {
        if self.non_blocking {
            return Ok(Wait::NonBlocking);
        }
        match self.at {
            None => Ok(Wait::Timeout(slice)),
            Some(at) => {
                let remaining = at.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    Err(IpcError::Timeout)
                } else {
                    Ok(Wait::Timeout(remaining.min(slice)))
                }
            }
        }
    }
}

/// Runs `op` slice by slice until it succeeds, fails with a non-retryable error, the deadline
/// derived from `wait` expires, or `cancel` fires.
///
/// `op` receives the wait to use for its own blocking step; `Timeout` and `WouldBlock` from `op`
/// are treated as "no progress this slice".
pub fn run_sliced<T>(
    wait: Wait,
    cancel: Option<&CancelToken>,
    slice: Duration,
    mut op: impl FnMut(Wait) -> Result<T>,
) -> Result<T> {
    let deadline = Deadline::from_wait(wait);
    loop {
        if cancel.map_or(false, CancelToken::is_cancelled) {
            return Err(IpcError::Cancelled);
        }
        let step = deadline.next_slice(slice)?;
        match op(step) {
            Ok(value) => return Ok(value),
            Err(IpcError::WouldBlock) | Err(IpcError::Timeout) if deadline.non_blocking => {
                return Err(IpcError::WouldBlock)
            }
            Err(IpcError::WouldBlock) | Err(IpcError::Timeout) => {
                if deadline.expired() {
                    return Err(IpcError::Timeout);
                }
            }
            Err(other) => return Err(other),
        }
    }
}
