// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Filesystem registry shared by the userlandfs dispatcher and its clients
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests per module + proptest over table operation sequences
//!
//! PUBLIC API:
//!   - ServiceTable: name → ServiceRecord map with reference counting
//!   - ServiceRecord / RecordState: per-filesystem lifecycle
//!   - InitSignal: one-shot init completion
//!   - Error: the broker error taxonomy with stable wire statuses
//!
//! Records are removed only when their last reference goes away while they are `Failed`. A
//! `Ready` record stays in the table at zero references and is reused by the next lookup.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod record;
mod table;

pub use record::{InitSignal, RecordState, ServiceRecord};
pub use table::{Lookup, Registration, ServiceTable};

use ufs_ipc::wire::{self, DecodeError};
use ufs_ipc::IpcError;

/// Result alias for registry and broker operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors surfaced by the broker to its callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Error {
    /// No listener, channel or executable at the expected name.
    #[error("not found")]
    NotFound,
    /// A payload was malformed or undersized.
    #[error("bad data")]
    BadData,
    /// Naming conflict or permission failure.
    #[error("denied")]
    Denied,
    /// Setting up a resource failed.
    #[error("out of resources")]
    NoMemory,
    /// Another dispatcher already holds the discovery registry.
    #[error("dispatcher already running")]
    AlreadyRunning,
    /// The worker went away before it registered.
    #[error("worker aborted before registering")]
    Aborted,
    /// The caller's wait budget expired.
    #[error("timed out")]
    Timeout,
    /// The caller cancelled its wait.
    #[error("cancelled")]
    Cancelled,
    /// A channel closed underneath the call.
    #[error("disconnected")]
    Disconnected,
}

impl Error {
    /// Stable wire status for this error.
    pub const fn to_status(self) -> i32 {
        match self {
            Self::NotFound => wire::STATUS_NOT_FOUND,
            Self::BadData => wire::STATUS_BAD_DATA,
            Self::Denied => wire::STATUS_DENIED,
            Self::NoMemory => wire::STATUS_NO_MEMORY,
            Self::AlreadyRunning => wire::STATUS_ALREADY_RUNNING,
            Self::Aborted => wire::STATUS_ABORTED,
            Self::Timeout => wire::STATUS_TIMEOUT,
            Self::Cancelled => wire::STATUS_CANCELLED,
            Self::Disconnected => wire::STATUS_DISCONNECTED,
        }
    }

    /// Interprets a wire status. Unknown codes read as [`Error::BadData`].
    pub fn check_status(status: i32) -> Result<()> {
        match status {
            wire::STATUS_OK => Ok(()),
            wire::STATUS_NOT_FOUND => Err(Self::NotFound),
            wire::STATUS_DENIED => Err(Self::Denied),
            wire::STATUS_NO_MEMORY => Err(Self::NoMemory),
            wire::STATUS_ALREADY_RUNNING => Err(Self::AlreadyRunning),
            wire::STATUS_ABORTED => Err(Self::Aborted),
            wire::STATUS_TIMEOUT => Err(Self::Timeout),
            wire::STATUS_CANCELLED => Err(Self::Cancelled),
            wire::STATUS_DISCONNECTED => Err(Self::Disconnected),
            _ => Err(Self::BadData),
        }
    }
}

impl From<IpcError> for Error {
    fn from(err: IpcError) -> Self {
        match err {
            // A non-blocking attempt is a zero-length budget.
            IpcError::WouldBlock | IpcError::Timeout => Self::Timeout,
            IpcError::Cancelled => Self::Cancelled,
            IpcError::Disconnected => Self::Disconnected,
            IpcError::NotFound => Self::NotFound,
            IpcError::AlreadyExists => Self::Denied,
            IpcError::TooLarge | IpcError::BadFrame => Self::BadData,
        }
    }
}

impl From<DecodeError> for Error {
    fn from(_: DecodeError) -> Self {
        Self::BadData
    }
}
