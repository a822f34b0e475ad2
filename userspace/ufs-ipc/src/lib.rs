// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host IPC primitives for the userlandfs broker (ports, request ports, wire codec)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests per module + `tests/wire_decode.rs`
//!
//! PUBLIC API:
//!   - PortNamespace / Port: named message channels carrying `(code, payload)`
//!   - DiscoveryRegistry: atomic check-and-publish slot for singleton election
//!   - RequestClient / RequestServer: request/reply over a port pair
//!   - wire: opcodes, `ChannelDescriptor`, status codes, message codecs
//!   - Wait / CancelToken: caller-side blocking behaviour
//!
//! DEPENDENCIES:
//!   - crossbeam-channel: MPMC queues backing each port
//!   - parking_lot: namespace and stash locks

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

use core::time::Duration;

pub mod budget;
mod port;
mod registry;
mod request_port;
pub mod wire;

pub use budget::{CancelToken, Deadline};
pub use port::{Message, Port, PortId, PortNamespace, DEFAULT_PORT_CAPACITY};
pub use registry::{Claim, DiscoveryRegistry};
pub use request_port::{Incoming, RequestClient, RequestServer};

/// Result type returned by IPC operations.
pub type Result<T> = core::result::Result<T, IpcError>;

/// Behaviour of a blocking call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Block until the operation completes.
    Blocking,
    /// Return immediately if no progress can be made.
    NonBlocking,
    /// Block until either the operation completes or the timeout expires.
    Timeout(Duration),
}

impl Wait {
    /// Returns `true` when the caller requested a non-blocking attempt.
    pub const fn is_non_blocking(self) -> bool {
        matches!(self, Self::NonBlocking)
    }

    /// Converts a [`Wait::Timeout`] variant into its [`Duration`].
    pub const fn timeout(self) -> Option<Duration> {
        match self {
            Self::Timeout(duration) => Some(duration),
            Self::Blocking | Self::NonBlocking => None,
        }
    }
}

/// Errors produced by the IPC runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IpcError {
    /// Operation could not progress without blocking.
    #[error("operation would block")]
    WouldBlock,
    /// The caller exceeded the requested timeout.
    #[error("operation timed out")]
    Timeout,
    /// The caller cancelled the wait.
    #[error("operation cancelled")]
    Cancelled,
    /// The opposite endpoint disconnected or the port was closed.
    #[error("peer disconnected")]
    Disconnected,
    /// No port is published under the requested name or id.
    #[error("port not found")]
    NotFound,
    /// A port with the requested name already exists.
    #[error("port name already in use")]
    AlreadyExists,
    /// The payload exceeds the port capacity.
    #[error("payload exceeds port capacity")]
    TooLarge,
    /// A frame did not carry the expected header.
    #[error("malformed frame")]
    BadFrame,
}
