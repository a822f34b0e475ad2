// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Client proxy for the userlandfs dispatcher (kernel-side filesystem layer stand-in)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests per module + `tests/ufs_e2e`
//!
//! PUBLIC API:
//!   - ProxySlot::global()/new(): counted singleton holding the connected proxy
//!   - ProxySlot::acquire() -> ProxyHandle: connect on first use, share afterwards
//!   - UserlandFs::register_file_system(name) -> FileSystemHandle
//!   - UserlandFs::unregister_file_system(handle): local bookkeeping only
//!
//! The first `acquire` performs the discovery handshake outside the slot lock and installs the
//! result; a racing constructor that loses discards its own proxy. When the last handle is
//! dropped the proxy disconnects its session.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod file_system;
mod proxy;
mod slot;

pub use file_system::FileSystemHandle;
pub use proxy::{ClientOptions, UserlandFs};
pub use slot::{ProxyHandle, ProxySlot};

pub use ufs_registry::{Error, Result};
