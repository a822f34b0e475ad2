// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: userlandfs dispatcher: singleton broker that launches filesystem workers on demand
//! OWNERS: @runtime
//! STATUS: Functional (host backend)
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests per module + `tests/ufs_e2e`
//!
//! PUBLIC API:
//!   - Dispatcher::start(namespace, config, supervisor) -> DispatcherHandle
//!   - DispatcherConfig: TOML-backed settings
//!   - ProcessSupervisor / ThreadSupervisor: worker launch seam and its thread backend
//!   - worker::register_service: worker-side registration
//!
//! DEPENDENCIES:
//!   - ufs-ipc: ports, request channels, wire codec
//!   - ufs-registry: ServiceTable and the error taxonomy
//!   - serde/toml: configuration
//!   - log: diagnostics under the `ufsd*` targets

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod cli;
pub mod config;
mod control;
mod dispatcher;
mod session;
pub mod supervisor;
pub mod worker;

pub use config::{ConfigError, DispatcherConfig};
pub use dispatcher::{Dispatcher, DispatcherError, DispatcherHandle};
pub use supervisor::{
    ExitNotifier, ProcessSupervisor, SpawnRequest, SupervisorError, ThreadSupervisor, WorkerContext,
    WorkerEntry,
};
