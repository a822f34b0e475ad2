// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Dispatcher configuration loaded from TOML. Every field has a default, so an empty file (or
//! no file at all) yields a usable configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use ufs_ipc::wire::{WellKnownNames, MAX_CONNECT_REPLY_LEN, MAX_REGISTER_SERVICE_LEN};
use ufs_ipc::DEFAULT_PORT_CAPACITY;

/// Smallest port capacity that still fits the largest connect reply and registration.
pub const MIN_PORT_CAPACITY: u32 = if MAX_REGISTER_SERVICE_LEN > MAX_CONNECT_REPLY_LEN {
    MAX_REGISTER_SERVICE_LEN as u32
} else {
    MAX_CONNECT_REPLY_LEN as u32
};

/// Runtime settings of a dispatcher instance.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Prefix of the well-known port names and the discovery key.
    pub product: String,
    /// Executable spawned for a filesystem that is not running yet.
    pub server_path: String,
    /// Request-loop threads per client session.
    pub request_workers: usize,
    /// Payload capacity of every port the dispatcher creates.
    pub port_capacity: u32,
    /// How often idle loops re-check for shutdown, in milliseconds.
    pub handshake_poll_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            product: "userlandfs".to_string(),
            server_path: "/system/servers/userlandfs_server".to_string(),
            request_workers: 4,
            port_capacity: DEFAULT_PORT_CAPACITY as u32,
            handshake_poll_ms: 50,
        }
    }
}

impl DispatcherConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: Self = toml::from_str(&raw)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config
            .validate()
            .map_err(|reason| ConfigError::Invalid { path: path.to_path_buf(), reason })?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), String> {
        if self.product.is_empty() || self.product.contains(char::is_whitespace) {
            return Err(format!("product {:?} must be a non-empty word", self.product));
        }
        if self.server_path.is_empty() {
            return Err("server_path must not be empty".into());
        }
        if self.request_workers == 0 {
            return Err("request_workers must be at least 1".into());
        }
        if self.port_capacity < MIN_PORT_CAPACITY {
            return Err(format!("port_capacity must be at least {MIN_PORT_CAPACITY}"));
        }
        if self.handshake_poll_ms == 0 {
            return Err("handshake_poll_ms must be positive".into());
        }
        Ok(())
    }

    /// Poll interval of the idle loops.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_poll_ms)
    }

    /// Published port names for this product.
    pub fn names(&self) -> WellKnownNames {
        WellKnownNames::for_product(&self.product)
    }
}

/// Failure to load a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Error returned by the TOML deserializer.
        source: toml::de::Error,
    },
    /// The values parsed but do not make sense together.
    #[error("invalid configuration {path}: {reason}")]
    Invalid {
        /// File the values came from.
        path: PathBuf,
        /// Human readable description of the issue.
        reason: String,
    },
}
