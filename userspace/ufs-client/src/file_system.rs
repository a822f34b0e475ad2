// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Opaque handle to a connected filesystem.

use std::fmt;
use std::sync::Arc;

use ufs_ipc::wire::{ChannelDescriptor, ClientFsType, FsCapabilities, ServiceContact};
use ufs_registry::ServiceRecord;

/// One reference on a ready filesystem, as granted by the dispatcher.
///
/// Give it back with [`crate::UserlandFs::unregister_file_system`].
pub struct FileSystemHandle {
    pub(crate) record: Arc<ServiceRecord>,
    pub(crate) contact: ServiceContact,
}

impl FileSystemHandle {
    /// Filesystem name.
    pub fn name(&self) -> &str {
        self.record.name()
    }

    /// Request channels published by the filesystem server.
    pub fn channels(&self) -> &[ChannelDescriptor] {
        &self.contact.channels
    }

    /// Number of request channels.
    pub fn channel_count(&self) -> usize {
        self.contact.channels.len()
    }

    /// Capability mask reported by the server.
    pub fn capabilities(&self) -> FsCapabilities {
        self.contact.capabilities
    }

    /// Client API the server implements.
    pub fn fs_type(&self) -> ClientFsType {
        self.contact.fs_type
    }

    /// Full contact information.
    pub fn contact(&self) -> &ServiceContact {
        &self.contact
    }
}

impl fmt::Debug for FileSystemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystemHandle")
            .field("name", &self.name())
            .field("channels", &self.contact.channels.len())
            .finish()
    }
}
