// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Discovery registry: one atomic check-and-publish slot per well-known key.
//!
//! Presence of a key means "an owner exists"; its value tells others how to reach it. There is
//! no retry protocol on top: whoever loses [`DiscoveryRegistry::try_claim`] is expected to give
//! up.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::wire::ChannelDescriptor;

/// Outcome of a claim attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Claim {
    /// The key was free and now carries the caller's address.
    Won,
    /// The key was already claimed; the current owner's address is returned.
    ExistingOwner(ChannelDescriptor),
}

/// Process-wide map of claimed keys.
#[derive(Default)]
pub struct DiscoveryRegistry {
    slots: Mutex<HashMap<String, ChannelDescriptor>>,
}

impl DiscoveryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `owner` under `key` unless the key is already taken.
    pub fn try_claim(&self, key: &str, owner: ChannelDescriptor) -> Claim {
        let mut slots = self.slots.lock();
        if let Some(existing) = slots.get(key) {
            return Claim::ExistingOwner(*existing);
        }
        slots.insert(key.to_string(), owner);
        Claim::Won
    }

    /// Current owner of `key`, if any.
    pub fn owner(&self, key: &str) -> Option<ChannelDescriptor> {
        self.slots.lock().get(key).copied()
    }

    /// Removes the claim, but only if it still carries `owner`.
    pub fn withdraw(&self, key: &str, owner: ChannelDescriptor) -> bool {
        let mut slots = self.slots.lock();
        if slots.get(key) == Some(&owner) {
            slots.remove(key);
            true
        } else {
            false
        }
    }
}
