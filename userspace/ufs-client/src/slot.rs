// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Counted singleton around [`UserlandFs`].
//!
//! Construction (including the handshake) runs outside the lock. The lock is taken only to bump
//! the count, to install a freshly built proxy or discard it when another caller won, and to
//! tear down at count zero.

use std::ops::Deref;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use ufs_ipc::{CancelToken, PortNamespace};
use ufs_registry::Result;

use crate::proxy::{ClientOptions, UserlandFs};

static GLOBAL: Lazy<Arc<ProxySlot>> =
    Lazy::new(|| ProxySlot::new(PortNamespace::global(), ClientOptions::default()));

#[derive(Default)]
struct SlotState {
    instance: Option<Arc<UserlandFs>>,
    mount_count: usize,
}

/// Holder of the shared proxy and its mount count.
pub struct ProxySlot {
    namespace: Arc<PortNamespace>,
    options: ClientOptions,
    state: Mutex<SlotState>,
}

impl ProxySlot {
    /// Creates an empty slot talking to `namespace`.
    pub fn new(namespace: Arc<PortNamespace>, options: ClientOptions) -> Arc<Self> {
        Arc::new(Self { namespace, options, state: Mutex::new(SlotState::default()) })
    }

    /// Process-wide slot on the global namespace with default options.
    pub fn global() -> Arc<ProxySlot> {
        Arc::clone(&GLOBAL)
    }

    /// Returns a handle on the shared proxy, connecting it first if needed.
    ///
    /// A failed handshake is returned as is and leaves the count unchanged.
    pub fn acquire(self: &Arc<Self>) -> Result<ProxyHandle> {
        self.acquire_with(None)
    }

    /// [`Self::acquire`] with a cancellation token for the handshake wait.
    pub fn acquire_with(self: &Arc<Self>, cancel: Option<&CancelToken>) -> Result<ProxyHandle> {
        {
            let mut state = self.state.lock();
            state.mount_count += 1;
            if let Some(instance) = &state.instance {
                return Ok(self.handle(Arc::clone(instance)));
            }
        }

        let built = UserlandFs::connect(&self.namespace, self.options.clone(), cancel);
        self.install(built)
    }

    /// Settles a handshake started by [`Self::acquire_with`], whose mount is already counted.
    fn install(self: &Arc<Self>, built: Result<UserlandFs>) -> Result<ProxyHandle> {
        let fresh = match built {
            Ok(fresh) => fresh,
            Err(err) => {
                log::warn!(target: "ufs-client", "handshake failed: {err}");
                // Another builder's proxy may be installed with only our mount left on it.
                self.release();
                return Err(err);
            }
        };
        let mut state = self.state.lock();
        if let Some(existing) = &state.instance {
            let existing = Arc::clone(existing);
            drop(state);
            fresh.disconnect();
            return Ok(self.handle(existing));
        }
        let fresh = Arc::new(fresh);
        state.instance = Some(Arc::clone(&fresh));
        Ok(self.handle(fresh))
    }

    /// Handles currently outstanding.
    pub fn mount_count(&self) -> usize {
        self.state.lock().mount_count
    }

    /// Returns `true` while a proxy is installed.
    pub fn is_connected(&self) -> bool {
        self.state.lock().instance.is_some()
    }

    fn handle(self: &Arc<Self>, proxy: Arc<UserlandFs>) -> ProxyHandle {
        ProxyHandle { slot: Arc::clone(self), proxy }
    }

    fn release(&self) {
        let retired = {
            let mut state = self.state.lock();
            state.mount_count = state.mount_count.saturating_sub(1);
            if state.mount_count == 0 {
                state.instance.take()
            } else {
                None
            }
        };
        if let Some(proxy) = retired {
            proxy.disconnect();
            log::debug!(target: "ufs-client", "proxy torn down");
        }
    }
}

/// Counted reference on the shared proxy. Dropping it releases the count.
pub struct ProxyHandle {
    slot: Arc<ProxySlot>,
    proxy: Arc<UserlandFs>,
}

impl Deref for ProxyHandle {
    type Target = UserlandFs;

    fn deref(&self) -> &UserlandFs {
        &self.proxy
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        self.slot.release();
    }
}
