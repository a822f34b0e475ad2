// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Name → record map guarded by a single mutex.
//!
//! Every state transition and reference count change happens while the table lock is held.
//! Completing or failing a record fires its init signal under the same lock, so the signal
//! fires exactly when the state leaves `Initializing`.

use std::collections::HashMap;
use std::ptr;
use std::sync::Arc;

use parking_lot::Mutex;
use ufs_ipc::wire::{ProcessId, ServiceContact};

use crate::record::{RecordState, ServiceRecord};
use crate::{Error, Result};

/// Result of [`ServiceTable::acquire`]. Either way the caller now holds one reference.
#[derive(Clone, Debug)]
pub enum Lookup {
    /// No record existed; a fresh `Uninitialized` one was inserted.
    Created(Arc<ServiceRecord>),
    /// A record already existed.
    Existing(Arc<ServiceRecord>),
}

impl Lookup {
    /// The record, whichever way it was obtained.
    pub fn record(&self) -> &Arc<ServiceRecord> {
        match self {
            Self::Created(record) | Self::Existing(record) => record,
        }
    }
}

/// Outcome of [`ServiceTable::register`].
#[derive(Clone, Debug)]
pub enum Registration {
    /// The `Initializing` record owned by the worker became `Ready`.
    Completed(Arc<ServiceRecord>),
    /// No record was pending; a new `Ready` record was inserted.
    Inserted(Arc<ServiceRecord>),
}

/// Locked map of filesystem records.
#[derive(Default)]
pub struct ServiceTable {
    records: Mutex<HashMap<String, Arc<ServiceRecord>>>,
}

impl ServiceTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks `name` up, inserting an `Uninitialized` record on a miss, and takes a reference.
    pub fn acquire(&self, name: &str) -> Lookup {
        let mut records = self.records.lock();
        if let Some(record) = records.get(name) {
            record.inner.lock().ref_count += 1;
            return Lookup::Existing(Arc::clone(record));
        }
        let contact = ServiceContact::default();
        let record = Arc::new(ServiceRecord::new(name, RecordState::Uninitialized, contact));
        record.inner.lock().ref_count = 1;
        records.insert(name.to_string(), Arc::clone(&record));
        log::debug!(target: "ufs-registry", "created record {name}");
        Lookup::Created(record)
    }

    /// Takes one more reference on a record.
    pub fn add_reference(&self, record: &ServiceRecord) {
        let _records = self.records.lock();
        record.inner.lock().ref_count += 1;
    }

    /// Drops one reference. Returns `true` if it was the last one; a `Failed` record is then
    /// removed from the table, a `Ready` one stays.
    pub fn remove_reference(&self, record: &Arc<ServiceRecord>) -> bool {
        let mut records = self.records.lock();
        let (was_last, failed) = {
            let mut inner = record.inner.lock();
            inner.ref_count = inner.ref_count.saturating_sub(1);
            (inner.ref_count == 0, inner.state == RecordState::Failed)
        };
        if was_last && failed {
            let same =
                records.get(record.name()).map_or(false, |current| Arc::ptr_eq(current, record));
            if same {
                records.remove(record.name());
                log::debug!(target: "ufs-registry", "removed failed record {}", record.name());
            }
        }
        was_last
    }

    /// Moves an `Uninitialized` record to `Initializing`, owned by `pid`.
    pub fn begin_init(&self, record: &ServiceRecord, pid: ProcessId) -> Result<()> {
        let _records = self.records.lock();
        let mut inner = record.inner.lock();
        if inner.state != RecordState::Uninitialized {
            return Err(Error::Denied);
        }
        inner.state = RecordState::Initializing;
        inner.owner = Some(pid);
        Ok(())
    }

    /// Marks a record that has not reached a terminal state as `Failed` with `error`, waking
    /// every waiter. Returns `false` if the record was already terminal.
    ///
    /// A record nobody references any more is dropped from the table right away.
    pub fn fail(&self, record: &ServiceRecord, error: Error) -> bool {
        let mut records = self.records.lock();
        Self::fail_locked(&mut records, record, error)
    }

    fn fail_locked(
        records: &mut HashMap<String, Arc<ServiceRecord>>,
        record: &ServiceRecord,
        error: Error,
    ) -> bool {
        let unreferenced = {
            let mut inner = record.inner.lock();
            if inner.state.is_terminal() {
                return false;
            }
            inner.state = RecordState::Failed;
            inner.error = Some(error);
            inner.contact = ServiceContact::default();
            inner.ref_count == 0
        };
        record.signal().complete(Err(error));
        let listed = records
            .get(record.name())
            .map_or(false, |current| ptr::eq(Arc::as_ptr(current), record));
        if unreferenced && listed {
            records.remove(record.name());
            let name = record.name();
            log::debug!(target: "ufs-registry", "removed unreferenced failed record {name}");
        }
        true
    }

    /// Applies a worker registration.
    ///
    /// The `Initializing` record owned by `pid` becomes `Ready`. Without such a record the
    /// registration is treated as a self-registration by name: it is inserted as a new `Ready`
    /// record unless the name is already taken, which yields [`Error::Denied`]. A contact
    /// without channels is rejected with [`Error::BadData`].
    pub fn register(
        &self,
        pid: ProcessId,
        name: &str,
        contact: ServiceContact,
    ) -> Result<Registration> {
        if contact.channels.is_empty() {
            return Err(Error::BadData);
        }
        let mut records = self.records.lock();
        let pending = records.values().find(|record| {
            let inner = record.inner.lock();
            inner.state == RecordState::Initializing && inner.owner == Some(pid)
        });
        if let Some(record) = pending {
            {
                let mut inner = record.inner.lock();
                inner.state = RecordState::Ready;
                inner.contact = contact.clone();
            }
            record.signal().complete(Ok(contact));
            return Ok(Registration::Completed(Arc::clone(record)));
        }
        if records.contains_key(name) {
            return Err(Error::Denied);
        }
        let record = Arc::new(ServiceRecord::new(name, RecordState::Ready, contact));
        record.inner.lock().owner = Some(pid);
        records.insert(name.to_string(), Arc::clone(&record));
        Ok(Registration::Inserted(record))
    }

    /// Fails the `Initializing` record owned by `pid`, if any. `Ready` records are untouched.
    pub fn fail_by_owner(&self, pid: ProcessId, error: Error) -> Option<Arc<ServiceRecord>> {
        let mut records = self.records.lock();
        let record = records
            .values()
            .find(|record| {
                let inner = record.inner.lock();
                inner.state == RecordState::Initializing && inner.owner == Some(pid)
            })
            .cloned()?;
        Self::fail_locked(&mut records, &record, error);
        Some(record)
    }

    /// Takes a reference on a `Ready` record for `name`, inserting one with `contact` when absent
    /// or when the existing record already failed.
    pub fn acquire_ready(&self, name: &str, contact: ServiceContact) -> Arc<ServiceRecord> {
        let mut records = self.records.lock();
        if let Some(record) = records.get(name) {
            let mut inner = record.inner.lock();
            if inner.state == RecordState::Ready {
                inner.ref_count += 1;
                return Arc::clone(record);
            }
        }
        let record = Arc::new(ServiceRecord::new(name, RecordState::Ready, contact));
        record.inner.lock().ref_count = 1;
        records.insert(name.to_string(), Arc::clone(&record));
        record
    }

    /// Peeks at a record without taking a reference.
    pub fn get(&self, name: &str) -> Option<Arc<ServiceRecord>> {
        self.records.lock().get(name).cloned()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` when the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted snapshot of `(name, state, ref_count)`.
    pub fn snapshot(&self) -> Vec<(String, RecordState, u32)> {
        let records = self.records.lock();
        let mut out: Vec<_> = records
            .values()
            .map(|record| {
                let inner = record.inner.lock();
                (record.name().to_string(), inner.state, inner.ref_count)
            })
            .collect();
        out.sort();
        out
    }
}
