// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Registry of discovered devices, keyed by device id

use crate::device::DeviceRecord;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared handle to one device record. Each record carries its own lock so
/// work on one device never waits on another.
pub type DeviceHandle = Arc<Mutex<DeviceRecord>>;

/// Outcome of [`DeviceRegistry::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Existing,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, DeviceHandle>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceHandle> {
        self.devices.read().get(device_id).cloned()
    }

    /// Copy of the current record state
    pub fn snapshot(&self, device_id: &str) -> Option<DeviceRecord> {
        self.get(device_id).map(|handle| handle.lock().clone())
    }

    /// Return the record for `device_id`, creating it with `factory` only if absent.
    ///
    /// The check and the insert happen under one write lock, so two racing
    /// first-time announcements produce a single record. An existing record is
    /// returned untouched.
    pub fn upsert<F>(&self, device_id: &str, factory: F) -> (DeviceHandle, Upsert)
    where
        F: FnOnce() -> DeviceRecord,
    {
        if let Some(existing) = self.get(device_id) {
            return (existing, Upsert::Existing);
        }

        let mut devices = self.devices.write();
        if let Some(existing) = devices.get(device_id) {
            return (Arc::clone(existing), Upsert::Existing);
        }

        let handle = Arc::new(Mutex::new(factory()));
        devices.insert(device_id.to_owned(), Arc::clone(&handle));
        (handle, Upsert::Created)
    }

    pub fn remove(&self, device_id: &str) -> Option<DeviceHandle> {
        self.devices.write().remove(device_id)
    }

    /// Snapshot of every record, in no particular order
    pub fn all(&self) -> Vec<DeviceRecord> {
        let handles: Vec<DeviceHandle> = self.devices.read().values().cloned().collect();
        handles.iter().map(|handle| handle.lock().clone()).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.devices.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}
