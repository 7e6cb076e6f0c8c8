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

//! Notifications emitted towards the presentation layer

use crate::device::{DeviceRecord, UpdateState};
use serde::Serialize;

/// Callback surface for whatever presents the fleet (HA entities, a web UI, logs).
///
/// Callbacks run on the engine's task and must not block.
pub trait FleetObserver: Send + Sync {
    fn on_device_created(&self, device: &DeviceRecord);

    fn on_device_state_changed(&self, device: &DeviceRecord);

    fn on_device_removed(&self, device_id: &str);
}

#[derive(Debug, Clone, Serialize)]
pub enum FleetEvent {
    DeviceCreated {
        device_id: String,
        display_name: String,
        installed_version: Option<String>,
        latest_version: Option<String>,
    },
    DeviceStateChanged {
        device_id: String,
        installed_version: Option<String>,
        latest_version: Option<String>,
        update_available: bool,
        update_state: UpdateState,
        target_version: Option<String>,
        available: bool,
    },
    DeviceRemoved {
        device_id: String,
    },
}

impl FleetEvent {
    pub fn created(device: &DeviceRecord) -> Self {
        Self::DeviceCreated {
            device_id: device.device_id.clone(),
            display_name: device.display_name.clone(),
            installed_version: device.display_version(),
            latest_version: device.latest_version(),
        }
    }

    pub fn state_changed(device: &DeviceRecord) -> Self {
        Self::DeviceStateChanged {
            device_id: device.device_id.clone(),
            installed_version: device.display_version(),
            latest_version: device.latest_version(),
            update_available: device.update_available(),
            update_state: device.update_state,
            target_version: device.target_version.clone(),
            available: device.available,
        }
    }

    pub fn removed(device_id: &str) -> Self {
        Self::DeviceRemoved {
            device_id: device_id.to_owned(),
        }
    }
}

/// Report a fleet event as a structured log line
pub fn report_event(event: &FleetEvent) {
    match serde_json::to_string(event) {
        Ok(event_json) => tracing::info!("Fleet event: {event_json}"),
        Err(e) => tracing::warn!("Failed to serialize fleet event {event:?}: {e}"),
    }
}

/// Observer that only logs; the default when no presentation layer is attached
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl FleetObserver for LoggingObserver {
    fn on_device_created(&self, device: &DeviceRecord) {
        report_event(&FleetEvent::created(device));
    }

    fn on_device_state_changed(&self, device: &DeviceRecord) {
        report_event(&FleetEvent::state_changed(device));
    }

    fn on_device_removed(&self, device_id: &str) {
        report_event(&FleetEvent::removed(device_id));
    }
}
