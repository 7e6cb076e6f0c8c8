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

//! FluxION OTA - Tasmota fleet firmware tracker
//!
//! Discovers Tasmota devices from MQTT discovery announcements, compares their
//! firmware with the latest GitHub release and drives `upgrade` commands while
//! tracking device liveness.

pub mod bus;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod feed;
pub mod observer;
pub mod poller;
pub mod registry;
pub mod topics;
pub mod version;

pub use bus::MessageBus;
pub use config::{FleetConfig, MqttConfig, ReleaseFeedConfig};
pub use device::{DeviceRecord, DiscoveryPayload, LiveSubscription, UpdateState};
pub use dispatcher::{BusEvent, Dispatcher, LiveRoutes, Route};
pub use engine::ReconciliationEngine;
pub use error::{FleetError, Result};
pub use feed::VersionFeed;
pub use observer::{FleetEvent, FleetObserver, LoggingObserver};
pub use poller::ReleasePoller;
pub use registry::{DeviceHandle, DeviceRegistry, Upsert};
