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

//! Device reconciliation state machine
//!
//! Consumes discovery, liveness and install events and keeps every
//! [`DeviceRecord`] consistent:
//! - `InProgress` always carries a target version, and only a firmware report
//!   matching that target moves the device back to `Idle`
//! - an `Offline` last-will never marks a device unavailable while an
//!   install is in flight (the device reboots into the new firmware)
//! - a changed topic template swaps the liveness subscription
//!
//! Record locks are never held across bus I/O. Anything decided before an
//! await is re-checked against the record afterwards.

use crate::bus::MessageBus;
use crate::device::{DeviceRecord, DiscoveryPayload, LiveSubscription, UpdateState};
use crate::dispatcher::LiveRoutes;
use crate::error::{FleetError, Result};
use crate::feed::VersionFeed;
use crate::observer::FleetObserver;
use crate::registry::{DeviceHandle, DeviceRegistry, Upsert};
use crate::topics;
use crate::version::versions_match;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Payload of the Tasmota `upgrade` command that starts an OTA from the
/// device's configured OTA URL
pub const UPGRADE_PAYLOAD: &str = "1";

const STATUS_ONLINE: &[u8] = b"Online";
const STATUS_OFFLINE: &[u8] = b"Offline";

pub struct ReconciliationEngine {
    registry: Arc<DeviceRegistry>,
    routes: Arc<LiveRoutes>,
    feed: Arc<VersionFeed>,
    bus: Arc<dyn MessageBus>,
    observer: Arc<dyn FleetObserver>,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("devices", &self.registry.len())
            .field("live_routes", &self.routes.len())
            .field("latest_release", &self.feed.current())
            .finish_non_exhaustive()
    }
}

impl ReconciliationEngine {
    pub fn new(
        feed: Arc<VersionFeed>,
        bus: Arc<dyn MessageBus>,
        observer: Arc<dyn FleetObserver>,
    ) -> Self {
        Self {
            registry: Arc::new(DeviceRegistry::new()),
            routes: Arc::new(LiveRoutes::new()),
            feed,
            bus,
            observer,
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn routes(&self) -> &Arc<LiveRoutes> {
        &self.routes
    }

    pub fn feed(&self) -> &Arc<VersionFeed> {
        &self.feed
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    pub fn device(&self, device_id: &str) -> Option<DeviceRecord> {
        self.registry.snapshot(device_id)
    }

    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.registry.all()
    }

    /// Process a discovery announcement (`<root>/<device_id>/config`).
    ///
    /// Topics not ending in `/config` are ignored. Undecodable payloads are
    /// reported as `MalformedPayload` without touching any record.
    pub async fn handle_discovery(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if !topics::is_discovery_config(topic) {
            return Ok(());
        }

        let device_id = topics::device_id_from_discovery_topic(topic).ok_or_else(|| {
            FleetError::MalformedPayload(format!("no device id in discovery topic {topic}"))
        })?;

        let announcement = DiscoveryPayload::parse(payload).map_err(|e| {
            FleetError::MalformedPayload(format!(
                "invalid discovery JSON for {device_id}: {e}"
            ))
        })?;

        let latest = self.feed.current();
        let (handle, outcome) = self.registry.upsert(device_id, || {
            DeviceRecord::from_discovery(device_id, &announcement, latest.clone())
        });

        match outcome {
            Upsert::Created => self.on_device_discovered(device_id, &handle).await,
            Upsert::Existing => {
                self.on_device_rediscovered(device_id, &handle, &announcement, latest)
                    .await;
            }
        }

        Ok(())
    }

    async fn on_device_discovered(&self, device_id: &str, handle: &DeviceHandle) {
        let created = handle.lock().clone();
        info!(
            "Discovered Tasmota device {} ({device_id}), firmware {}, topic {}",
            created.display_name, created.installed_firmware_version, created.device_topic_segment
        );
        self.observer.on_device_created(&created);

        let subscription = self
            .routes
            .subscribe(self.bus.as_ref(), device_id, &created.live_topic())
            .await;
        self.attach_live_subscription(device_id, handle, subscription)
            .await;
    }

    async fn on_device_rediscovered(
        &self,
        device_id: &str,
        handle: &DeviceHandle,
        announcement: &DiscoveryPayload,
        latest: Option<String>,
    ) {
        let (changed, stale_subscription, live_topic) = {
            let mut record = handle.lock();
            let mut changed = false;
            let previous_live_topic = record.live_topic();

            let template = announcement.full_topic_or_default();
            if record.topic_template != template {
                info!(
                    "Topic template for {device_id} changed: {} -> {template}",
                    record.topic_template
                );
                record.topic_template = template;
                changed = true;
            }

            let segment = announcement.topic_segment_or(device_id);
            if record.device_topic_segment != segment {
                info!(
                    "Topic for {device_id} changed: {} -> {segment}",
                    record.device_topic_segment
                );
                record.device_topic_segment = segment;
                changed = true;
            }

            if let Some(name) = &announcement.device_name
                && record.display_name != *name
            {
                record.display_name.clone_from(name);
                changed = true;
            }

            if let Some(latest) = latest
                && record.latest_version_snapshot.as_ref() != Some(&latest)
            {
                record.latest_version_snapshot = Some(latest);
                changed = true;
            }

            let reported = announcement.firmware_version_or_unknown();
            if record.installed_firmware_version != reported {
                debug!(
                    "Firmware of {device_id} changed: {} -> {reported}",
                    record.installed_firmware_version
                );
                record.installed_firmware_version.clone_from(&reported);
                changed = true;
            }

            if record.is_in_progress()
                && record
                    .target_version
                    .as_deref()
                    .is_some_and(|target| versions_match(&reported, target))
            {
                info!("Device {device_id} reached target firmware {reported}, update complete");
                record.update_state = UpdateState::Idle;
                record.target_version = None;
                changed = true;
            }

            let live_topic = record.live_topic();
            if live_topic == previous_live_topic {
                (changed, None, None)
            } else {
                (changed, record.live_subscription.take(), Some(live_topic))
            }
        };

        if let Some(live_topic) = live_topic {
            if let Some(stale) = stale_subscription {
                self.routes.release(self.bus.as_ref(), device_id, &stale).await;
            }
            let subscription = self
                .routes
                .subscribe(self.bus.as_ref(), device_id, &live_topic)
                .await;
            self.attach_live_subscription(device_id, handle, subscription)
                .await;
        }

        if changed {
            let current = handle.lock().clone();
            self.observer.on_device_state_changed(&current);
        }
    }

    /// Store a freshly established subscription, or release it again if the
    /// record moved on (removed, or its live topic changed) during the await.
    async fn attach_live_subscription(
        &self,
        device_id: &str,
        handle: &DeviceHandle,
        subscription: LiveSubscription,
    ) {
        let still_registered = self
            .registry
            .get(device_id)
            .is_some_and(|current| Arc::ptr_eq(&current, handle));

        let unwanted = {
            let mut record = handle.lock();
            if still_registered && record.live_topic() == subscription.topic {
                let topic = subscription.topic.clone();
                record
                    .live_subscription
                    .replace(subscription)
                    .filter(|previous| previous.topic != topic)
            } else {
                Some(subscription)
            }
        };

        if let Some(unwanted) = unwanted {
            self.routes
                .release(self.bus.as_ref(), device_id, &unwanted)
                .await;
        }
    }

    /// Apply an `Online` / `Offline` last-will message.
    ///
    /// `Offline` is ignored while an install is in progress.
    pub fn handle_live_status(&self, device_id: &str, payload: &[u8]) -> Result<()> {
        let online = match payload {
            STATUS_ONLINE => true,
            STATUS_OFFLINE => false,
            other => {
                return Err(FleetError::MalformedPayload(format!(
                    "unrecognized liveness value for {device_id}: {}",
                    String::from_utf8_lossy(other)
                )));
            }
        };

        let Some(handle) = self.registry.get(device_id) else {
            debug!("Liveness message for unknown device {device_id}");
            return Ok(());
        };

        let changed = {
            let mut record = handle.lock();
            if !online && record.is_in_progress() {
                debug!("Ignoring Offline for {device_id} while update is in progress");
                None
            } else if record.available == online {
                None
            } else {
                record.available = online;
                Some(record.clone())
            }
        };

        if let Some(record) = changed {
            info!(
                "Device {device_id} is now {}",
                if online { "online" } else { "offline" }
            );
            self.observer.on_device_state_changed(&record);
        }

        Ok(())
    }

    /// Start a firmware install on `device_id`.
    ///
    /// The target is `requested_version`, falling back to the latest release
    /// snapshot. The device is marked `InProgress` before the upgrade command
    /// is published; a failed publish rolls it back to `Idle` and returns the
    /// transport error. There is no automatic retry.
    pub async fn install(&self, device_id: &str, requested_version: Option<&str>) -> Result<()> {
        let handle = self
            .registry
            .get(device_id)
            .ok_or_else(|| FleetError::UnknownDevice(device_id.to_owned()))?;

        let (pending, target) = {
            let mut record = handle.lock();
            let target = requested_version
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
                .or_else(|| record.latest_version_snapshot.clone())
                .ok_or_else(|| FleetError::NoTargetVersion(device_id.to_owned()))?;

            record.update_state = UpdateState::InProgress;
            record.target_version = Some(target.clone());
            (record.clone(), target)
        };
        self.observer.on_device_state_changed(&pending);

        let topic = pending.command_topic();
        info!(
            "Updating Tasmota device {} ({device_id}) to {target} via {topic}",
            pending.display_name
        );

        match self.bus.publish(&topic, UPGRADE_PAYLOAD).await {
            Ok(()) => {
                info!("Sent upgrade command to {device_id} (target {target})");
                Ok(())
            }
            Err(e) => {
                error!("Failed to send upgrade command to {device_id}: {e}");
                let rolled_back = {
                    let mut record = handle.lock();
                    if record.is_in_progress()
                        && record.target_version.as_deref() == Some(target.as_str())
                    {
                        record.update_state = UpdateState::Idle;
                        record.target_version = None;
                        Some(record.clone())
                    } else {
                        None
                    }
                };
                if let Some(record) = rolled_back {
                    self.observer.on_device_state_changed(&record);
                }
                Err(e)
            }
        }
    }

    /// Push a newly fetched release tag into every record.
    ///
    /// Returns the number of devices whose snapshot changed.
    pub fn apply_latest_release(&self, tag: &str) -> usize {
        let mut updated = 0;
        for device_id in self.registry.ids() {
            let Some(handle) = self.registry.get(&device_id) else {
                continue;
            };

            let changed = {
                let mut record = handle.lock();
                if record.latest_version_snapshot.as_deref() == Some(tag) {
                    None
                } else {
                    record.latest_version_snapshot = Some(tag.to_owned());
                    Some(record.clone())
                }
            };

            if let Some(record) = changed {
                self.observer.on_device_state_changed(&record);
                updated += 1;
            }
        }

        if updated > 0 {
            info!("Latest release {tag} applied to {updated} device(s)");
        }
        updated
    }

    /// Forget a device and release its liveness subscription
    pub async fn remove_device(&self, device_id: &str) -> Option<DeviceRecord> {
        let handle = self.registry.remove(device_id)?;
        let (removed, subscription) = {
            let mut record = handle.lock();
            let subscription = record.live_subscription.take();
            (record.clone(), subscription)
        };

        if let Some(subscription) = subscription {
            self.routes
                .release(self.bus.as_ref(), device_id, &subscription)
                .await;
        }

        info!("Removed device {} ({device_id})", removed.display_name);
        self.observer.on_device_removed(device_id);
        Some(removed)
    }
}
