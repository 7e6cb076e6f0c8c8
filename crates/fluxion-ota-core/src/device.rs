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

//! Per-device firmware and liveness record

use crate::topics;
use crate::version::{self, UNKNOWN_VERSION};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Install life-cycle of a single device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    /// No install pending
    #[default]
    Idle,
    /// Upgrade command issued, waiting for the device to report the target version
    InProgress,
    /// Not yet reconciled (never entered by the engine itself)
    Unknown,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::InProgress => "in_progress",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Handle for an established liveness subscription.
///
/// Inbound LWT messages are routed back to the device by looking this topic up,
/// never by capturing the record in a callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LiveSubscription {
    pub topic: String,
}

/// Discovery announcement published by a Tasmota device
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DiscoveryPayload {
    /// Device name
    #[serde(default, rename = "dn")]
    pub device_name: Option<String>,

    /// Firmware version
    #[serde(default, rename = "sw")]
    pub firmware_version: Option<String>,

    /// Device topic segment
    #[serde(default, rename = "t")]
    pub topic_segment: Option<String>,

    /// Full topic template
    #[serde(default, rename = "ft")]
    pub full_topic: Option<String>,
}

impl DiscoveryPayload {
    pub fn parse(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    pub fn display_name_or(&self, device_id: &str) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| device_id.to_owned())
    }

    pub fn firmware_version_or_unknown(&self) -> String {
        self.firmware_version
            .clone()
            .unwrap_or_else(|| UNKNOWN_VERSION.to_owned())
    }

    pub fn topic_segment_or(&self, device_id: &str) -> String {
        self.topic_segment
            .clone()
            .unwrap_or_else(|| device_id.to_owned())
    }

    pub fn full_topic_or_default(&self) -> String {
        self.full_topic
            .clone()
            .unwrap_or_else(|| topics::DEFAULT_FULL_TOPIC.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub display_name: String,
    pub installed_firmware_version: String,
    pub topic_template: String,
    pub device_topic_segment: String,
    /// Latest upstream release tag as last seen by this device's reconciliation
    pub latest_version_snapshot: Option<String>,
    pub update_state: UpdateState,
    /// Set only while `update_state` is `InProgress`
    pub target_version: Option<String>,
    pub available: bool,
    pub live_subscription: Option<LiveSubscription>,
}

impl DeviceRecord {
    pub fn from_discovery(
        device_id: &str,
        payload: &DiscoveryPayload,
        latest_version_snapshot: Option<String>,
    ) -> Self {
        Self {
            device_id: device_id.to_owned(),
            display_name: payload.display_name_or(device_id),
            installed_firmware_version: payload.firmware_version_or_unknown(),
            topic_template: payload.full_topic_or_default(),
            device_topic_segment: payload.topic_segment_or(device_id),
            latest_version_snapshot,
            update_state: UpdateState::Idle,
            target_version: None,
            available: true,
            live_subscription: None,
        }
    }

    pub fn command_topic(&self) -> String {
        topics::command_topic(&self.topic_template, &self.device_topic_segment)
    }

    pub fn live_topic(&self) -> String {
        topics::live_topic(&self.topic_template, &self.device_topic_segment)
    }

    pub fn is_in_progress(&self) -> bool {
        self.update_state == UpdateState::InProgress
    }

    /// `"v" + installed version`, `None` while the firmware is unknown
    pub fn display_version(&self) -> Option<String> {
        version::display_version(&self.installed_firmware_version)
    }

    /// Upstream release tag, degrading to the installed version when the feed
    /// has not produced a value yet
    pub fn latest_version(&self) -> Option<String> {
        self.latest_version_snapshot
            .clone()
            .or_else(|| self.display_version())
    }

    /// Plain string inequality between installed and latest versions
    pub fn update_available(&self) -> bool {
        self.display_version() != self.latest_version()
    }

    pub fn release_url(&self, repository: &str) -> Option<String> {
        self.latest_version_snapshot
            .as_deref()
            .map(|tag| crate::feed::release_url(repository, tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(installed: &str, latest: Option<&str>) -> DeviceRecord {
        let payload = DiscoveryPayload {
            firmware_version: Some(installed.to_owned()),
            ..Default::default()
        };
        DeviceRecord::from_discovery("plug_1", &payload, latest.map(str::to_owned))
    }

    #[test]
    fn test_discovery_payload_defaults() {
        let payload = DiscoveryPayload::parse(b"{}").unwrap();
        let record = DeviceRecord::from_discovery("A1B2C3", &payload, None);

        assert_eq!(record.display_name, "A1B2C3");
        assert_eq!(record.installed_firmware_version, "unknown");
        assert_eq!(record.device_topic_segment, "A1B2C3");
        assert_eq!(record.topic_template, "%prefix%/%topic%/");
        assert_eq!(record.update_state, UpdateState::Idle);
        assert!(record.available);
        assert!(record.target_version.is_none());
        assert!(record.live_subscription.is_none());
    }

    #[test]
    fn test_discovery_payload_ignores_extra_fields() {
        let payload = DiscoveryPayload::parse(
            br#"{"ip":"10.0.0.7","dn":"Garage","sw":"13.0.0","t":"garage","ft":"%prefix%/%topic%/","md":"Sonoff Basic"}"#,
        )
        .unwrap();

        assert_eq!(payload.device_name.as_deref(), Some("Garage"));
        assert_eq!(payload.firmware_version.as_deref(), Some("13.0.0"));
        assert_eq!(payload.topic_segment.as_deref(), Some("garage"));
    }

    #[test]
    fn test_computed_topics() {
        let payload = DiscoveryPayload {
            topic_segment: Some("garage".to_owned()),
            ..Default::default()
        };
        let record = DeviceRecord::from_discovery("A1B2C3", &payload, None);

        assert_eq!(record.command_topic(), "cmnd/garage/upgrade");
        assert_eq!(record.live_topic(), "tele/garage/LWT");
    }

    #[test]
    fn test_latest_version_falls_back_to_installed() {
        let record = record("12.1.1", None);
        assert_eq!(record.display_version().as_deref(), Some("v12.1.1"));
        assert_eq!(record.latest_version().as_deref(), Some("v12.1.1"));
        assert!(!record.update_available());
    }

    #[test]
    fn test_update_available_is_string_inequality() {
        assert!(record("12.1.1", Some("v13.0.0")).update_available());
        assert!(!record("13.0.0", Some("v13.0.0")).update_available());
        // Newer-than-latest still reads as an available update
        assert!(record("14.0.0", Some("v13.0.0")).update_available());
    }

    #[test]
    fn test_unknown_firmware_has_no_display_version() {
        let record = record("unknown", None);
        assert!(record.display_version().is_none());
        assert!(record.latest_version().is_none());
        assert!(!record.update_available());
    }

    #[test]
    fn test_release_url() {
        let device = record("12.1.1", Some("v13.0.0"));
        assert_eq!(
            device.release_url("arendst/Tasmota").as_deref(),
            Some("https://github.com/arendst/Tasmota/releases/tag/v13.0.0")
        );
        assert!(record("12.1.1", None).release_url("arendst/Tasmota").is_none());
    }

    #[test]
    fn test_update_state_display() {
        assert_eq!(UpdateState::InProgress.to_string(), "in_progress");
        assert_eq!(UpdateState::default(), UpdateState::Idle);
    }
}
