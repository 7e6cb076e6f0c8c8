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

//! Configuration module for the OTA fleet tracker

use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const ADDON_OPTIONS_PATH: &str = "/data/options.json";
const DEV_CONFIG_PATH: &str = "config.toml";

const GITHUB_API_BASE_URL: &str = "https://api.github.com";

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_1883() -> u16 {
    1883
}

fn default_client_id() -> String {
    "fluxion-ota".to_owned()
}

fn default_30() -> u64 {
    30
}

fn default_5() -> u64 {
    5
}

fn default_10() -> u64 {
    10
}

fn default_100() -> usize {
    100
}

fn default_3600() -> u64 {
    3600
}

fn default_discovery_root() -> String {
    "tasmota/discovery".to_owned()
}

fn default_repository() -> String {
    "arendst/Tasmota".to_owned()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub release_feed: ReleaseFeedConfig,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_1883")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "default_30")]
    pub keep_alive_secs: u64,

    /// Root under which devices publish retained discovery announcements
    #[serde(default = "default_discovery_root")]
    pub discovery_root: String,

    /// Delay between broker reconnect attempts (seconds)
    #[serde(default = "default_5")]
    pub reconnect_delay_secs: u64,

    /// Capacity of the MQTT client request queue
    #[serde(default = "default_100")]
    pub channel_capacity: usize,
}

/// GitHub release feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseFeedConfig {
    /// Upstream repository in `owner/name` form
    #[serde(default = "default_repository")]
    pub repository: String,

    /// Custom API base URL for testing (overrides default GitHub API)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,

    /// How often to check for a new release (seconds)
    #[serde(default = "default_3600")]
    pub check_interval_secs: u64,

    #[serde(default = "default_10")]
    pub request_timeout_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_1883(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_30(),
            discovery_root: default_discovery_root(),
            reconnect_delay_secs: default_5(),
            channel_capacity: default_100(),
        }
    }
}

impl Default for ReleaseFeedConfig {
    fn default() -> Self {
        Self {
            repository: default_repository(),
            api_base_url: None,
            check_interval_secs: default_3600(),
            request_timeout_secs: default_10(),
        }
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl ReleaseFeedConfig {
    pub fn api_base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or(GITHUB_API_BASE_URL)
            .trim_end_matches('/')
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl FleetConfig {
    /// Load configuration from an explicit path, HA addon options or config.toml,
    /// falling back to defaults. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = explicit {
            let config = Self::from_path(path)?;
            info!("Loaded configuration from {}", path.display());
            config
        } else if Path::new(ADDON_OPTIONS_PATH).exists() {
            let config = Self::from_path(Path::new(ADDON_OPTIONS_PATH))?;
            info!("Loaded configuration from HA addon options");
            config
        } else if Path::new(DEV_CONFIG_PATH).exists() {
            let config = Self::from_path(Path::new(DEV_CONFIG_PATH))?;
            info!("Loaded configuration from {DEV_CONFIG_PATH}");
            config
        } else {
            warn!("No configuration file found, using defaults with environment overrides");
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file; `.json` is read as JSON, everything else as TOML
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.mqtt.port = port,
                Err(_) => warn!("Ignoring invalid MQTT_PORT: {port}"),
            }
        }
        if let Some(username) = lookup("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Some(root) = lookup("DISCOVERY_ROOT") {
            self.mqtt.discovery_root = root;
        }
        if let Some(repository) = lookup("RELEASE_REPOSITORY") {
            self.release_feed.repository = repository;
        }
        if let Some(interval) = lookup("CHECK_INTERVAL_SECS") {
            match interval.parse::<u64>() {
                Ok(secs) => self.release_feed.check_interval_secs = secs,
                Err(_) => warn!("Ignoring invalid CHECK_INTERVAL_SECS: {interval}"),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.mqtt.host.trim().is_empty() {
            return Err(FleetError::Config("mqtt.host must not be empty".to_owned()));
        }
        if self.mqtt.port == 0 {
            return Err(FleetError::Config("mqtt.port must not be 0".to_owned()));
        }
        if self.mqtt.discovery_root.trim_matches('/').is_empty() {
            return Err(FleetError::Config(
                "mqtt.discovery_root must not be empty".to_owned(),
            ));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(FleetError::Config(
                "mqtt.channel_capacity must be at least 1".to_owned(),
            ));
        }
        if self.release_feed.check_interval_secs == 0 {
            return Err(FleetError::Config(
                "release_feed.check_interval_secs must be at least 1".to_owned(),
            ));
        }

        let mut parts = self.release_feed.repository.split('/');
        let well_formed = matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
        );
        if !well_formed {
            return Err(FleetError::Config(format!(
                "release_feed.repository must look like owner/name, got: {}",
                self.release_feed.repository
            )));
        }

        Ok(())
    }
}
