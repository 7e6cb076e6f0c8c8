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

//! Topic resolution for Tasmota full-topic templates
//!
//! Every function here is pure so topic derivation can be tested without a broker.

/// Template Tasmota uses when a discovery payload carries no `ft` field
pub const DEFAULT_FULL_TOPIC: &str = "%prefix%/%topic%/";

const PREFIX_PLACEHOLDER: &str = "%prefix%";
const TOPIC_PLACEHOLDER: &str = "%topic%";

const COMMAND_PREFIX: &str = "cmnd";
const TELEMETRY_PREFIX: &str = "tele";

const UPGRADE_COMMAND: &str = "upgrade";
const LWT_SUFFIX: &str = "LWT";

const CONFIG_SUFFIX: &str = "/config";

/// Replace the `%prefix%` and `%topic%` placeholders in a full-topic template
pub fn substitute(template: &str, prefix: &str, topic_segment: &str) -> String {
    template
        .replace(PREFIX_PLACEHOLDER, prefix)
        .replace(TOPIC_PLACEHOLDER, topic_segment)
}

/// Topic the `upgrade` command is published to (e.g. `cmnd/plug_1/upgrade`)
pub fn command_topic(template: &str, topic_segment: &str) -> String {
    let mut topic = substitute(template, COMMAND_PREFIX, topic_segment);
    topic.push_str(UPGRADE_COMMAND);
    topic
}

/// Last-will topic carrying `Online` / `Offline` (e.g. `tele/plug_1/LWT`)
pub fn live_topic(template: &str, topic_segment: &str) -> String {
    let mut topic = substitute(template, TELEMETRY_PREFIX, topic_segment);
    topic.push_str(LWT_SUFFIX);
    topic
}

/// Wildcard filter covering every discovery announcement under `root`
pub fn discovery_filter(root: &str) -> String {
    format!("{}/#", root.trim_end_matches('/'))
}

pub fn is_discovery_config(topic: &str) -> bool {
    topic.ends_with(CONFIG_SUFFIX)
}

/// Device identity is the second-to-last `/`-delimited segment of the discovery topic
/// (`tasmota/discovery/<device_id>/config`)
pub fn device_id_from_discovery_topic(topic: &str) -> Option<&str> {
    let mut segments = topic.rsplit('/');
    segments.next()?;
    segments.next().filter(|id| !id.is_empty())
}
