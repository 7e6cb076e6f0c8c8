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

//! Shared test doubles for the fleet integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use fluxion_ota_core::{
    DeviceRecord, FleetError, FleetObserver, MessageBus, ReconciliationEngine, ReleaseFeedConfig,
    Result, VersionFeed,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    Publish { topic: String, payload: String },
    Subscribe(String),
    Unsubscribe(String),
}

/// In-memory bus recording every successful call. Each operation can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingBus {
    calls: Mutex<Vec<BusCall>>,
    pub fail_publish: AtomicBool,
    pub fail_subscribe: AtomicBool,
    pub fail_unsubscribe: AtomicBool,
}

impl RecordingBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<BusCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                BusCall::Publish { topic, payload } => Some((topic.clone(), payload.clone())),
                BusCall::Subscribe(_) | BusCall::Unsubscribe(_) => None,
            })
            .collect()
    }

    /// Topics currently subscribed, replaying subscribe/unsubscribe in order
    pub fn active_subscriptions(&self) -> HashSet<String> {
        let mut active = HashSet::new();
        for call in self.calls.lock().iter() {
            match call {
                BusCall::Subscribe(topic) => {
                    active.insert(topic.clone());
                }
                BusCall::Unsubscribe(topic) => {
                    active.remove(topic);
                }
                BusCall::Publish { .. } => {}
            }
        }
        active
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(FleetError::Transport("broker unavailable".to_owned()));
        }
        self.calls.lock().push(BusCall::Publish {
            topic: topic.to_owned(),
            payload: payload.to_owned(),
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(FleetError::Transport("subscribe rejected".to_owned()));
        }
        self.calls.lock().push(BusCall::Subscribe(topic.to_owned()));
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(FleetError::Transport("unsubscribe rejected".to_owned()));
        }
        self.calls.lock().push(BusCall::Unsubscribe(topic.to_owned()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Created(DeviceRecord),
    Changed(DeviceRecord),
    Removed(String),
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Notification>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn created_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, Notification::Created(_)))
            .count()
    }

    pub fn changed(&self) -> Vec<DeviceRecord> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Notification::Changed(record) => Some(record.clone()),
                Notification::Created(_) | Notification::Removed(_) => None,
            })
            .collect()
    }
}

impl FleetObserver for RecordingObserver {
    fn on_device_created(&self, device: &DeviceRecord) {
        self.events.lock().push(Notification::Created(device.clone()));
    }

    fn on_device_state_changed(&self, device: &DeviceRecord) {
        self.events.lock().push(Notification::Changed(device.clone()));
    }

    fn on_device_removed(&self, device_id: &str) {
        self.events
            .lock()
            .push(Notification::Removed(device_id.to_owned()));
    }
}

/// Feed that is never refreshed unless a test points it at a mock server
pub fn offline_feed() -> Arc<VersionFeed> {
    Arc::new(VersionFeed::new(&ReleaseFeedConfig::default()).unwrap())
}

pub fn engine_with_feed(
    bus: &Arc<RecordingBus>,
    feed: Arc<VersionFeed>,
) -> (Arc<ReconciliationEngine>, Arc<RecordingObserver>) {
    let observer = RecordingObserver::new();
    let engine = Arc::new(ReconciliationEngine::new(
        feed,
        Arc::clone(bus) as Arc<dyn MessageBus>,
        Arc::clone(&observer) as Arc<dyn FleetObserver>,
    ));
    (engine, observer)
}

pub fn engine(bus: &Arc<RecordingBus>) -> (Arc<ReconciliationEngine>, Arc<RecordingObserver>) {
    engine_with_feed(bus, offline_feed())
}

pub fn discovery_topic(device_id: &str) -> String {
    format!("tasmota/discovery/{device_id}/config")
}

pub fn discovery_payload(name: &str, sw: &str, topic: &str, full_topic: &str) -> Vec<u8> {
    serde_json::json!({
        "dn": name,
        "sw": sw,
        "t": topic,
        "ft": full_topic,
    })
    .to_string()
    .into_bytes()
}
