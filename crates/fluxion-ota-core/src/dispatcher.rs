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

//! Inbound message routing and bus subscription ownership

use crate::bus::MessageBus;
use crate::device::LiveSubscription;
use crate::engine::ReconciliationEngine;
use crate::error::{FleetError, Result};
use crate::topics;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

/// Event handed from the transport to the single dispatcher task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Message { topic: String, payload: Vec<u8> },
    /// Broker session (re)established; subscriptions must be renewed
    Connected,
}

/// Where an inbound topic goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Discovery,
    /// Every device currently sharing this live topic, sorted by id
    LiveStatus { device_ids: Vec<String> },
    Ignored,
}

/// Live-topic to device-ids table.
///
/// Devices with identical topic settings (cloned configs) share one live
/// topic, so each topic keeps a set of owners. The broker subscription is
/// dropped only when the last owner releases it. A route stays registered
/// even if the broker rejected the subscribe, so
/// [`Dispatcher::resubscribe_all`] can retry it after a reconnect.
#[derive(Debug, Default)]
pub struct LiveRoutes {
    routes: RwLock<HashMap<String, HashSet<String>>>,
}

impl LiveRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices routed from `topic`, sorted by id
    pub fn owners(&self, topic: &str) -> Vec<String> {
        let mut owners: Vec<String> = self
            .routes
            .read()
            .get(topic)
            .map(|owners| owners.iter().cloned().collect())
            .unwrap_or_default();
        owners.sort_unstable();
        owners
    }

    pub fn topics(&self) -> Vec<String> {
        self.routes.read().keys().cloned().collect()
    }

    /// Number of distinct live topics
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// Register `device_id` as an owner of `topic` and subscribe to it on the bus.
    ///
    /// The subscribe is issued even when the topic already has owners so the
    /// broker replays the retained last-will for the newcomer.
    pub async fn subscribe(
        &self,
        bus: &dyn MessageBus,
        device_id: &str,
        topic: &str,
    ) -> LiveSubscription {
        // Route first: a retained LWT can arrive as soon as the broker acks
        let shared_with = {
            let mut routes = self.routes.write();
            let owners = routes.entry(topic.to_owned()).or_default();
            owners.insert(device_id.to_owned());
            owners.len() - 1
        };
        if shared_with > 0 {
            debug!("Live topic {topic} shared by {device_id} and {shared_with} other device(s)");
        }

        match bus.subscribe(topic).await {
            Ok(()) => debug!("Subscribed to live topic {topic} for {device_id}"),
            Err(e) => error!(
                "Failed to subscribe to live topic {topic} for {device_id}, will retry on reconnect: {e}"
            ),
        }

        LiveSubscription {
            topic: topic.to_owned(),
        }
    }

    /// Drop `device_id` from the topic's owners. The broker subscription is
    /// released once no owner is left; best effort, the route is removed even
    /// when the broker call fails.
    pub async fn release(
        &self,
        bus: &dyn MessageBus,
        device_id: &str,
        subscription: &LiveSubscription,
    ) {
        let last_owner = {
            let mut routes = self.routes.write();
            let owned = routes
                .get_mut(&subscription.topic)
                .is_some_and(|owners| owners.remove(device_id));
            if !owned {
                None
            } else if routes
                .get(&subscription.topic)
                .is_some_and(HashSet::is_empty)
            {
                routes.remove(&subscription.topic);
                Some(true)
            } else {
                Some(false)
            }
        };

        let Some(last_owner) = last_owner else {
            debug!(
                "Live topic {} not routed to {device_id}, skipping unsubscribe",
                subscription.topic
            );
            return;
        };

        if !last_owner {
            debug!(
                "Live topic {} still used by other devices, keeping subscription",
                subscription.topic
            );
            return;
        }

        match bus.unsubscribe(&subscription.topic).await {
            Ok(()) => debug!("Released live topic {} for {device_id}", subscription.topic),
            Err(e) => warn!(
                "Failed to unsubscribe live topic {} for {device_id}: {e}",
                subscription.topic
            ),
        }
    }
}

/// Routes bus traffic to the reconciliation engine
pub struct Dispatcher {
    engine: Arc<ReconciliationEngine>,
    discovery_root: String,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("discovery_root", &self.discovery_root)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(engine: Arc<ReconciliationEngine>, discovery_root: impl Into<String>) -> Self {
        Self {
            engine,
            discovery_root: discovery_root.into(),
        }
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    pub fn discovery_filter(&self) -> String {
        topics::discovery_filter(&self.discovery_root)
    }

    /// Subscribe to the discovery wildcard
    pub async fn start(&self) -> Result<()> {
        let filter = self.discovery_filter();
        self.engine.bus().subscribe(&filter).await?;
        info!("Listening for device discovery on {filter}");
        Ok(())
    }

    /// Renew the discovery subscription and every registered live topic
    pub async fn resubscribe_all(&self) -> Result<()> {
        self.start().await?;

        let topics = self.engine.routes().topics();
        let mut failed = 0_usize;
        for topic in &topics {
            if let Err(e) = self.engine.bus().subscribe(topic).await {
                warn!("Failed to renew live topic subscription {topic}: {e}");
                failed += 1;
            }
        }

        info!(
            "Renewed {}/{} live topic subscriptions",
            topics.len() - failed,
            topics.len()
        );
        Ok(())
    }

    pub fn route(&self, topic: &str) -> Route {
        if topics::is_discovery_config(topic) {
            return Route::Discovery;
        }
        let device_ids = self.engine.routes().owners(topic);
        if device_ids.is_empty() {
            Route::Ignored
        } else {
            Route::LiveStatus { device_ids }
        }
    }

    /// Handle one inbound message. Errors are logged here and never propagate.
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) {
        let result = match self.route(topic) {
            Route::Discovery => self.engine.handle_discovery(topic, payload).await,
            Route::LiveStatus { device_ids } => device_ids
                .iter()
                .try_for_each(|device_id| self.engine.handle_live_status(device_id, payload)),
            Route::Ignored => {
                trace!("Dropping message on unrouted topic {topic}");
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(FleetError::MalformedPayload(reason)) => {
                warn!("Dropping malformed message on {topic}: {reason}");
            }
            Err(e) => error!("Error processing message on {topic}: {e}"),
        }
    }

    /// Consume transport events one at a time until shutdown or until the
    /// transport closes its side of the channel.
    ///
    /// The channel is unbounded: handling an event may await bus requests
    /// that only the transport's event loop drains, so that loop must never
    /// block on forwarding.
    pub async fn run(
        &self,
        mut events: mpsc::UnboundedReceiver<BusEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Dispatcher shutting down");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("Transport closed, dispatcher stopping");
                        break;
                    };
                    // Bus requests stop completing once the transport shuts down
                    tokio::select! {
                        _ = shutdown.changed() => {
                            info!("Dispatcher shutting down");
                            break;
                        }
                        () = self.handle_event(event) => {}
                    }
                }
            }
        }
    }

    async fn handle_event(&self, event: BusEvent) {
        match event {
            BusEvent::Message { topic, payload } => self.dispatch(&topic, &payload).await,
            BusEvent::Connected => {
                if let Err(e) = self.resubscribe_all().await {
                    error!("Failed to renew subscriptions after connect: {e}");
                }
            }
        }
    }
}
