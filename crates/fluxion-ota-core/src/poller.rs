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

//! Periodic release feed refresh

use crate::engine::ReconciliationEngine;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Shortest accepted refresh interval
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Refreshes the release feed on a fixed interval and pushes new tags into
/// the engine. Stops when the shutdown signal fires, abandoning an in-flight
/// refresh.
#[derive(Debug)]
pub struct ReleasePoller {
    engine: Arc<ReconciliationEngine>,
    interval: Duration,
}

impl ReleasePoller {
    /// `interval` is clamped to at least [`MIN_INTERVAL`]
    pub fn new(engine: Arc<ReconciliationEngine>, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            warn!(
                "Release check interval {interval:?} too short, using {}s",
                MIN_INTERVAL.as_secs()
            );
        }
        Self {
            engine,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One refresh cycle; on failure the cached release stays as it was
    pub async fn poll_once(&self) -> Result<String> {
        let tag = self.engine.feed().refresh().await?;
        self.engine.apply_latest_release(&tag);
        Ok(tag)
    }

    /// Run until `shutdown` changes or its sender is dropped. The first
    /// refresh happens immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut check_interval = tokio::time::interval(self.interval);
        check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Checking {} releases every {}s",
            self.engine.feed().repository(),
            self.interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Release poller stopped");
                    break;
                }
                _ = check_interval.tick() => {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            info!("Release poller stopped during refresh");
                            break;
                        }
                        result = self.poll_once() => {
                            if let Err(e) = result {
                                warn!("Release check failed, keeping {:?}: {e}", self.engine.feed().current());
                            }
                        }
                    }
                }
            }
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
