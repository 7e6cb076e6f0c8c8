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

//! FluxION OTA - entry point
//!
//! Connects to the MQTT broker, tracks every Tasmota device announcing itself
//! on the discovery topic and keeps the latest firmware release up to date.

mod mqtt;

use anyhow::{Context, Result, bail};
use fluxion_ota_core::{
    Dispatcher, FleetConfig, FleetObserver, LoggingObserver, MessageBus, ReconciliationEngine,
    ReleasePoller, VersionFeed,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                println!("FluxION OTA - Tasmota fleet firmware tracker");
                println!("Version: {VERSION}");
                println!();
                println!("Usage: fluxion-ota [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Load configuration from PATH (.json or .toml)");
                println!("  -h, --help           Print this help message");
                println!("  -v, --version        Print version");
                return Ok(());
            }
            "--version" | "-v" => {
                println!("{VERSION}");
                return Ok(());
            }
            "--config" | "-c" => {
                let Some(path) = args.next() else {
                    bail!("--config requires a path");
                };
                config_path = Some(PathBuf::from(path));
            }
            other => bail!("Unknown argument: {other} (see --help)"),
        }
    }

    // Respects RUST_LOG
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fluxion_ota=debug")),
        )
        .init();

    info!("Starting FluxION OTA {VERSION}");

    let config = FleetConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    info!(
        "MQTT broker {}:{} as {}, discovery on {}",
        config.mqtt.host, config.mqtt.port, config.mqtt.client_id, config.mqtt.discovery_root
    );
    info!(
        "Release feed {} every {}s",
        config.release_feed.repository, config.release_feed.check_interval_secs
    );

    run(config).await
}

async fn run(config: FleetConfig) -> Result<()> {
    let feed = Arc::new(VersionFeed::new(&config.release_feed)?);
    let (bus, event_loop) = mqtt::connect(&config.mqtt);
    let engine = Arc::new(ReconciliationEngine::new(
        feed,
        Arc::new(bus.clone()) as Arc<dyn MessageBus>,
        Arc::new(LoggingObserver) as Arc<dyn FleetObserver>,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&engine),
        config.mqtt.discovery_root.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let transport = mqtt::spawn_event_loop(
        bus,
        event_loop,
        events_tx,
        config.mqtt.reconnect_delay(),
        shutdown_rx.clone(),
    );

    // The discovery subscription is (re)issued on every ConnAck
    let dispatcher_task = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        let shutdown = shutdown_rx.clone();
        async move { dispatcher.run(events_rx, shutdown).await }
    });

    let poller = ReleasePoller::new(Arc::clone(&engine), config.release_feed.check_interval())
        .spawn(shutdown_rx);

    wait_for_shutdown_signal().await?;
    info!("Shutdown signal received");

    if shutdown_tx.send(true).is_err() {
        warn!("All tasks already stopped");
    }

    for (name, task) in [
        ("MQTT event loop", transport),
        ("dispatcher", dispatcher_task),
        ("release poller", poller),
    ] {
        match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{name} task failed: {e}"),
            Err(_) => warn!("{name} did not stop within {}s", SHUTDOWN_GRACE.as_secs()),
        }
    }

    info!("Shutting down with {} tracked device(s)", engine.registry().len());
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")
}
