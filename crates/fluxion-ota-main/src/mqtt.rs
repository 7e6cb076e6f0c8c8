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

//! MQTT transport backed by rumqttc
//!
//! The dispatcher awaits client requests (subscribe on discovery) that only
//! the event loop drains from rumqttc's bounded request queue. The event loop
//! therefore forwards into an unbounded channel and never waits on the
//! dispatcher, otherwise a burst of retained discovery messages larger than
//! both queues would leave each task waiting on the other.

use async_trait::async_trait;
use fluxion_ota_core::{BusEvent, FleetError, MessageBus, MqttConfig};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// [`MessageBus`] over a rumqttc client. Cheap to clone.
#[derive(Clone, Debug)]
pub struct MqttBus {
    client: AsyncClient,
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish(&self, topic: &str, payload: &str) -> fluxion_ota_core::Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .await
            .map_err(|e| FleetError::Transport(format!("publish to {topic} failed: {e}")))
    }

    async fn subscribe(&self, topic: &str) -> fluxion_ota_core::Result<()> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| FleetError::Transport(format!("subscribe to {topic} failed: {e}")))
    }

    async fn unsubscribe(&self, topic: &str) -> fluxion_ota_core::Result<()> {
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| FleetError::Transport(format!("unsubscribe from {topic} failed: {e}")))
    }
}

/// Build the client and its event loop from configuration.
///
/// Nothing touches the network until the event loop is polled.
pub fn connect(config: &MqttConfig) -> (MqttBus, EventLoop) {
    let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);

    if let Some(username) = &config.username {
        mqtt_options.set_credentials(username, config.password.as_deref().unwrap_or_default());
    }

    mqtt_options.set_keep_alive(config.keep_alive());
    // Subscriptions are renewed on every ConnAck instead of relying on a persistent session
    mqtt_options.set_clean_session(true);

    let (client, event_loop) = AsyncClient::new(mqtt_options, config.channel_capacity);
    (MqttBus { client }, event_loop)
}

/// Drive the event loop until shutdown, forwarding publishes and connects to
/// the dispatcher. Connection errors are retried after `reconnect_delay`.
pub fn spawn_event_loop(
    bus: MqttBus,
    mut event_loop: EventLoop,
    events: mpsc::UnboundedSender<BusEvent>,
    reconnect_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("MQTT event loop stopping, disconnecting");
                    // Non-blocking: nothing drains the request queue after this
                    if let Err(e) = bus.client.try_disconnect() {
                        debug!("MQTT disconnect failed: {e}");
                    }
                    break;
                }
                result = event_loop.poll() => {
                    let forwarded = match result {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            info!("MQTT connection established ({:?})", ack.code);
                            Some(BusEvent::Connected)
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => Some(BusEvent::Message {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                        }),
                        Ok(Event::Incoming(Packet::Disconnect)) => {
                            warn!("MQTT broker sent disconnect");
                            None
                        }
                        Ok(event) => {
                            debug!("MQTT event: {event:?}");
                            None
                        }
                        Err(e) => {
                            error!(
                                "MQTT connection error, retrying in {}s: {e}",
                                reconnect_delay.as_secs()
                            );
                            tokio::select! {
                                _ = shutdown.changed() => break,
                                () = tokio::time::sleep(reconnect_delay) => {}
                            }
                            None
                        }
                    };

                    if let Some(event) = forwarded
                        && events.send(event).is_err()
                    {
                        warn!("Dispatcher channel closed, terminating MQTT event loop");
                        break;
                    }
                }
            }
        }
    })
}
