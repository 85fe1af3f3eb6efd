//! Impure I/O operations for MQTT client
//!
//! This module handles network communication, async coordination, and
//! integration with the rumqttc client. Reconnection is not attempted here;
//! a lost link surfaces as [`MqttError::NotConnected`] and the host decides
//! when to connect again.

use super::connection::{configure_mqtt_options, LinkState, MqttError};
use super::message_handler::{EventRoute, MessageHandler};
use crate::transport::{ConnectSettings, Transport};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, EventLoop, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Capacity of the client's outbound request queue
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Bound on how long disconnect waits for the event loop to flush
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// MQTT 3.1.1 transport client backed by rumqttc
pub struct MqttClient {
    client: Option<Arc<Mutex<AsyncClient>>>,
    event_loop_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<LinkState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl MqttClient {
    pub fn new() -> Self {
        Self {
            client: None,
            event_loop_handle: None,
            state_rx: None,
            shutdown_tx: None,
        }
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (watch::Sender<LinkState>, watch::Receiver<LinkState>),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels = watch::channel(LinkState::Connecting);
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    /// Wait for connection confirmation (ConnAck), optionally bounded by a timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<LinkState>,
        timeout: Option<Duration>,
    ) -> Result<(), MqttError> {
        let confirmation = async {
            loop {
                let state = state_rx.borrow_and_update().clone();
                match state {
                    LinkState::Connected => return Ok(()),
                    LinkState::Disconnected(reason) => {
                        return Err(MqttError::ConnectionFailedStr(reason));
                    }
                    LinkState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
            }
        };

        match timeout {
            None => confirmation.await,
            Some(limit) => match tokio::time::timeout(limit, confirmation).await {
                Ok(result) => result,
                Err(_) => Err(MqttError::ConnectionFailedStr(
                    "ConnAck timeout - no connection confirmation received".to_string(),
                )),
            },
        }
    }

    /// Drive the rumqttc event loop until shutdown or until the link drops
    async fn run_event_loop(
        mut event_loop: EventLoop,
        state_tx: watch::Sender<LinkState>,
        mut shutdown_rx: watch::Receiver<bool>,
        client_id: String,
    ) {
        debug!(client_id = %client_id, "Starting MQTT event loop");

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Shutdown signal received, stopping event loop");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            if !Self::process_event_route(
                                MessageHandler::route_mqtt_event(&event),
                                &state_tx,
                            ) {
                                break;
                            }
                        }
                        Err(ConnectionError::RequestsDone) => {
                            state_tx.send_replace(LinkState::Disconnected(
                                "Client disconnected".to_string(),
                            ));
                            break;
                        }
                        Err(e) => {
                            let reason = crate::error::sanitize_error_message(&e.to_string());
                            if *state_tx.borrow() == LinkState::Connected {
                                error!(client_id = %client_id, error = %reason, "MQTT link lost");
                            }
                            state_tx.send_replace(LinkState::Disconnected(reason));
                            break;
                        }
                    }
                }
            }
        }

        debug!(client_id = %client_id, "MQTT event loop stopped");
    }

    /// Apply a routed event to the link state
    /// Returns true to keep polling, false to stop the loop
    fn process_event_route(route: EventRoute, state_tx: &watch::Sender<LinkState>) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                state_tx.send_replace(LinkState::Connected);
                true
            }
            EventRoute::ConnectionRefused(code) => {
                state_tx.send_replace(LinkState::Disconnected(format!(
                    "Connection refused: {code}"
                )));
                false
            }
            EventRoute::Disconnected => {
                warn!("Broker closed the MQTT session");
                state_tx.send_replace(LinkState::Disconnected(
                    "Broker disconnected".to_string(),
                ));
                false
            }
            EventRoute::DisconnectSent => {
                state_tx.send_replace(LinkState::Disconnected(
                    "Client disconnected".to_string(),
                ));
                false
            }
            EventRoute::DeliveryConfirmed { pkid } => {
                trace!(pkid, "Publish acknowledged");
                true
            }
            EventRoute::InfrastructureEvent(event) => {
                trace!(event = %event, "MQTT infrastructure event");
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Stop the background task without waiting for it
    fn stop_event_loop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }

    /// Get current link state
    /// Returns None if a connection hasn't been attempted yet
    pub fn link_state(&self) -> Option<LinkState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Check link state before operations
    fn check_link_state(&self) -> Result<(), MqttError> {
        let current_state = self
            .link_state()
            .unwrap_or_else(|| LinkState::Disconnected("Never connected".to_string()));

        if !current_state.can_publish() {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }

        Ok(())
    }
}

impl Default for MqttClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MqttClient {
    /// Connect to the broker, returning only once the CONNACK has been received
    async fn connect(&mut self, settings: &ConnectSettings) -> Result<(), MqttError> {
        // A previous session may still own a task if the link dropped
        self.stop_event_loop();

        let mqtt_options = configure_mqtt_options(settings)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            Self::setup_connection_channels();

        let handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            state_tx,
            shutdown_rx,
            settings.client_id.clone(),
        ));

        self.client = Some(Arc::new(Mutex::new(client)));
        self.event_loop_handle = Some(handle);
        self.state_rx = Some(state_rx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        if let Err(e) =
            Self::wait_for_connection_confirmation(state_rx, settings.connect_timeout).await
        {
            self.stop_event_loop();
            self.client = None;
            return Err(e);
        }

        info!(client_id = %settings.client_id, "MQTT session established");
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), MqttError> {
        self.check_link_state()?;

        let client = self.client.as_ref().ok_or_else(|| MqttError::NotConnected {
            state: LinkState::Disconnected("Client closed".to_string()),
        })?;

        let client = client.lock().await;
        client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    /// Send DISCONNECT and wait, bounded, for the event loop to stop
    async fn disconnect(&mut self) -> Result<(), MqttError> {
        let Some(client) = self.client.as_ref() else {
            return Ok(());
        };

        let result = {
            let client = client.lock().await;
            client
                .disconnect()
                .await
                .map_err(|e| MqttError::DisconnectFailed(Box::new(e)))
        };

        if let Some(handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event loop task ended with error: {}", e);
                }
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing abort");
                }
                _ => {}
            }
        }

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        result
    }

    async fn close(&mut self) -> Result<(), MqttError> {
        self.stop_event_loop();
        self.client = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.check_link_state().is_ok()
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        // Async DISCONNECT is impossible here; only the background task is cleaned up
        self.stop_event_loop();
    }
}
