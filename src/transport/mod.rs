//! Transport layer for broker communication
//!
//! This module provides the transport abstraction used by the sink, the
//! `rumqttc`-backed MQTT implementation, and the [`manager::ConnectionManager`]
//! that owns a transport and guards its lifecycle.

use crate::config::SinkConfig;
use rumqttc::QoS;
use std::fmt;
use std::time::Duration;

pub mod manager;
pub mod mqtt;

pub use manager::{ConnectionManager, ConnectionState, PublishError};
pub use mqtt::MqttError;

/// Everything a transport needs to open a session with the broker
#[derive(Clone, PartialEq)]
pub struct ConnectSettings {
    pub broker_url: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub clean_session: bool,
    pub keep_alive: Duration,
    /// `None` waits for the CONNACK indefinitely
    pub connect_timeout: Option<Duration>,
    /// Packet size limit in both directions
    pub max_packet_size: usize,
}

impl ConnectSettings {
    /// Build connect settings from a resolved sink configuration
    pub fn from_config(config: &SinkConfig, client_id: impl Into<String>) -> Self {
        Self {
            broker_url: config.broker_url.clone(),
            client_id: client_id.into(),
            username: config.username.clone(),
            password: config.password.clone(),
            clean_session: config.clean_session,
            keep_alive: Duration::from_secs(config.keep_alive_secs),
            connect_timeout: (config.connect_timeout_secs > 0)
                .then(|| Duration::from_secs(config.connect_timeout_secs)),
            max_packet_size: config.max_packet_size,
        }
    }
}

impl fmt::Debug for ConnectSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectSettings")
            .field("broker_url", &crate::error::sanitize_error_message(&self.broker_url))
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"***")
            .field("clean_session", &self.clean_session)
            .field("keep_alive", &self.keep_alive)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_packet_size", &self.max_packet_size)
            .finish()
    }
}

/// Transport trait for publishing to a broker
///
/// This trait provides an abstraction over the MQTT client so the connection
/// manager and sink can be driven by [`crate::testing::MockTransport`] in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a session and wait for the broker to accept it
    async fn connect(&mut self, settings: &ConnectSettings) -> Result<(), MqttError>;

    /// Queue a message for delivery
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), MqttError>;

    /// Send DISCONNECT and stop the session
    async fn disconnect(&mut self) -> Result<(), MqttError>;

    /// Release the client handle and any background task
    async fn close(&mut self) -> Result<(), MqttError>;

    /// Check if the session is currently usable
    fn is_connected(&self) -> bool;
}
