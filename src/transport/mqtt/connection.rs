//! Pure connection state management for MQTT client
//!
//! This module contains pure functions for link state, broker URL handling,
//! MQTT option construction, and QoS mapping.

use crate::transport::ConnectSettings;
use rumqttc::{MqttOptions, QoS, Transport as RumqttcTransport};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Maximum client id length every MQTT 3.1.1 broker must accept
pub const MAX_PORTABLE_CLIENT_ID_LEN: usize = 23;

/// Largest packet the sink will hand to the client, the MQTT remaining-length limit
pub const MAX_PACKET_SIZE: usize = 268_435_455;

/// Topic names are length-prefixed with a u16
pub const MAX_TOPIC_LEN: usize = u16::MAX as usize;

/// State of the network link as seen by the event loop
#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    /// CONNECT sent, waiting for CONNACK
    Connecting,
    /// Broker accepted the session
    Connected,
    /// Link is down with reason
    Disconnected(String),
}

impl LinkState {
    pub fn can_publish(&self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: LinkState },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

/// Host, port and TLS flag extracted from a broker URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerEndpoint {
    /// Parse a broker URL such as `tcp://host:1883` or `ssl://host`
    pub fn parse(broker_url: &str) -> Result<Self, MqttError> {
        let invalid = || MqttError::InvalidBrokerUrl(broker_url.to_string());

        let normalized = normalize_broker_url(broker_url.trim());
        let url = Url::parse(&normalized).map_err(|_| invalid())?;
        let scheme = url.scheme();

        let default_port = default_port_for_scheme(scheme).ok_or_else(invalid)?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(invalid)?;

        Ok(Self {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port: url.port().unwrap_or(default_port),
            tls: is_tls_scheme(scheme),
        })
    }
}

fn normalize_broker_url(url: &str) -> String {
    if url.contains("://") {
        url.to_owned()
    } else {
        format!("tcp://{url}")
    }
}

fn default_port_for_scheme(scheme: &str) -> Option<u16> {
    match scheme {
        "mqtt" | "tcp" => Some(1883),
        "mqtts" | "ssl" | "tcps" => Some(8883),
        _ => None,
    }
}

fn is_tls_scheme(scheme: &str) -> bool {
    matches!(scheme, "mqtts" | "ssl" | "tcps")
}

/// Pure function to build MQTT options from connect settings
pub fn configure_mqtt_options(settings: &ConnectSettings) -> Result<MqttOptions, MqttError> {
    let endpoint = BrokerEndpoint::parse(&settings.broker_url)?;

    // rumqttc panics on these
    if settings.client_id.is_empty() || settings.client_id.starts_with(' ') {
        return Err(MqttError::ConnectionFailedStr(format!(
            "Invalid client id '{}'",
            settings.client_id
        )));
    }

    let mut mqtt_options =
        MqttOptions::new(settings.client_id.clone(), endpoint.host, endpoint.port);

    if endpoint.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    // MQTT 3.1.1 forbids a password without a username
    if !settings.username.is_empty() {
        mqtt_options.set_credentials(settings.username.clone(), settings.password.clone());
    }

    mqtt_options.set_keep_alive(settings.keep_alive);
    mqtt_options.set_clean_session(settings.clean_session);

    // The client default of 10KB would fail the whole event loop on one large event
    mqtt_options.set_max_packet_size(settings.max_packet_size, settings.max_packet_size);

    Ok(mqtt_options)
}

/// Encoded size of a PUBLISH packet carrying `payload_len` bytes on `topic`
pub fn publish_packet_size(topic: &str, qos: QoS, payload_len: usize) -> usize {
    let packet_id = if qos == QoS::AtMostOnce { 0 } else { 2 };
    let remaining = 2 + topic.len() + packet_id + payload_len;
    let length_bytes = match remaining {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    };
    1 + length_bytes + remaining
}

/// Check a topic name against the MQTT 3.1.1 rules for PUBLISH
pub fn validate_topic(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic must not be empty");
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err("topic exceeds 65535 bytes");
    }
    if topic.contains(['+', '#']) {
        return Err("topic must not contain wildcards");
    }
    if topic.contains('\0') {
        return Err("topic must not contain NUL");
    }
    Ok(())
}

/// Map a numeric QoS level onto the client enum
pub fn map_qos(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

/// Numeric level of a client QoS
pub fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

/// Generate a random client id that fits the portable MQTT 3.1.1 limit
pub fn generate_client_id() -> String {
    let id = format!("sink-{}", Uuid::new_v4().simple());
    id[..MAX_PORTABLE_CLIENT_ID_LEN].to_string()
}
