//! MQTT 3.1.1 client implementation for the event sink
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure link state, broker URL parsing, and option building
//! - [`message_handler`] - Pure routing of event loop notifications
//! - [`client`] - Impure I/O operations and event loop coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_event_sink::transport::mqtt::{generate_client_id, MqttClient, MAX_PACKET_SIZE};
//! use mqtt_event_sink::transport::{ConnectSettings, Transport};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let settings = ConnectSettings {
//!     broker_url: "tcp://localhost:1883".to_string(),
//!     client_id: generate_client_id(),
//!     username: String::new(),
//!     password: String::new(),
//!     clean_session: true,
//!     keep_alive: Duration::from_secs(60),
//!     connect_timeout: Some(Duration::from_secs(30)),
//!     max_packet_size: MAX_PACKET_SIZE,
//! };
//!
//! let mut client = MqttClient::new();
//! client.connect(&settings).await?;
//! client
//!     .publish("sensors/room1", rumqttc::QoS::AtLeastOnce, false, b"{}".to_vec())
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{
    configure_mqtt_options, generate_client_id, map_qos, publish_packet_size, qos_level,
    validate_topic, BrokerEndpoint, LinkState, MqttError, MAX_PACKET_SIZE, MAX_TOPIC_LEN,
};
pub use message_handler::{EventRoute, MessageHandler};
