//! MQTT Event Sink
//!
//! Publishes structured events from an event-processing host to an MQTT
//! broker as JSON messages.
//!
//! # Overview
//!
//! This crate provides:
//! - Option resolution with per-event dynamic options (`topic`, `quality.of.service`, `message.retain`)
//! - A JSON codec for the event value tree
//! - An MQTT 3.1.1 transport built on rumqttc, behind a mockable [`transport::Transport`] trait
//! - A connection manager with an explicit lifecycle and idempotent teardown
//! - The [`MqttSink`] publish pipeline
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqtt_event_sink::{event, MqttSink, OptionHolder, SinkContext, StreamDefinition};
//!
//! # tokio_test::block_on(async {
//! let options = OptionHolder::new()
//!     .with("url", "tcp://localhost:1883")
//!     .with("topic", "sensors/{{room}}")
//!     .with("quality.of.service", "1");
//!
//! let sink = MqttSink::init(
//!     &StreamDefinition::new("SensorStream"),
//!     &options,
//!     &SinkContext::new("building-app"),
//! )?;
//!
//! sink.connect().await?;
//! sink.publish_event(&event! { "room" => "kitchen", "celsius" => 21.5 }).await?;
//! sink.disconnect().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod observability;
pub mod options;
pub mod sink;
pub mod testing;
pub mod transport;

pub use codec::JsonCodec;
pub use config::{ConfigError, DynamicOptions, SinkConfig, SinkDefinition};
pub use error::{SinkError, SinkResult};
pub use event::{AttributeValue, Event};
pub use options::{DynamicContext, DynamicOption, OptionHolder};
pub use sink::{
    DropReason, MqttSink, PublishOutcome, PublishedMessage, SinkContext, StreamDefinition,
    SINK_TYPE,
};
pub use transport::mqtt::MqttClient;
pub use transport::{ConnectionManager, ConnectionState, Transport};
