//! MQTT sink: lifecycle and publish pipeline
//!
//! [`MqttSink`] is the host-facing component. `init` resolves configuration,
//! `connect` opens the broker session, `publish` turns one event into one
//! MQTT message, and `disconnect` tears the session down.
//!
//! Per-event work, in order: resolve and validate the topic (payload
//! attribute first, then the dynamic `topic` option), resolve and validate
//! the QoS, resolve the retain flag, encode the event as JSON, check the
//! packet against `max.packet.size`, hand it to the [`ConnectionManager`].
//! Events rejected by any check never reach the client, so the session
//! survives them.

use crate::codec::JsonCodec;
use crate::config::{DynamicOptions, SinkConfig};
use crate::error::{sanitize_error_message, SinkError, SinkResult};
use crate::event::{AttributeValue, Event};
use crate::observability::{connection_span, publish_span, SinkMetrics, SinkMetricsSnapshot};
use crate::options::{parse_lenient_bool, DynamicContext, OptionHolder};
use crate::transport::mqtt::{
    map_qos, publish_packet_size, qos_level, validate_topic, MqttClient,
};
use crate::transport::manager::describe;
use crate::transport::{ConnectionManager, ConnectionState, PublishError, Transport};
use rumqttc::QoS;
use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Extension name the host uses to select this sink
pub const SINK_TYPE: &str = "mqtt";

/// The stream whose events this sink publishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDefinition {
    pub id: String,
}

impl StreamDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Host context handed to `init`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkContext {
    /// Name of the owning application, used in log fields
    pub app_name: Option<String>,
}

impl SinkContext {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: Some(app_name.into()),
        }
    }
}

/// Description of a message accepted by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedMessage {
    pub topic: String,
    pub qos: u8,
    pub retain: bool,
    pub payload_len: usize,
}

/// Per-event fault handled inside the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DropReason {
    /// The event has no JSON representation
    Encoding,
    /// The packet would exceed `max.packet.size`
    Oversized,
    /// The client rejected the message
    Transport,
}

/// What happened to one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PublishOutcome {
    Published(PublishedMessage),
    Dropped(DropReason),
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published(_))
    }
}

/// Event sink that publishes JSON messages to an MQTT broker
pub struct MqttSink<T: Transport = MqttClient> {
    stream_id: String,
    app_name: Option<String>,
    config: Arc<SinkConfig>,
    options: DynamicOptions,
    manager: ConnectionManager<T>,
    metrics: SinkMetrics,
}

impl MqttSink<MqttClient> {
    /// Resolve configuration for `stream`; performs no I/O
    pub fn init(
        stream: &StreamDefinition,
        options: &OptionHolder,
        context: &SinkContext,
    ) -> SinkResult<Self> {
        Self::init_with_transport(stream, options, context, MqttClient::new())
    }
}

impl<T: Transport> MqttSink<T> {
    /// Resolve configuration for `stream` over a caller-supplied transport
    pub fn init_with_transport(
        stream: &StreamDefinition,
        options: &OptionHolder,
        context: &SinkContext,
        transport: T,
    ) -> SinkResult<Self> {
        let (config, dynamic) = SinkConfig::resolve(options)?;
        let config = Arc::new(config);

        info!(
            stream_id = %stream.id,
            app = context.app_name.as_deref().unwrap_or(""),
            broker_url = %sanitize_error_message(&config.broker_url),
            topic = %config.topic_static,
            "MQTT sink initialised"
        );

        Ok(Self {
            stream_id: stream.id.clone(),
            app_name: context.app_name.clone(),
            manager: ConnectionManager::new(Arc::clone(&config), stream.id.clone(), transport),
            config,
            options: dynamic,
            metrics: SinkMetrics::new(),
        })
    }

    /// Option keys re-evaluated for every event
    pub fn supported_dynamic_options() -> &'static [&'static str] {
        &DynamicOptions::SUPPORTED
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Client id of the session, once `connect` has chosen one
    pub fn client_id(&self) -> Option<&str> {
        self.manager.client_id()
    }

    pub fn metrics(&self) -> SinkMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Open the broker session
    ///
    /// Fails with [`SinkError::ConnectionUnavailable`]; the host owns retry.
    pub async fn connect(&self) -> SinkResult<()> {
        let span = connection_span!(
            stream_id = %self.stream_id,
            app = self.app_name.as_deref().unwrap_or("")
        );

        async {
            if self.state() == ConnectionState::Connected {
                return self.manager.connect().await;
            }

            self.metrics.connection_attempt();
            match self.manager.connect().await {
                Ok(()) => {
                    self.metrics.connection_established();
                    Ok(())
                }
                Err(e) => {
                    self.metrics.connection_failed();
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Publish one host payload
    ///
    /// `payload` must be a mapping. `context` supplies the bindings for
    /// dynamic options and is normally built from the same event.
    pub async fn publish(
        &self,
        payload: &AttributeValue,
        context: &DynamicContext<'_>,
    ) -> SinkResult<PublishOutcome> {
        let event = payload
            .as_map()
            .ok_or_else(|| SinkError::UnsupportedPayload {
                stream_id: self.stream_id.clone(),
                found: payload.kind().to_string(),
            })?;
        self.publish_mapping(event, context).await
    }

    /// Publish an event, evaluating dynamic options against its own attributes
    pub async fn publish_event(&self, event: &Event) -> SinkResult<PublishOutcome> {
        self.publish_mapping(event, &DynamicContext::new(event)).await
    }

    async fn publish_mapping(
        &self,
        event: &Event,
        context: &DynamicContext<'_>,
    ) -> SinkResult<PublishOutcome> {
        let span = publish_span!(stream_id = %self.stream_id);

        async {
            let (topic, body) = self.resolve_topic(event, context);
            self.check_topic(&topic)?;
            let qos = self.resolve_qos(context)?;
            let retain = parse_lenient_bool(&self.options.retain.evaluate(context));

            let payload = match JsonCodec::encode(&body) {
                Ok(payload) => payload,
                Err(e) => {
                    self.metrics.encoding_failed();
                    error!(topic = %topic, error = %e, "Dropping event that cannot be encoded");
                    return Ok(PublishOutcome::Dropped(DropReason::Encoding));
                }
            };

            let packet_size = publish_packet_size(&topic, qos, payload.len());
            if packet_size > self.config.max_packet_size {
                self.metrics.payload_too_large();
                warn!(
                    topic = %topic,
                    packet_size,
                    max_packet_size = self.config.max_packet_size,
                    "Dropping event larger than the packet size limit"
                );
                return Ok(PublishOutcome::Dropped(DropReason::Oversized));
            }

            self.send(topic, qos, retain, payload).await
        }
        .instrument(span)
        .await
    }

    /// Topic attribute wins over the `topic` option; the attribute is removed
    /// from a copy of the event so the host's value stays untouched
    fn resolve_topic<'e>(
        &self,
        event: &'e Event,
        context: &DynamicContext<'_>,
    ) -> (String, Cow<'e, Event>) {
        match extract_topic_attribute(event, self.config.topic_attribute.as_deref()) {
            Some((topic, stripped)) => (topic, Cow::Owned(stripped)),
            None => (self.options.topic.evaluate(context), Cow::Borrowed(event)),
        }
    }

    fn check_topic(&self, topic: &str) -> SinkResult<()> {
        validate_topic(topic).map_err(|reason| {
            self.metrics.invalid_topic();
            let error = SinkError::invalid_topic(topic, &self.stream_id, reason);
            warn!(error = %error, "Event dropped");
            error
        })
    }

    fn resolve_qos(&self, context: &DynamicContext<'_>) -> SinkResult<QoS> {
        let raw = self.options.qos.evaluate(context);
        match parse_qos(&raw) {
            Some(qos) => Ok(qos),
            None => {
                self.metrics.invalid_qos();
                let error = SinkError::invalid_qos(raw, &self.stream_id);
                warn!(error = %error, "Event dropped");
                Err(error)
            }
        }
    }

    async fn send(
        &self,
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> SinkResult<PublishOutcome> {
        let was_connected = self.state() == ConnectionState::Connected;
        let payload_len = payload.len();
        let started = Instant::now();

        match self.manager.publish(&topic, qos, retain, payload).await {
            Ok(()) => {
                self.metrics.message_published(payload_len, started.elapsed());
                debug!(topic = %topic, qos = qos_level(qos), retain, payload_len, "Event published");
                Ok(PublishOutcome::Published(PublishedMessage {
                    topic,
                    qos: qos_level(qos),
                    retain,
                    payload_len,
                }))
            }
            Err(PublishError::NotConnected(state)) => {
                if was_connected {
                    self.metrics.connection_lost();
                }
                self.metrics.rejected_not_connected();
                Err(SinkError::connection_unavailable(
                    &self.config.broker_url,
                    &self.stream_id,
                    format!("not connected (state {state:?})"),
                ))
            }
            Err(PublishError::Transport(e)) => {
                self.metrics.transport_failed();
                error!(
                    topic = %topic,
                    error = %describe(&e),
                    "Error publishing event to MQTT broker"
                );
                Ok(PublishOutcome::Dropped(DropReason::Transport))
            }
        }
    }

    /// Disconnect and close; safe to call more than once
    pub async fn disconnect(&self) {
        let span = connection_span!(stream_id = %self.stream_id);

        async {
            self.manager.disconnect().await;
            self.manager.close().await;
            self.metrics.disconnected();
        }
        .instrument(span)
        .await
    }

    /// Release what remains; the sink cannot be used afterwards
    pub async fn destroy(self) {
        self.manager.close().await;
        self.manager.destroy();
    }
}

/// Topic taken from a string attribute, plus the event without that attribute
fn extract_topic_attribute(event: &Event, attribute: Option<&str>) -> Option<(String, Event)> {
    let attribute = attribute?;
    let topic = event.get(attribute)?.as_str()?.to_string();

    let mut stripped = event.clone();
    stripped.remove(attribute);
    Some((topic, stripped))
}

/// Integer parse of a QoS option value, accepted only for 0, 1 and 2
fn parse_qos(raw: &str) -> Option<QoS> {
    let level: i64 = raw.trim().parse().ok()?;
    map_qos(u8::try_from(level).ok()?)
}
