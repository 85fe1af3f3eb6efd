//! Sink configuration
//!
//! Resolves the host's option map into an immutable [`SinkConfig`] plus the
//! three dynamic option handles evaluated per event. A [`SinkDefinition`] can
//! also be loaded from a TOML file for the `mqtt-sink` binary.

use crate::options::{parse_lenient_bool, DynamicOption, OptionHolder};
use crate::transport::mqtt::MAX_PACKET_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::Path;
use thiserror::Error;

/// Option keys understood by the sink
pub mod keys {
    pub const BROKER_URL: &str = "url";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const CLIENT_ID: &str = "client.id";
    pub const TOPIC: &str = "topic";
    pub const TOPIC_ATTRIBUTE: &str = "topic.attribute";
    pub const QOS: &str = "quality.of.service";
    pub const CLEAN_SESSION: &str = "clean.session";
    pub const MESSAGE_RETAIN: &str = "message.retain";
    pub const KEEP_ALIVE: &str = "keep.alive";
    pub const CONNECTION_TIMEOUT: &str = "connection.timeout";
    pub const MAX_PACKET_SIZE: &str = "max.packet.size";
}

/// Defaults applied when an option is absent
pub mod defaults {
    pub const TOPIC: &str = "null";
    pub const TOPIC_ATTRIBUTE: &str = "topic";
    pub const QOS: &str = "1";
    pub const MESSAGE_RETAIN: &str = "false";
    pub const CLEAN_SESSION: &str = "true";
    pub const KEEP_ALIVE_SECS: &str = "60";
    pub const CONNECTION_TIMEOUT_SECS: &str = "30";
    pub const MAX_PACKET_SIZE: &str = "268435455";
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Required option '{0}' is missing")]
    MissingOption(String),
    #[error("Option '{key}' must be an integer in {min}..={max}, got '{value}'")]
    InvalidInteger {
        key: String,
        value: String,
        min: u64,
        max: u64,
    },
    #[error("Option '{key}' is static and cannot reference event attributes: '{value}'")]
    DynamicStaticOption { key: String, value: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Static sink configuration, immutable after init
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkConfig {
    pub broker_url: String,
    /// Empty means a client id is generated at connect
    pub client_id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub clean_session: bool,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    /// Largest PUBLISH packet sent to the broker, in bytes
    pub max_packet_size: usize,
    pub topic_static: String,
    /// `None` disables attribute-based topics
    pub topic_attribute: Option<String>,
    pub qos_static: String,
    pub retain_static: String,
}

/// Dynamic option handles registered at init
#[derive(Debug, Clone)]
pub struct DynamicOptions {
    pub topic: DynamicOption,
    pub qos: DynamicOption,
    pub retain: DynamicOption,
}

impl DynamicOptions {
    /// Keys of the options re-evaluated for every event
    pub const SUPPORTED: [&'static str; 3] = [keys::TOPIC, keys::QOS, keys::MESSAGE_RETAIN];
}

impl SinkConfig {
    /// Resolve the host option store into a validated configuration
    pub fn resolve(options: &OptionHolder) -> Result<(SinkConfig, DynamicOptions), ConfigError> {
        let broker_url = options.validate_and_get_static_value(keys::BROKER_URL)?;
        if broker_url.trim().is_empty() {
            return Err(ConfigError::MissingOption(keys::BROKER_URL.to_string()));
        }

        let topic_attribute = options
            .static_value_or(keys::TOPIC_ATTRIBUTE, defaults::TOPIC_ATTRIBUTE)?;
        let topic_attribute = (!topic_attribute.is_empty()).then_some(topic_attribute);

        let dynamic = DynamicOptions {
            topic: options.get_or_create_option(keys::TOPIC, defaults::TOPIC),
            qos: options.get_or_create_option(keys::QOS, defaults::QOS),
            retain: options.get_or_create_option(keys::MESSAGE_RETAIN, defaults::MESSAGE_RETAIN),
        };

        let config = SinkConfig {
            broker_url,
            client_id: options.static_value_or(keys::CLIENT_ID, "")?,
            username: options.static_value_or(keys::USERNAME, "")?,
            password: options.static_value_or(keys::PASSWORD, "")?,
            clean_session: parse_lenient_bool(
                &options.static_value_or(keys::CLEAN_SESSION, defaults::CLEAN_SESSION)?,
            ),
            // CONNECT carries keep alive as a u16
            keep_alive_secs: parse_bounded(
                keys::KEEP_ALIVE,
                &options.static_value_or(keys::KEEP_ALIVE, defaults::KEEP_ALIVE_SECS)?,
                0..=u64::from(u16::MAX),
            )?,
            connect_timeout_secs: parse_bounded(
                keys::CONNECTION_TIMEOUT,
                &options.static_value_or(
                    keys::CONNECTION_TIMEOUT,
                    defaults::CONNECTION_TIMEOUT_SECS,
                )?,
                0..=u64::MAX,
            )?,
            max_packet_size: parse_bounded(
                keys::MAX_PACKET_SIZE,
                &options.static_value_or(keys::MAX_PACKET_SIZE, defaults::MAX_PACKET_SIZE)?,
                1..=MAX_PACKET_SIZE as u64,
            )? as usize,
            topic_static: dynamic.topic.raw().to_string(),
            topic_attribute,
            qos_static: dynamic.qos.raw().to_string(),
            retain_static: dynamic.retain.raw().to_string(),
        };

        Ok((config, dynamic))
    }

    /// Whether the broker should authenticate this client
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

fn parse_bounded(key: &str, value: &str, range: RangeInclusive<u64>) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|n| range.contains(n))
        .ok_or_else(|| ConfigError::InvalidInteger {
            key: key.to_string(),
            value: value.to_string(),
            min: *range.start(),
            max: *range.end(),
        })
}

/// Stream section of a sink definition file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamSection {
    /// Identifier of the stream that feeds the sink
    pub id: String,
    /// Owning application name, used in log context
    #[serde(default)]
    pub app: Option<String>,
}

/// Scalar option value as written in TOML
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OptionValue {
    Text(String),
    Integer(i64),
    Flag(bool),
}

impl OptionValue {
    fn into_option_string(self) -> String {
        match self {
            OptionValue::Text(s) => s,
            OptionValue::Integer(i) => i.to_string(),
            OptionValue::Flag(b) => b.to_string(),
        }
    }
}

/// A sink definition file: the stream it serves plus its options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SinkDefinition {
    pub stream: StreamSection,
    #[serde(default)]
    pub options: BTreeMap<String, OptionValue>,
}

impl SinkDefinition {
    /// Load a sink definition from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let definition: SinkDefinition = toml::from_str(content)?;
        if definition.stream.id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "[stream] id must not be empty".to_string(),
            ));
        }
        Ok(definition)
    }

    /// Option store for [`crate::sink::MqttSink::init`]
    pub fn option_holder(&self) -> OptionHolder {
        self.options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone().into_option_string()))
            .collect()
    }
}
