//! Mock implementations for testing
//!
//! Provides a mock [`Transport`] that records connect attempts and published
//! messages, and can be told to fail, so the sink can be exercised without an
//! MQTT broker.

use crate::transport::mqtt::{LinkState, MqttError};
use crate::transport::{ConnectSettings, Transport};
use async_trait::async_trait;
use rumqttc::QoS;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A message captured by [`MockTransport::publish`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPublish {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

impl RecordedPublish {
    /// Payload parsed as JSON; `Value::Null` if it is not valid JSON
    pub fn payload_json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }

    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("")
    }
}

/// Mock transport for testing
///
/// Clones share state, so a test can keep one handle while the sink owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    published: Arc<Mutex<Vec<RecordedPublish>>>,
    connect_settings: Arc<Mutex<Vec<ConnectSettings>>>,
    connected: Arc<AtomicBool>,
    should_fail_connect: Arc<AtomicBool>,
    should_fail_publish: Arc<AtomicBool>,
    should_fail_teardown: Arc<AtomicBool>,
    disconnect_calls: Arc<AtomicUsize>,
    close_calls: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_failure() -> Self {
        let transport = Self::new();
        transport.fail_connect(true);
        transport
    }

    pub fn fail_connect(&self, fail: bool) {
        self.should_fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.should_fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn fail_teardown(&self, fail: bool) {
        self.should_fail_teardown.store(fail, Ordering::SeqCst);
    }

    /// Simulate the broker going away underneath an open session
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<RecordedPublish> {
        self.published.lock().await.clone()
    }

    pub async fn connect_settings(&self) -> Vec<ConnectSettings> {
        self.connect_settings.lock().await.clone()
    }

    pub async fn connect_attempts(&self) -> usize {
        self.connect_settings.lock().await.len()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub async fn clear_history(&self) {
        self.published.lock().await.clear();
        self.connect_settings.lock().await.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self, settings: &ConnectSettings) -> Result<(), MqttError> {
        self.connect_settings.lock().await.push(settings.clone());

        if self.should_fail_connect.load(Ordering::SeqCst) {
            return Err(MqttError::ConnectionFailedStr(
                "Mock connection failure".to_string(),
            ));
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), MqttError> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected {
                state: LinkState::Disconnected("Mock link dropped".to_string()),
            });
        }
        if self.should_fail_publish.load(Ordering::SeqCst) {
            return Err(MqttError::PublishFailed("Mock publish failure".into()));
        }

        self.published.lock().await.push(RecordedPublish {
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);

        if self.should_fail_teardown.load(Ordering::SeqCst) {
            return Err(MqttError::DisconnectFailed("Mock disconnect failure".into()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), MqttError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);

        if self.should_fail_teardown.load(Ordering::SeqCst) {
            return Err(MqttError::ConnectionFailedStr(
                "Mock close failure".to_string(),
            ));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
