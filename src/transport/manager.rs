//! Connection lifecycle for a single sink instance
//!
//! [`ConnectionManager`] owns the transport, generates and remembers the
//! client id, and guards every operation with the lifecycle
//! [`ConnectionState`]. Teardown is idempotent and never fails; errors are
//! logged instead.

use super::mqtt::{generate_client_id, MqttError};
use super::{ConnectSettings, Transport};
use crate::config::SinkConfig;
use crate::error::{SinkError, SinkResult};
use rumqttc::QoS;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// Lifecycle state of the sink's broker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Uninitialized,
    Connected,
    Disconnected,
    Closed,
}

/// Why a publish could not be handed to the transport
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Not connected - current state: {0:?}")]
    NotConnected(ConnectionState),
    #[error(transparent)]
    Transport(MqttError),
}

/// Owns the transport for one sink and drives its lifecycle
pub struct ConnectionManager<T: Transport> {
    config: Arc<SinkConfig>,
    stream_id: String,
    transport: Mutex<T>,
    client_id: OnceLock<String>,
    state: watch::Sender<ConnectionState>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(config: Arc<SinkConfig>, stream_id: impl Into<String>, transport: T) -> Self {
        let (state, _) = watch::channel(ConnectionState::Uninitialized);
        Self {
            config,
            stream_id: stream_id.into(),
            transport: Mutex::new(transport),
            client_id: OnceLock::new(),
            state,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Client id used for the session, once one has been chosen
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.get().map(String::as_str)
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(stream_id = %self.stream_id, from = ?previous, to = ?next, "Connection state changed");
        }
    }

    fn unavailable(&self, reason: impl Into<String>) -> SinkError {
        SinkError::connection_unavailable(&self.config.broker_url, &self.stream_id, reason)
    }

    /// Open the broker session, generating a client id on first use
    pub async fn connect(&self) -> SinkResult<()> {
        match self.state() {
            ConnectionState::Closed => {
                return Err(self.unavailable("sink has been closed"));
            }
            ConnectionState::Connected => {
                warn!(stream_id = %self.stream_id, "connect called while already connected");
                return Ok(());
            }
            ConnectionState::Uninitialized | ConnectionState::Disconnected => {}
        }

        let client_id = self
            .client_id
            .get_or_init(|| {
                if self.config.client_id.is_empty() {
                    generate_client_id()
                } else {
                    self.config.client_id.clone()
                }
            })
            .clone();
        let settings = ConnectSettings::from_config(&self.config, client_id);

        let mut transport = self.transport.lock().await;
        match transport.connect(&settings).await {
            Ok(()) => {
                self.transition(ConnectionState::Connected);
                info!(
                    stream_id = %self.stream_id,
                    client_id = %settings.client_id,
                    authenticated = self.config.has_credentials(),
                    broker_url = %crate::error::sanitize_error_message(&self.config.broker_url),
                    "Connected to MQTT broker"
                );
                Ok(())
            }
            Err(e) => {
                let reason = describe(&e);
                error!(stream_id = %self.stream_id, error = %reason, "MQTT connect failed");
                Err(self.unavailable(reason))
            }
        }
    }

    /// Hand one message to the transport
    ///
    /// Publishes are serialized through the transport mutex, so one caller's
    /// messages reach the client queue in call order.
    pub async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), PublishError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(PublishError::NotConnected(state));
        }

        let transport = self.transport.lock().await;
        if !transport.is_connected() {
            return Err(self.link_lost("event loop reports the link down"));
        }

        match transport.publish(topic, qos, retain, payload).await {
            Ok(()) => Ok(()),
            Err(MqttError::NotConnected { state: link }) => Err(self.link_lost(&format!("{link:?}"))),
            Err(e) => Err(PublishError::Transport(e)),
        }
    }

    fn link_lost(&self, link: &str) -> PublishError {
        warn!(stream_id = %self.stream_id, link, "MQTT link is down");
        self.transition(ConnectionState::Disconnected);
        PublishError::NotConnected(ConnectionState::Disconnected)
    }

    /// Send DISCONNECT if connected; a no-op otherwise
    pub async fn disconnect(&self) {
        if self.state() != ConnectionState::Connected {
            debug!(stream_id = %self.stream_id, state = ?self.state(), "Nothing to disconnect");
            return;
        }

        let mut transport = self.transport.lock().await;
        if let Err(e) = transport.disconnect().await {
            error!(
                stream_id = %self.stream_id,
                error = %describe(&e),
                "Could not disconnect from MQTT broker"
            );
        }
        self.transition(ConnectionState::Disconnected);
        info!(stream_id = %self.stream_id, "Disconnected from MQTT broker");
    }

    /// Release the client handle; the manager cannot connect again afterwards
    pub async fn close(&self) {
        if self.state() == ConnectionState::Closed {
            return;
        }

        let mut transport = self.transport.lock().await;
        if let Err(e) = transport.close().await {
            error!(
                stream_id = %self.stream_id,
                error = %describe(&e),
                "Could not close MQTT client"
            );
        }
        self.transition(ConnectionState::Closed);
    }

    pub fn destroy(&self) {
        debug!(stream_id = %self.stream_id, "Connection manager destroyed");
    }
}

/// Render an error with its source chain, credentials redacted
pub(crate) fn describe(error: &MqttError) -> String {
    let mut text = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    crate::error::sanitize_error_message(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionHolder;
    use crate::testing::mocks::MockTransport;

    fn manager_with(options: OptionHolder, transport: MockTransport) -> ConnectionManager<MockTransport> {
        let (config, _) = SinkConfig::resolve(&options).unwrap();
        ConnectionManager::new(Arc::new(config), "TestStream", transport)
    }

    fn manager(transport: MockTransport) -> ConnectionManager<MockTransport> {
        manager_with(
            OptionHolder::new().with("url", "tcp://localhost:1883"),
            transport,
        )
    }

    #[tokio::test]
    async fn test_connect_transitions_to_connected() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());

        assert_eq!(manager.state(), ConnectionState::Uninitialized);
        manager.connect().await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(transport.connect_attempts().await, 1);
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_unavailable() {
        let transport = MockTransport::new();
        transport.fail_connect(true);
        let manager = manager(transport);

        let error = manager.connect().await.unwrap_err();

        assert!(error.is_connection_unavailable());
        let text = error.to_string();
        assert!(text.contains("tcp://localhost:1883"));
        assert!(text.contains("TestStream"));
        assert_eq!(manager.state(), ConnectionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_generated_client_id_reused_across_connects() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());

        manager.connect().await.unwrap();
        let first = manager.client_id().unwrap().to_string();
        assert!(!first.is_empty());

        manager.disconnect().await;
        manager.connect().await.unwrap();

        let settings = transport.connect_settings().await;
        assert_eq!(settings.len(), 2);
        assert_eq!(settings[0].client_id, first);
        assert_eq!(settings[1].client_id, first);
    }

    #[tokio::test]
    async fn test_configured_client_id_used() {
        let transport = MockTransport::new();
        let manager = manager_with(
            OptionHolder::new()
                .with("url", "tcp://localhost:1883")
                .with("client.id", "fixed-id"),
            transport.clone(),
        );

        manager.connect().await.unwrap();
        assert_eq!(manager.client_id(), Some("fixed-id"));
        assert_eq!(transport.connect_settings().await[0].client_id, "fixed-id");
    }

    #[tokio::test]
    async fn test_publish_requires_connected_state() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());

        let result = manager
            .publish("t", QoS::AtLeastOnce, false, b"{}".to_vec())
            .await;

        assert!(matches!(
            result,
            Err(PublishError::NotConnected(ConnectionState::Uninitialized))
        ));
        assert!(transport.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_lost_link_moves_to_disconnected() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());
        manager.connect().await.unwrap();

        transport.drop_link();
        let result = manager
            .publish("t", QoS::AtMostOnce, false, b"{}".to_vec())
            .await;

        assert!(matches!(result, Err(PublishError::NotConnected(_))));
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.connect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_transport_error_keeps_connection() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());
        manager.connect().await.unwrap();

        transport.fail_publish(true);
        let result = manager
            .publish("t", QoS::AtLeastOnce, false, b"{}".to_vec())
            .await;

        assert!(matches!(result, Err(PublishError::Transport(_))));
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());
        manager.connect().await.unwrap();

        manager.disconnect().await;
        manager.close().await;
        manager.disconnect().await;
        manager.close().await;

        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(transport.disconnect_calls(), 1);
        assert_eq!(transport.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_teardown_errors_are_swallowed() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());
        manager.connect().await.unwrap();

        transport.fail_teardown(true);
        manager.disconnect().await;
        manager.close().await;

        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_connect_after_close_fails() {
        let manager = manager(MockTransport::new());
        manager.close().await;

        let error = manager.connect().await.unwrap_err();
        assert!(error.is_connection_unavailable());
        assert!(error.to_string().contains("closed"));
    }

    #[tokio::test]
    async fn test_connect_when_connected_is_noop() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();

        assert_eq!(transport.connect_attempts().await, 1);
    }

    #[tokio::test]
    async fn test_lost_link_detected_before_publish() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());
        manager.connect().await.unwrap();

        transport.drop_link();
        let result = manager
            .publish("t", QoS::AtLeastOnce, false, b"{}".to_vec())
            .await;

        assert!(matches!(
            result,
            Err(PublishError::NotConnected(ConnectionState::Disconnected))
        ));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(transport.published().await.is_empty());
    }

    #[test]
    fn test_describe_includes_source_chain() {
        let error = MqttError::ConnectionFailed("password=hunter2 refused".to_string().into());
        let text = describe(&error);
        assert!(text.starts_with("Connection failed: "));
        assert!(!text.contains("hunter2"));
    }
}
