//! Connection lifecycle tests
//!
//! Covers connect / publish / disconnect / destroy ordering, failure
//! surfacing, and client id handling. Most tests use `MockTransport`; the
//! refused-connection test talks to a closed local port, and the live
//! broker test is ignored unless a broker is available.

use mqtt_event_sink::testing::MockTransport;
use mqtt_event_sink::{
    event, ConnectionState, MqttSink, OptionHolder, PublishOutcome, SinkContext, SinkError,
    StreamDefinition,
};
use std::time::Duration;

const BROKER_URL: &str = "tcp://broker.test:1883";

fn sink_with(
    options: OptionHolder,
    transport: &MockTransport,
) -> MqttSink<MockTransport> {
    MqttSink::init_with_transport(
        &StreamDefinition::new("FooStream"),
        &options,
        &SinkContext::new("LifecycleApp"),
        transport.clone(),
    )
    .unwrap()
}

fn base_options() -> OptionHolder {
    OptionHolder::new()
        .with("url", BROKER_URL)
        .with("topic", "lifecycle/events")
}

#[tokio::test]
async fn test_full_lifecycle_state_transitions() {
    let transport = MockTransport::new();
    let sink = sink_with(base_options(), &transport);
    assert_eq!(sink.state(), ConnectionState::Uninitialized);

    sink.connect().await.unwrap();
    assert_eq!(sink.state(), ConnectionState::Connected);

    sink.publish_event(&event! { "a" => 1 }).await.unwrap();

    sink.disconnect().await;
    assert_eq!(sink.state(), ConnectionState::Closed);
    assert_eq!(transport.disconnect_calls(), 1);
    assert_eq!(transport.close_calls(), 1);

    sink.destroy().await;
    assert_eq!(transport.close_calls(), 1);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let transport = MockTransport::new();
    let sink = sink_with(base_options(), &transport);
    sink.connect().await.unwrap();

    sink.disconnect().await;
    sink.disconnect().await;
    sink.disconnect().await;

    assert_eq!(sink.state(), ConnectionState::Closed);
    assert_eq!(transport.disconnect_calls(), 1);
    assert_eq!(transport.close_calls(), 1);
}

#[tokio::test]
async fn test_disconnect_before_connect_is_safe() {
    let transport = MockTransport::new();
    let sink = sink_with(base_options(), &transport);

    sink.disconnect().await;

    assert_eq!(sink.state(), ConnectionState::Closed);
    assert_eq!(transport.disconnect_calls(), 0);
    assert_eq!(transport.close_calls(), 1);
}

#[tokio::test]
async fn test_destroy_without_connect() {
    let transport = MockTransport::new();
    let sink = sink_with(base_options(), &transport);

    sink.destroy().await;

    assert_eq!(transport.disconnect_calls(), 0);
    assert_eq!(transport.close_calls(), 1);
}

#[tokio::test]
async fn test_teardown_errors_are_swallowed() {
    let transport = MockTransport::new();
    let sink = sink_with(base_options(), &transport);
    sink.connect().await.unwrap();
    transport.fail_teardown(true);

    sink.disconnect().await;

    assert_eq!(sink.state(), ConnectionState::Closed);
    assert_eq!(transport.disconnect_calls(), 1);
    assert_eq!(transport.close_calls(), 1);
}

#[tokio::test]
async fn test_connect_after_close_is_rejected() {
    let transport = MockTransport::new();
    let sink = sink_with(base_options(), &transport);
    sink.connect().await.unwrap();
    sink.disconnect().await;

    let error = sink.connect().await.unwrap_err();

    assert!(error.is_connection_unavailable());
    assert_eq!(transport.connect_attempts().await, 1);
}

#[tokio::test]
async fn test_connect_twice_opens_one_session() {
    let transport = MockTransport::new();
    let sink = sink_with(base_options(), &transport);

    sink.connect().await.unwrap();
    sink.connect().await.unwrap();

    assert_eq!(transport.connect_attempts().await, 1);
    assert_eq!(sink.metrics().connection.connection_attempts, 1);
}

#[tokio::test]
async fn test_failed_connect_surfaces_connection_unavailable() {
    let transport = MockTransport::with_connect_failure();
    let sink = sink_with(base_options(), &transport);

    let error = sink.connect().await.unwrap_err();

    match &error {
        SinkError::ConnectionUnavailable {
            broker_url,
            stream_id,
            ..
        } => {
            assert_eq!(broker_url, BROKER_URL);
            assert_eq!(stream_id, "FooStream");
        }
        other => panic!("expected ConnectionUnavailable, got {other:?}"),
    }
    assert_eq!(sink.state(), ConnectionState::Uninitialized);

    let publish_error = sink.publish_event(&event! { "a" => 1 }).await.unwrap_err();
    assert!(publish_error.is_connection_unavailable());
    assert!(transport.published().await.is_empty());

    let metrics = sink.metrics();
    assert_eq!(metrics.connection.connection_failures, 1);
    assert_eq!(metrics.publish.rejected_not_connected, 1);
}

#[tokio::test]
async fn test_host_retry_after_failed_connect() {
    let transport = MockTransport::with_connect_failure();
    let sink = sink_with(base_options(), &transport);
    assert!(sink.connect().await.is_err());

    transport.fail_connect(false);
    sink.connect().await.unwrap();
    sink.publish_event(&event! { "a" => 1 }).await.unwrap();

    assert_eq!(transport.connect_attempts().await, 2);
    assert_eq!(transport.published().await.len(), 1);
}

#[tokio::test]
async fn test_lost_link_then_host_reconnects() {
    let transport = MockTransport::new();
    let sink = sink_with(base_options(), &transport);
    sink.connect().await.unwrap();

    transport.drop_link();
    let error = sink.publish_event(&event! { "seq" => 1 }).await.unwrap_err();
    assert!(error.is_connection_unavailable());
    assert_eq!(sink.state(), ConnectionState::Disconnected);

    sink.connect().await.unwrap();
    sink.publish_event(&event! { "seq" => 2 }).await.unwrap();

    let published = transport.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].payload_json()["seq"], 2);
    assert_eq!(sink.metrics().connection.connections_lost, 1);
}

#[tokio::test]
async fn test_generated_client_id_survives_reconnect() {
    let transport = MockTransport::new();
    let sink = sink_with(base_options(), &transport);
    assert_eq!(sink.client_id(), None);

    sink.connect().await.unwrap();
    transport.drop_link();
    let _ = sink.publish_event(&event! { "a" => 1 }).await;
    sink.connect().await.unwrap();

    let settings = transport.connect_settings().await;
    assert_eq!(settings.len(), 2);
    assert_eq!(settings[0].client_id, settings[1].client_id);
    assert!(!settings[0].client_id.is_empty());
    assert!(settings[0].client_id.len() <= 23);
    assert_eq!(sink.client_id(), Some(settings[0].client_id.as_str()));
}

#[tokio::test]
async fn test_generated_client_ids_differ_between_sinks() {
    let first = MockTransport::new();
    let second = MockTransport::new();
    let sink_a = sink_with(base_options(), &first);
    let sink_b = sink_with(base_options(), &second);

    sink_a.connect().await.unwrap();
    sink_b.connect().await.unwrap();

    assert_ne!(sink_a.client_id(), sink_b.client_id());
}

#[tokio::test]
async fn test_configured_session_settings_reach_transport() {
    let transport = MockTransport::new();
    let options = base_options()
        .with("client.id", "fixed-client")
        .with("username", "user")
        .with("password", "secret")
        .with("clean.session", "false")
        .with("keep.alive", "15")
        .with("connection.timeout", "0");
    let sink = sink_with(options, &transport);

    sink.connect().await.unwrap();

    let settings = &transport.connect_settings().await[0];
    assert_eq!(settings.client_id, "fixed-client");
    assert_eq!(settings.username, "user");
    assert_eq!(settings.password, "secret");
    assert!(!settings.clean_session);
    assert_eq!(settings.keep_alive, Duration::from_secs(15));
    assert_eq!(settings.connect_timeout, None);
    assert!(!format!("{settings:?}").contains("secret"));
}

#[tokio::test]
async fn test_transport_publish_failure_drops_event_only() {
    let transport = MockTransport::new();
    let sink = sink_with(base_options(), &transport);
    sink.connect().await.unwrap();

    transport.fail_publish(true);
    let outcome = sink.publish_event(&event! { "a" => 1 }).await.unwrap();
    assert!(matches!(outcome, PublishOutcome::Dropped(_)));
    assert_eq!(sink.state(), ConnectionState::Connected);

    transport.fail_publish(false);
    let outcome = sink.publish_event(&event! { "a" => 2 }).await.unwrap();
    assert!(outcome.is_published());
    assert_eq!(sink.metrics().publish.transport_failures, 1);
}

#[tokio::test]
async fn test_unreachable_broker_reports_url_and_stream() {
    // Port 1 on loopback refuses connections on any normal host
    let options = OptionHolder::new()
        .with("url", "tcp://127.0.0.1:1")
        .with("connection.timeout", "5");
    let sink = MqttSink::init(
        &StreamDefinition::new("FooStream"),
        &options,
        &SinkContext::new("LifecycleApp"),
    )
    .unwrap();

    let started = std::time::Instant::now();
    let error = sink.connect().await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(error.is_connection_unavailable());
    let message = error.to_string();
    assert!(message.contains("tcp://127.0.0.1:1"), "{message}");
    assert!(message.contains("FooStream"), "{message}");
    assert_ne!(sink.state(), ConnectionState::Connected);

    sink.disconnect().await;
    sink.destroy().await;
}

#[tokio::test]
async fn test_invalid_url_scheme_fails_at_connect() {
    let options = OptionHolder::new().with("url", "http://127.0.0.1:1883");
    let sink = MqttSink::init(
        &StreamDefinition::new("FooStream"),
        &options,
        &SinkContext::default(),
    )
    .unwrap();

    let error = sink.connect().await.unwrap_err();

    assert!(error.is_connection_unavailable());
    assert!(error.to_string().contains("http://127.0.0.1:1883"));
}

/// Requires a broker on localhost:1883, e.g. `mosquitto -p 1883`
#[tokio::test]
#[ignore]
async fn test_live_broker_round_trip() {
    let options = OptionHolder::new()
        .with("url", "tcp://localhost:1883")
        .with("topic", "mqtt-event-sink/test")
        .with("quality.of.service", "2");
    let sink = MqttSink::init(
        &StreamDefinition::new("LiveStream"),
        &options,
        &SinkContext::new("LiveApp"),
    )
    .unwrap();

    sink.connect().await.unwrap();
    for i in 0..10 {
        let outcome = sink.publish_event(&event! { "seq" => i }).await.unwrap();
        assert!(outcome.is_published());
    }
    sink.disconnect().await;

    assert_eq!(sink.metrics().publish.messages_published, 10);
    sink.destroy().await;
}
