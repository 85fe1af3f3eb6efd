//! Pure routing logic for MQTT event loop notifications
//!
//! The sink never subscribes, so the only incoming packets of interest are
//! the CONNACK, acknowledgements of our own publishes, and broker disconnects.

use rumqttc::{ConnectReturnCode, Event, Outgoing, Packet};

/// Pure routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to the link-state decision it implies
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => match connack.code {
                    ConnectReturnCode::Success => EventRoute::ConnectionAcknowledged,
                    code => EventRoute::ConnectionRefused(format!("{code:?}")),
                },
                Packet::PubAck(ack) => EventRoute::DeliveryConfirmed { pkid: ack.pkid },
                Packet::PubComp(comp) => EventRoute::DeliveryConfirmed { pkid: comp.pkid },
                Packet::Disconnect => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the session
    ConnectionAcknowledged,
    /// Broker answered CONNECT with a failure return code
    ConnectionRefused(String),
    /// QoS 1 or QoS 2 publish fully acknowledged
    DeliveryConfirmed { pkid: u16 },
    /// Broker closed the session
    Disconnected,
    /// Our DISCONNECT has been written to the socket
    DisconnectSent,
    /// Keep-alive and other protocol traffic
    InfrastructureEvent(String),
    /// Packet written by the client
    OutgoingEvent,
}
