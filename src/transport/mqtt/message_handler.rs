//! Pure routing of `rumqttc` events
//!
//! The event-loop task polls `rumqttc` and hands every event to
//! [`MessageHandler::route_mqtt_event`]; the returned [`EventRoute`] decides
//! which listeners to raise and which pending acknowledgement to resolve.

use crate::models::ReceivedMessageEventArgs;
use rumqttc::{ConnectReturnCode, ConnectionError, Event, Outgoing, Packet, SubscribeReasonCode};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => match connack.code {
                    ConnectReturnCode::Success => EventRoute::ConnectionAcknowledged {
                        session_present: connack.session_present,
                    },
                    code => EventRoute::ConnectionRefused(Self::describe_refusal(code)),
                },
                Packet::Publish(publish) => {
                    EventRoute::MessageReceived(ReceivedMessageEventArgs::from(publish))
                }
                Packet::PubAck(puback) => EventRoute::PublishAcknowledged {
                    packet_id: puback.pkid,
                },
                Packet::PubRec(pubrec) => EventRoute::PublishReceived {
                    packet_id: pubrec.pkid,
                },
                Packet::PubComp(pubcomp) => EventRoute::PublishCompleted {
                    packet_id: pubcomp.pkid,
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged {
                    packet_id: suback.pkid,
                    return_codes: suback.return_codes.clone(),
                },
                Packet::UnsubAck(unsuback) => EventRoute::UnsubscriptionAcknowledged {
                    packet_id: unsuback.pkid,
                },
                Packet::Disconnect => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(outgoing) => match outgoing {
                Outgoing::Publish(packet_id) => EventRoute::PublishSent {
                    packet_id: *packet_id,
                },
                Outgoing::AwaitAck(packet_id) => EventRoute::PublishParked {
                    packet_id: *packet_id,
                },
                Outgoing::Subscribe(packet_id) => EventRoute::SubscribeSent {
                    packet_id: *packet_id,
                },
                Outgoing::Unsubscribe(packet_id) => EventRoute::UnsubscribeSent {
                    packet_id: *packet_id,
                },
                Outgoing::Disconnect => EventRoute::DisconnectSent,
                _ => EventRoute::OutgoingEvent,
            },
        }
    }

    /// Reason string for an event loop error, and whether the broker refused us
    pub fn describe_connection_error(error: &ConnectionError) -> (String, bool) {
        match error {
            ConnectionError::ConnectionRefused(code) => (Self::describe_refusal(*code), true),
            other => (other.to_string(), false),
        }
    }

    /// Human readable reason for a refused CONNACK (pure function)
    pub fn describe_refusal(code: ConnectReturnCode) -> String {
        match code {
            ConnectReturnCode::Success => "accepted".to_string(),
            ConnectReturnCode::RefusedProtocolVersion => "unacceptable protocol version".to_string(),
            ConnectReturnCode::BadClientId => "client identifier rejected".to_string(),
            ConnectReturnCode::ServiceUnavailable => "server unavailable".to_string(),
            ConnectReturnCode::BadUserNamePassword => "bad username or key".to_string(),
            ConnectReturnCode::NotAuthorized => "not authorized".to_string(),
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged { session_present: bool },
    /// Broker answered CONNACK with a refusal
    ConnectionRefused(String),
    /// Message received on subscribed topic
    MessageReceived(ReceivedMessageEventArgs),
    /// PUBLISH written to the network; `packet_id` is 0 for QoS 0
    PublishSent { packet_id: u16 },
    /// Publish held back until the earlier one using `packet_id` is acknowledged
    PublishParked { packet_id: u16 },
    /// PUBACK received (QoS 1)
    PublishAcknowledged { packet_id: u16 },
    /// PUBREC received (QoS 2)
    PublishReceived { packet_id: u16 },
    /// PUBCOMP received (QoS 2)
    PublishCompleted { packet_id: u16 },
    SubscribeSent { packet_id: u16 },
    SubscriptionAcknowledged {
        packet_id: u16,
        return_codes: Vec<SubscribeReasonCode>,
    },
    UnsubscribeSent { packet_id: u16 },
    UnsubscriptionAcknowledged { packet_id: u16 },
    /// Our own DISCONNECT left the client
    DisconnectSent,
    /// MQTT broker disconnected
    Disconnected,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
