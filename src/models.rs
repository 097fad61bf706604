//! Typed results and event arguments surfaced by the Adafruit IO client
//!
//! These are read-only projections of what the MQTT library reports. They are
//! built once per call or event and never mutated afterwards.

use bytes::Bytes;
use rumqttc::{Publish, QoS, SubscribeReasonCode};
use serde::{Deserialize, Serialize};

use crate::topics::TopicBuilder;

/// How the client reaches the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Raw MQTT over TCP (port chosen by the secure flag)
    #[default]
    Tcp,
    /// MQTT over WebSocket, addressed by URL only
    WebSocket,
}

/// Outcome of a single publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishReasonCode {
    Success,
    /// Connection dropped before the broker acknowledged the packet
    NotAcknowledged,
}

/// Result of one publish attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    /// Packet identifier, `None` for QoS 0
    pub packet_id: Option<u16>,
    pub reason_code: PublishReasonCode,
}

impl PublishResult {
    pub fn success(packet_id: Option<u16>) -> Self {
        Self {
            packet_id,
            reason_code: PublishReasonCode::Success,
        }
    }

    pub fn not_acknowledged(packet_id: Option<u16>) -> Self {
        Self {
            packet_id,
            reason_code: PublishReasonCode::NotAcknowledged,
        }
    }

    pub fn is_success(&self) -> bool {
        self.reason_code == PublishReasonCode::Success
    }
}

/// Per-topic outcome reported in a SUBACK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeResultCode {
    GrantedQoS0,
    GrantedQoS1,
    GrantedQoS2,
    Failure,
    NotAcknowledged,
}

impl SubscribeResultCode {
    /// Granted QoS, if the broker accepted the subscription
    pub fn granted_qos(&self) -> Option<QoS> {
        match self {
            Self::GrantedQoS0 => Some(QoS::AtMostOnce),
            Self::GrantedQoS1 => Some(QoS::AtLeastOnce),
            Self::GrantedQoS2 => Some(QoS::ExactlyOnce),
            Self::Failure | Self::NotAcknowledged => None,
        }
    }
}

impl From<&SubscribeReasonCode> for SubscribeResultCode {
    fn from(code: &SubscribeReasonCode) -> Self {
        match code {
            SubscribeReasonCode::Success(QoS::AtMostOnce) => Self::GrantedQoS0,
            SubscribeReasonCode::Success(QoS::AtLeastOnce) => Self::GrantedQoS1,
            SubscribeReasonCode::Success(QoS::ExactlyOnce) => Self::GrantedQoS2,
            SubscribeReasonCode::Failure => Self::Failure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeResultItem {
    pub topic: String,
    pub result_code: SubscribeResultCode,
}

/// Ordered per-topic outcomes of a subscribe request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscribeResult {
    pub items: Vec<SubscribeResultItem>,
}

impl SubscribeResult {
    /// Pair requested topics with SUBACK return codes, in request order
    ///
    /// Topics the broker did not answer for are reported as `NotAcknowledged`.
    pub fn from_return_codes(topics: &[String], return_codes: &[SubscribeReasonCode]) -> Self {
        let items = topics
            .iter()
            .enumerate()
            .map(|(index, topic)| SubscribeResultItem {
                topic: topic.clone(),
                result_code: return_codes
                    .get(index)
                    .map(SubscribeResultCode::from)
                    .unwrap_or(SubscribeResultCode::NotAcknowledged),
            })
            .collect();
        Self { items }
    }

    pub fn not_acknowledged(topics: &[String]) -> Self {
        Self::from_return_codes(topics, &[])
    }

    /// True when every topic was granted some QoS
    pub fn is_success(&self) -> bool {
        self.items
            .iter()
            .all(|item| item.result_code.granted_qos().is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeReasonCode {
    Success,
    NotAcknowledged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeResultItem {
    pub topic: String,
    pub reason_code: UnsubscribeReasonCode,
}

/// Ordered per-topic outcomes of an unsubscribe request
///
/// MQTT 3.1.1 UNSUBACK carries no per-topic codes, so every topic of an
/// acknowledged request is reported as `Success`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnsubscribeResult {
    pub items: Vec<UnsubscribeResultItem>,
}

impl UnsubscribeResult {
    fn with_code(topics: &[String], reason_code: UnsubscribeReasonCode) -> Self {
        Self {
            items: topics
                .iter()
                .map(|topic| UnsubscribeResultItem {
                    topic: topic.clone(),
                    reason_code,
                })
                .collect(),
        }
    }

    pub fn acknowledged(topics: &[String]) -> Self {
        Self::with_code(topics, UnsubscribeReasonCode::Success)
    }

    pub fn not_acknowledged(topics: &[String]) -> Self {
        Self::with_code(topics, UnsubscribeReasonCode::NotAcknowledged)
    }

    pub fn is_success(&self) -> bool {
        self.items
            .iter()
            .all(|item| item.reason_code == UnsubscribeReasonCode::Success)
    }
}

/// Inbound application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessageEventArgs {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl ReceivedMessageEventArgs {
    /// Payload as UTF-8 text, if it is valid UTF-8
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Feed key of this message when it arrived on one of `username`'s feeds
    pub fn feed_key(&self, username: &str) -> Option<&str> {
        TopicBuilder::feed_key_from_topic(username, &self.topic)
    }
}

impl From<&Publish> for ReceivedMessageEventArgs {
    fn from(publish: &Publish) -> Self {
        Self {
            topic: publish.topic.clone(),
            payload: publish.payload.clone(),
            qos: publish.qos,
            retain: publish.retain,
        }
    }
}

/// Raised when the broker accepts the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedEventArgs {
    pub session_present: bool,
}

/// Raised when an established or pending connection goes away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectedEventArgs {
    pub reason: String,
    pub client_was_connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_publish_result_constructors() {
        let ok = PublishResult::success(Some(7));
        assert!(ok.is_success());
        assert_eq!(ok.packet_id, Some(7));

        let lost = PublishResult::not_acknowledged(None);
        assert!(!lost.is_success());
        assert_eq!(lost.reason_code, PublishReasonCode::NotAcknowledged);
    }

    #[test]
    fn test_subscribe_result_maps_return_codes_in_order() {
        let result = SubscribeResult::from_return_codes(
            &topics(&["u/feeds/a", "u/feeds/b", "u/feeds/c"]),
            &[
                SubscribeReasonCode::Success(QoS::AtLeastOnce),
                SubscribeReasonCode::Failure,
                SubscribeReasonCode::Success(QoS::AtMostOnce),
            ],
        );

        assert_eq!(result.items.len(), 3);
        assert_eq!(result.items[0].topic, "u/feeds/a");
        assert_eq!(result.items[0].result_code, SubscribeResultCode::GrantedQoS1);
        assert_eq!(result.items[1].result_code, SubscribeResultCode::Failure);
        assert_eq!(result.items[2].result_code, SubscribeResultCode::GrantedQoS0);
        assert!(!result.is_success());
    }

    #[test]
    fn test_subscribe_result_missing_codes_are_not_acknowledged() {
        let result = SubscribeResult::from_return_codes(
            &topics(&["a", "b"]),
            &[SubscribeReasonCode::Success(QoS::ExactlyOnce)],
        );
        assert_eq!(result.items[0].result_code, SubscribeResultCode::GrantedQoS2);
        assert_eq!(
            result.items[1].result_code,
            SubscribeResultCode::NotAcknowledged
        );

        let dropped = SubscribeResult::not_acknowledged(&topics(&["a"]));
        assert!(!dropped.is_success());
    }

    #[test]
    fn test_granted_qos() {
        assert_eq!(
            SubscribeResultCode::GrantedQoS1.granted_qos(),
            Some(QoS::AtLeastOnce)
        );
        assert_eq!(SubscribeResultCode::Failure.granted_qos(), None);
    }

    #[test]
    fn test_unsubscribe_result_reports_every_topic() {
        let result = UnsubscribeResult::acknowledged(&topics(&["x", "y", "x"]));
        assert!(result.is_success());
        let names: Vec<&str> = result.items.iter().map(|i| i.topic.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "x"]);

        let lost = UnsubscribeResult::not_acknowledged(&topics(&["x"]));
        assert!(!lost.is_success());
    }

    #[test]
    fn test_received_message_from_publish() {
        let mut publish = Publish::new("alice/feeds/temp", QoS::AtLeastOnce, "21.5");
        publish.retain = true;

        let args = ReceivedMessageEventArgs::from(&publish);
        assert_eq!(args.topic, "alice/feeds/temp");
        assert_eq!(args.payload_str(), Some("21.5"));
        assert_eq!(args.qos, QoS::AtLeastOnce);
        assert!(args.retain);
        assert_eq!(args.feed_key("alice"), Some("temp"));
        assert_eq!(args.feed_key("bob"), None);
    }

    #[test]
    fn test_binary_payload_has_no_str_view() {
        let args = ReceivedMessageEventArgs {
            topic: "t".to_string(),
            payload: Bytes::from_static(&[0xff, 0xfe]),
            qos: QoS::AtMostOnce,
            retain: false,
        };
        assert_eq!(args.payload_str(), None);
    }

    #[test]
    fn test_connection_mode_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: ConnectionMode,
        }
        let parsed: Wrapper = toml::from_str(r#"mode = "websocket""#).unwrap();
        assert_eq!(parsed.mode, ConnectionMode::WebSocket);
        assert_eq!(ConnectionMode::default(), ConnectionMode::Tcp);
    }
}
