//! Transport layer for broker communication
//!
//! The client talks to the broker only through the [`Transport`] trait, and
//! obtains a transport from a [`TransportFactory`] when it is initialised.
//! This keeps MQTT protocol handling behind one seam and lets tests inject a
//! recording transport.

use crate::events::EventDispatcher;
use crate::models::{PublishResult, SubscribeResult, UnsubscribeResult};
use rumqttc::QoS;

pub mod mqtt;

pub use mqtt::ConnectionOptions;

/// Transport trait for broker communication
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker and wait for it to accept the session
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Disconnect from the broker
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Publish one message and wait for the acknowledgement its QoS requires
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishResult, Self::Error>;

    /// Subscribe to one topic filter and wait for SUBACK
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<SubscribeResult, Self::Error>;

    /// Unsubscribe from the given topics, in order, and wait for UNSUBACK
    async fn unsubscribe(&self, topics: &[String]) -> Result<UnsubscribeResult, Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state, `None` before the first connect
    fn connection_state(&self) -> Option<mqtt::ConnectionState>;
}

/// Creates transports from connection options
///
/// The factory receives the client's event dispatcher so the transport can
/// raise connected, disconnected and message events directly.
pub trait TransportFactory: Send + Sync {
    type Transport: Transport;

    fn create(
        &self,
        options: ConnectionOptions,
        events: EventDispatcher,
    ) -> Result<Self::Transport, <Self::Transport as Transport>::Error>;
}

/// Type alias for the default MQTT transport
pub type MqttTransport = mqtt::RumqttcTransport;
