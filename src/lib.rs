//! Adafruit IO MQTT client
//!
//! A thin layer over `rumqttc` for talking to Adafruit IO:
//! - feed keys mapped to `"<username>/feeds/<feed_key>"` topics
//! - connection setup for TCP or WebSocket, with or without TLS
//! - typed results for publish, subscribe and unsubscribe acknowledgements
//! - connected, disconnected and message-received events
//!
//! # Quick Start
//!
//! ```rust
//! use adafruit_io_mqtt::{AdafruitMqttClient, ConnectionMode};
//!
//! let mut client = AdafruitMqttClient::new("alice", "aio_key", Some("greenhouse"));
//! assert_eq!(client.topic_for_feed("temperature"), "alice/feeds/temperature");
//!
//! client.on_message_received(|message| {
//!     println!("{}: {:?}", message.topic, message.payload_str());
//! });
//! client.init_client(ConnectionMode::Tcp, false).unwrap();
//! assert!(client.is_initialized());
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod observability;
pub mod testing;
pub mod topics;
pub mod transport;

pub use client::AdafruitMqttClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ClientResult};
pub use events::{EventDispatcher, EventKind, ListenerHandle};
pub use models::*;
pub use topics::TopicBuilder;
pub use transport::mqtt::{ConnectionState, MqttError};
pub use transport::{ConnectionOptions, Transport, TransportFactory};

pub use rumqttc::QoS;
