//! MQTT transport backed by `rumqttc`
//!
//! Split the same way as the rest of the transport code: pure functions
//! first, I/O last.
//!
//! - [`connection`] - connection options, state and transport errors
//! - [`message_handler`] - routing of `rumqttc` events
//! - [`acks`] - correlation of acknowledgements with waiting callers
//! - [`client`] - the event-loop task and the `Transport` implementation
//!
//! # Usage
//!
//! ```rust,no_run
//! use adafruit_io_mqtt::config::ClientConfig;
//! use adafruit_io_mqtt::events::EventDispatcher;
//! use adafruit_io_mqtt::models::ConnectionMode;
//! use adafruit_io_mqtt::transport::mqtt::{ConnectionOptions, RumqttcTransport};
//! use adafruit_io_mqtt::transport::Transport;
//! use rumqttc::QoS;
//!
//! # tokio_test::block_on(async {
//! let config = ClientConfig::new("alice", "aio_key");
//! let options = ConnectionOptions::build(&config, "sensor-1", ConnectionMode::Tcp, true)?;
//!
//! let mut transport = RumqttcTransport::new(options, EventDispatcher::new())?;
//! transport.connect().await?;
//! transport.publish("alice/feeds/temp", b"21.5".to_vec(), QoS::AtLeastOnce, false).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod acks;
pub mod client;
pub mod connection;
pub mod message_handler;

pub use acks::PendingAcks;
pub use client::{RumqttcTransport, RumqttcTransportFactory};
pub use connection::{ConnectionOptions, ConnectionState, MqttError};
pub use message_handler::{EventRoute, MessageHandler};
