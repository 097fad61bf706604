//! Pure connection configuration and state for the MQTT transport
//!
//! `ConnectionOptions` is the transport-neutral description of how to reach
//! the broker. It is derived from the client configuration for one
//! `(mode, secure)` pair and only turned into `rumqttc` options at connect
//! time.

use crate::config::ClientConfig;
use crate::models::ConnectionMode;
use rumqttc::{MqttOptions, Transport as RumqttcTransport};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// WebSocket endpoint path served by Adafruit IO
pub const WEBSOCKET_PATH: &str = "/mqtt";

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Waiting for the broker to accept the session
    Connecting,
    /// Broker accepted the session; publish and subscribe are allowed
    Connected,
    /// Connection lost or closed, with reason
    Disconnected(String),
    /// Polling again after a connection loss (attempt count)
    Reconnecting(u32),
    /// Broker rejected the CONNECT; the event loop has stopped
    Refused(String),
}

impl ConnectionState {
    /// Check if connection state allows publishing and subscribing
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),
    #[error("ConnAck timeout - no connection confirmation within {0:?}")]
    ConnectionTimeout(Duration),
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Unsubscription failed")]
    UnsubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
}

/// Everything the transport needs to open a session
#[derive(Clone, PartialEq)]
pub struct ConnectionOptions {
    pub client_id: String,
    pub host: String,
    pub username: String,
    pub key: String,
    pub keep_alive: Duration,
    /// TLS on the TCP or WebSocket stream
    pub tls: bool,
    /// Set only in TCP mode
    pub tcp_port: Option<u16>,
    /// Set only in WebSocket mode
    pub websocket_url: Option<String>,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl std::fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("client_id", &self.client_id)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("key", &"***")
            .field("keep_alive", &self.keep_alive)
            .field("tls", &self.tls)
            .field("tcp_port", &self.tcp_port)
            .field("websocket_url", &self.websocket_url)
            .field("connect_timeout", &self.connect_timeout)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

impl ConnectionOptions {
    /// Pure function to derive connection options from client configuration
    ///
    /// `secure` picks the secure or insecure port and attaches TLS; `mode`
    /// picks a TCP port or a WebSocket URL, never both.
    pub fn build(
        config: &ClientConfig,
        client_id: &str,
        mode: ConnectionMode,
        secure: bool,
    ) -> Result<Self, MqttError> {
        let host = config.connection.host.clone();

        let (tcp_port, websocket_url) = match mode {
            ConnectionMode::Tcp => (Some(config.tcp_port(secure)), None),
            ConnectionMode::WebSocket => (None, Some(build_websocket_url(&host, secure)?)),
        };

        Ok(Self {
            client_id: client_id.to_string(),
            host,
            username: config.username().to_string(),
            key: config.key().to_string(),
            keep_alive: config.keep_alive(),
            tls: secure,
            tcp_port,
            websocket_url,
            connect_timeout: config.connect_timeout(),
            reconnect_delay: config.reconnect_delay(),
        })
    }

    pub fn mode(&self) -> ConnectionMode {
        if self.websocket_url.is_some() {
            ConnectionMode::WebSocket
        } else {
            ConnectionMode::Tcp
        }
    }

    /// Convert into `rumqttc` options with credentials, keep-alive and transport
    pub fn to_mqtt_options(&self) -> Result<MqttOptions, MqttError> {
        let mut mqtt_options = match (&self.websocket_url, self.tcp_port) {
            // rumqttc takes the whole URL as the address for WebSocket
            // transports and ignores the port argument
            (Some(url), _) => {
                MqttOptions::new(&self.client_id, url, if self.tls { 443 } else { 80 })
            }
            (None, Some(port)) => MqttOptions::new(&self.client_id, &self.host, port),
            (None, None) => return Err(MqttError::InvalidBrokerUrl(self.host.clone())),
        };

        mqtt_options.set_credentials(&self.username, &self.key);
        mqtt_options.set_keep_alive(self.keep_alive);
        mqtt_options.set_clean_session(true);

        let transport = match (self.mode(), self.tls) {
            (ConnectionMode::Tcp, false) => RumqttcTransport::tcp(),
            (ConnectionMode::Tcp, true) => RumqttcTransport::tls_with_default_config(),
            (ConnectionMode::WebSocket, false) => RumqttcTransport::ws(),
            (ConnectionMode::WebSocket, true) => RumqttcTransport::wss_with_default_config(),
        };
        mqtt_options.set_transport(transport);

        Ok(mqtt_options)
    }
}

/// Build `ws://host/mqtt` or `wss://host/mqtt`
pub fn build_websocket_url(host: &str, secure: bool) -> Result<String, MqttError> {
    let scheme = if secure { "wss" } else { "ws" };
    let url = Url::parse(&format!("{scheme}://{host}{WEBSOCKET_PATH}"))
        .map_err(|_| MqttError::InvalidBrokerUrl(host.to_string()))?;
    if url.host_str().is_none() {
        return Err(MqttError::InvalidBrokerUrl(host.to_string()));
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_config() -> ClientConfig {
        ClientConfig::new("alice", "aio_key")
    }

    #[test]
    fn test_tcp_secure_uses_secure_port_and_tls() {
        let options =
            ConnectionOptions::build(&test_config(), "client-1", ConnectionMode::Tcp, true).unwrap();

        assert!(options.tls);
        assert_eq!(options.tcp_port, Some(8883));
        assert_eq!(options.websocket_url, None);
        assert_eq!(options.client_id, "client-1");
        assert_eq!(options.username, "alice");
        assert_eq!(options.key, "aio_key");
        assert_eq!(options.keep_alive, Duration::from_secs(60));
    }

    #[test]
    fn test_tcp_insecure_uses_insecure_port_without_tls() {
        let options =
            ConnectionOptions::build(&test_config(), "c", ConnectionMode::Tcp, false).unwrap();

        assert!(!options.tls);
        assert_eq!(options.tcp_port, Some(1883));
    }

    #[test]
    fn test_websocket_never_sets_tcp_port() {
        let secure =
            ConnectionOptions::build(&test_config(), "c", ConnectionMode::WebSocket, true)
                .unwrap();
        assert_eq!(secure.tcp_port, None);
        assert_eq!(
            secure.websocket_url.as_deref(),
            Some("wss://io.adafruit.com/mqtt")
        );
        assert!(secure.tls);
        assert_eq!(secure.mode(), ConnectionMode::WebSocket);

        let plain =
            ConnectionOptions::build(&test_config(), "c", ConnectionMode::WebSocket, false)
                .unwrap();
        assert_eq!(plain.tcp_port, None);
        assert_eq!(plain.websocket_url.as_deref(), Some("ws://io.adafruit.com/mqtt"));
        assert!(!plain.tls);
    }

    #[test]
    fn test_custom_host_and_ports() {
        let mut config = test_config();
        config.connection.host = "localhost".to_string();
        config.connection.secure_port = 18883;
        config.connection.insecure_port = 11883;

        let secure = ConnectionOptions::build(&config, "c", ConnectionMode::Tcp, true).unwrap();
        let plain = ConnectionOptions::build(&config, "c", ConnectionMode::Tcp, false).unwrap();
        assert_eq!(secure.host, "localhost");
        assert_eq!(secure.tcp_port, Some(18883));
        assert_eq!(plain.tcp_port, Some(11883));
    }

    #[test]
    fn test_invalid_websocket_host() {
        let mut config = test_config();
        config.connection.host = "bad host".to_string();

        let result = ConnectionOptions::build(&config, "c", ConnectionMode::WebSocket, true);
        assert!(matches!(result, Err(MqttError::InvalidBrokerUrl(_))));
    }

    #[test]
    fn test_to_mqtt_options_tcp() {
        let options =
            ConnectionOptions::build(&test_config(), "client-1", ConnectionMode::Tcp, false)
                .unwrap();
        let mqtt_options = options.to_mqtt_options().unwrap();

        assert_eq!(mqtt_options.client_id(), "client-1");
        assert_eq!(
            mqtt_options.broker_address(),
            ("io.adafruit.com".to_string(), 1883)
        );
        assert_eq!(mqtt_options.keep_alive(), Duration::from_secs(60));
        assert_eq!(
            mqtt_options.credentials(),
            Some(("alice".to_string(), "aio_key".to_string()))
        );
    }

    #[test]
    fn test_to_mqtt_options_websocket_uses_url_address() {
        let options =
            ConnectionOptions::build(&test_config(), "c", ConnectionMode::WebSocket, false)
                .unwrap();
        let mqtt_options = options.to_mqtt_options().unwrap();
        assert_eq!(mqtt_options.broker_address().0, "ws://io.adafruit.com/mqtt");
    }

    #[test]
    fn test_debug_redacts_key() {
        let options =
            ConnectionOptions::build(&test_config(), "c", ConnectionMode::Tcp, true).unwrap();
        let rendered = format!("{options:?}");
        assert!(!rendered.contains("aio_key"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_connection_state_is_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Reconnecting(2).is_connected());
        assert!(!ConnectionState::Disconnected("gone".to_string()).is_connected());
        assert!(!ConnectionState::Refused("not authorized".to_string()).is_connected());
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed("test".to_string().into()),
            MqttError::ConnectionRefused("bad credentials".to_string()),
            MqttError::ConnectionTimeout(Duration::from_secs(1)),
            MqttError::AlreadyConnected,
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::SubscriptionFailed("test".to_string().into()),
            MqttError::UnsubscriptionFailed("test".to_string().into()),
            MqttError::InvalidBrokerUrl("test".to_string()),
            MqttError::NotConnected {
                state: ConnectionState::Disconnected("test".to_string()),
            },
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    proptest! {
        #[test]
        fn tls_follows_secure_flag(secure in any::<bool>(), websocket in any::<bool>()) {
            let mode = if websocket { ConnectionMode::WebSocket } else { ConnectionMode::Tcp };
            let options = ConnectionOptions::build(&test_config(), "c", mode, secure).unwrap();
            prop_assert_eq!(options.tls, secure);
            prop_assert_eq!(options.tcp_port.is_some(), !websocket);
            prop_assert_eq!(options.websocket_url.is_some(), websocket);
        }
    }
}
