//! Configuration for the Adafruit IO MQTT client
//!
//! Configuration comes either from code (`ClientConfig::new`) or from a TOML
//! file with an `[account]` and an optional `[connection]` section. The access
//! key may be written inline or, preferably, read from an environment variable
//! named by `key_env` when the file is loaded.

use crate::models::ConnectionMode;
use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default Adafruit IO broker
pub const DEFAULT_HOST: &str = "io.adafruit.com";
/// Default MQTT-over-TLS port
pub const DEFAULT_SECURE_PORT: u16 = 8883;
/// Default plain MQTT port
pub const DEFAULT_INSECURE_PORT: u16 = 1883;
/// Environment variable consulted for the access key when none is configured
pub const DEFAULT_KEY_ENV: &str = "ADAFRUIT_IO_KEY";
/// Environment variable consulted for the username by `from_env`
pub const DEFAULT_USERNAME_ENV: &str = "ADAFRUIT_IO_USERNAME";

/// Complete client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub account: AccountSection,
    #[serde(default)]
    pub connection: ConnectionSection,
}

/// Adafruit IO account credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountSection {
    /// Adafruit IO username, also the root of every feed topic
    pub username: String,
    /// Access key; never written back out when the config is serialized
    #[serde(default, skip_serializing)]
    pub key: Option<String>,
    /// Environment variable holding the access key
    #[serde(default)]
    pub key_env: Option<String>,
}

/// Broker and session settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_secure_port")]
    pub secure_port: u16,
    #[serde(default = "default_insecure_port")]
    pub insecure_port: u16,
    /// Fixed client identifier; a random UUID is used when absent or blank
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub mode: ConnectionMode,
    #[serde(default = "default_secure")]
    pub secure: bool,
    /// QoS level (0, 1 or 2) used by publish and subscribe helpers
    #[serde(default)]
    pub qos: u8,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_secure_port() -> u16 {
    DEFAULT_SECURE_PORT
}

fn default_insecure_port() -> u16 {
    DEFAULT_INSECURE_PORT
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_secure() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            secure_port: default_secure_port(),
            insecure_port: default_insecure_port(),
            client_id: None,
            keep_alive_secs: default_keep_alive_secs(),
            mode: ConnectionMode::default(),
            secure: default_secure(),
            qos: 0,
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Build a configuration with default connection settings
    pub fn new(username: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            account: AccountSection {
                username: username.into(),
                key: Some(key.into()),
                key_env: None,
            },
            connection: ConnectionSection::default(),
        }
    }

    /// Build a configuration from `ADAFRUIT_IO_USERNAME` and `ADAFRUIT_IO_KEY`
    pub fn from_env() -> Result<Self, ConfigError> {
        let username = get_env_var_required(DEFAULT_USERNAME_ENV)?;
        let key = get_env_var_required(DEFAULT_KEY_ENV)?;
        let config = Self::new(username, key);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file with environment variable resolution
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse, validate and resolve a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::from_toml_str_with_env(content, |name| std::env::var(name).ok())
    }

    /// Same as [`ClientConfig::from_toml_str`] with variables read through `lookup`
    pub fn from_toml_str_with_env(
        content: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        config.resolve_key(lookup)?;
        Ok(config)
    }

    /// Fill in the access key from the environment when it is not inline
    fn resolve_key(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if self.account.key.is_some() {
            return Ok(());
        }
        let env_name = self
            .account
            .key_env
            .clone()
            .unwrap_or_else(|| DEFAULT_KEY_ENV.to_string());
        let key = lookup(&env_name).ok_or(ConfigError::EnvVarNotFound(env_name))?;
        self.account.key = Some(key);
        Ok(())
    }

    /// Check values the broker connection cannot work without
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account.username.trim().is_empty() {
            return Err(ConfigError::InvalidConfig("username is empty".to_string()));
        }
        if self.connection.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig("host is empty".to_string()));
        }
        if self.connection.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "keep_alive_secs must be greater than 0".to_string(),
            ));
        }
        if qos_from_level(self.connection.qos).is_none() {
            return Err(ConfigError::InvalidConfig(format!(
                "qos must be 0, 1 or 2, got {}",
                self.connection.qos
            )));
        }
        Ok(())
    }

    pub fn username(&self) -> &str {
        &self.account.username
    }

    /// Access key, empty until resolved
    pub fn key(&self) -> &str {
        self.account.key.as_deref().unwrap_or_default()
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.connection.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.connect_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.connection.reconnect_delay_ms)
    }

    /// Configured QoS, falling back to at-most-once for out-of-range levels
    pub fn qos(&self) -> QoS {
        qos_from_level(self.connection.qos).unwrap_or(QoS::AtMostOnce)
    }

    /// Port used for TCP connections with the given security setting
    pub fn tcp_port(&self, secure: bool) -> u16 {
        if secure {
            self.connection.secure_port
        } else {
            self.connection.insecure_port
        }
    }
}

/// Map a numeric QoS level to the MQTT QoS
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

/// Use the configured client id unless it is missing or blank
pub fn resolve_client_id(client_id: Option<&str>) -> String {
    match client_id {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    }
}

fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
    std::env::var(env_var_name).map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_adafruit_io() {
        let config = ClientConfig::new("alice", "aio_key");

        assert_eq!(config.connection.host, "io.adafruit.com");
        assert_eq!(config.connection.secure_port, 8883);
        assert_eq!(config.connection.insecure_port, 1883);
        assert_eq!(config.keep_alive(), Duration::from_secs(60));
        assert_eq!(config.connection.mode, ConnectionMode::Tcp);
        assert!(config.connection.secure);
        assert_eq!(config.qos(), QoS::AtMostOnce);
        assert_eq!(config.key(), "aio_key");
    }

    #[test]
    fn test_full_toml_config() {
        let toml_content = r#"
[account]
username = "alice"
key = "inline-key"

[connection]
host = "broker.local"
secure_port = 9883
insecure_port = 9882
client_id = "greenhouse-1"
keep_alive_secs = 30
mode = "websocket"
secure = false
qos = 1
connect_timeout_secs = 5
reconnect_delay_ms = 500
"#;

        let config = ClientConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.username(), "alice");
        assert_eq!(config.key(), "inline-key");
        assert_eq!(config.connection.host, "broker.local");
        assert_eq!(config.tcp_port(true), 9883);
        assert_eq!(config.tcp_port(false), 9882);
        assert_eq!(config.connection.client_id.as_deref(), Some("greenhouse-1"));
        assert_eq!(config.connection.mode, ConnectionMode::WebSocket);
        assert!(!config.connection.secure);
        assert_eq!(config.qos(), QoS::AtLeastOnce);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.reconnect_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_minimal_config_reads_key_from_named_env() {
        let toml_content = r#"
[account]
username = "bob"
key_env = "AIO_TEST_KEY_MINIMAL"
"#;

        let config = ClientConfig::from_toml_str_with_env(toml_content, |name| {
            (name == "AIO_TEST_KEY_MINIMAL").then(|| "from-env".to_string())
        })
        .unwrap();
        assert_eq!(config.key(), "from-env");
        assert_eq!(config.connection, ConnectionSection::default());
    }

    #[test]
    fn test_default_key_env_is_used_without_key_env() {
        let toml_content = r#"
[account]
username = "bob"
"#;

        let config = ClientConfig::from_toml_str_with_env(toml_content, |name| {
            (name == DEFAULT_KEY_ENV).then(|| "default-env-key".to_string())
        })
        .unwrap();
        assert_eq!(config.key(), "default-env-key");

        let missing = ClientConfig::from_toml_str_with_env(toml_content, |_| None);
        assert!(
            matches!(missing, Err(ConfigError::EnvVarNotFound(ref name)) if name == DEFAULT_KEY_ENV)
        );
    }

    #[test]
    fn test_missing_key_env_is_reported() {
        let toml_content = r#"
[account]
username = "bob"
key_env = "AIO_TEST_KEY_DEFINITELY_UNSET"
"#;

        let result = ClientConfig::from_toml_str_with_env(toml_content, |_| None);
        assert!(
            matches!(result, Err(ConfigError::EnvVarNotFound(ref name)) if name == "AIO_TEST_KEY_DEFINITELY_UNSET")
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ClientConfig::new("", "k");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));

        config.account.username = "alice".to_string();
        config.connection.keep_alive_secs = 0;
        assert!(config.validate().is_err());

        config.connection.keep_alive_secs = 60;
        config.connection.qos = 3;
        assert!(config.validate().is_err());

        config.connection.qos = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialized_config_omits_key() {
        let config = ClientConfig::new("alice", "super-secret");
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn test_resolve_client_id() {
        assert_eq!(resolve_client_id(Some("device-7")), "device-7");

        let generated = resolve_client_id(None);
        assert!(uuid::Uuid::parse_str(&generated).is_ok());

        let from_blank = resolve_client_id(Some("   "));
        assert!(uuid::Uuid::parse_str(&from_blank).is_ok());
        assert_ne!(resolve_client_id(Some("")), resolve_client_id(Some("")));
    }

    #[test]
    fn test_qos_from_level() {
        assert_eq!(qos_from_level(0), Some(QoS::AtMostOnce));
        assert_eq!(qos_from_level(1), Some(QoS::AtLeastOnce));
        assert_eq!(qos_from_level(2), Some(QoS::ExactlyOnce));
        assert_eq!(qos_from_level(3), None);
    }
}
