//! Error types for the Adafruit IO client
//!
//! Only `NotInitialized` originates in this layer. Transport failures are
//! carried through unchanged as the error source, so callers can downcast to
//! the transport's own error type when they need the details.

use thiserror::Error;

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Client not initialized: call init_client before connecting, publishing or subscribing")]
    NotInitialized,

    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl ClientError {
    /// Wrap a transport error without altering it
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(error))
    }

    /// Borrow the transport error as its concrete type, if it is one
    pub fn transport_error<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Self::Transport(source) => source.downcast_ref::<E>(),
            _ => None,
        }
    }

    pub fn is_not_initialized(&self) -> bool {
        matches!(self, Self::NotInitialized)
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::transport::mqtt::{ConnectionState, MqttError};

    #[test]
    fn test_not_initialized_display() {
        let error = ClientError::NotInitialized;
        assert!(error.is_not_initialized());
        assert!(error.to_string().contains("init_client"));
    }

    #[test]
    fn test_transport_error_is_preserved() {
        let error = ClientError::transport(MqttError::NotConnected {
            state: ConnectionState::Connecting,
        });

        assert!(!error.is_not_initialized());
        assert!(error.to_string().starts_with("Transport error: "));
        assert!(matches!(
            error.transport_error::<MqttError>(),
            Some(MqttError::NotConnected { .. })
        ));
        assert!(error.transport_error::<std::io::Error>().is_none());
    }

    #[test]
    fn test_config_error_converts() {
        let error: ClientError = ConfigError::InvalidConfig("username is empty".to_string()).into();
        assert!(matches!(error, ClientError::Config(_)));
        assert_eq!(
            error.to_string(),
            "Configuration error: Invalid configuration: username is empty"
        );
    }
}
