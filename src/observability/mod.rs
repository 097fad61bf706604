//! Observability: structured logging setup and span helpers

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macro for structured logging
pub use logging::mqtt_span;
