//! Observability for the relay
//!
//! Structured logging setup and the span macros used around MQTT lifecycle
//! events and model requests.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat, LoggingSettings};

// Span macros for structured logging
pub use logging::{lifecycle_span, llm_request_span, mqtt_span};
