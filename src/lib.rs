//! MQTT temperature relay
//!
//! A long-running device service that periodically publishes temperature
//! readings to an MQTT topic and relays chat prompts from an input topic to a
//! remote chat-completions endpoint, republishing the model's replies.
//!
//! # Overview
//!
//! - [`sensor`] - temperature drivers behind a lazily initialized reader
//! - [`transport`] - the [`Transport`] seam and its `rumqttc` implementation
//! - [`relay`] - periodic publisher, inbound router, request dispatcher and lifecycle
//! - [`llm`] - chat-completions provider
//! - [`config`] - TOML configuration with secrets taken from the environment
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_temp_relay::relay::{MessageRouter, RouteDecision, TemperatureReport};
//!
//! // Command messages become prompts immediately
//! let mut router = MessageRouter::new("/model", 10);
//! assert_eq!(
//!     router.on_message("/model   tell me a joke"),
//!     RouteDecision::Command("tell me a joke".to_string())
//! );
//!
//! // Reports render without a timestamp until the clock is set
//! let report = TemperatureReport::new("sensor-1", None, 21.5);
//! assert_eq!(report.text, "temperature:21.50");
//! ```

pub mod config;
pub mod error;
pub mod llm;
pub mod observability;
pub mod relay;
pub mod sensor;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, RelayConfig};
pub use error::{RelayError, RelayResult};
pub use relay::RelayLifecycle;
pub use transport::mqtt::MqttClient;
pub use transport::Transport;
