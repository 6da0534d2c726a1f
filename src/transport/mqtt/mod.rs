//! MQTT session for the relay
//!
//! The module separates pure functions from I/O operations:
//!
//! - [`connection`] - Pure session options, client identity and state transitions
//! - [`message_handler`] - Pure event routing and the subscription table
//! - [`client`] - Impure I/O operations and the event loop task
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_temp_relay::config::MqttSection;
//! use mqtt_temp_relay::transport::mqtt::{MessageForwarder, MqttClient, SubscriptionTable};
//! use mqtt_temp_relay::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection {
//!     broker_url: "tcp://192.168.1.232:1883".to_string(),
//!     input_topic: "danmaku/test".to_string(),
//!     output_topic: "danmaku/test".to_string(),
//!     will_message: "Goodbye!".to_string(),
//!     keep_alive_secs: 30,
//!     buffer_size: 1024,
//!     client_id_prefix: "rtthread".to_string(),
//!     username_env: None,
//!     password_env: None,
//! };
//!
//! let (tx, mut rx) = tokio::sync::mpsc::channel(16);
//! let client = MqttClient::new(config)?;
//! client
//!     .start(SubscriptionTable::new().with_handler("danmaku/test", MessageForwarder::new(tx)))
//!     .await?;
//! client.publish("danmaku/test", b"hello".to_vec()).await?;
//! let inbound = rx.recv().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

// Re-export public types for convenience
pub use client::MqttClient;
pub use connection::{
    configure_mqtt_options, generate_client_id, ConnectionEvent, ConnectionMonitor,
    ConnectionState, MqttError, ReconnectBackoff,
};
pub use message_handler::{
    topic_matches, EventRoute, InboundMessage, MessageForwarder, MessageHandler,
    SubscriptionTable,
};
