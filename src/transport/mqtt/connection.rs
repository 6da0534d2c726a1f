//! Pure connection state management for MQTT client
//!
//! This module contains pure functions for connection state management,
//! session option building, and client identifier generation.

use crate::config::MqttSection;
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Session configured, waiting for the first ConnAck
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason; the event loop keeps retrying
    Disconnected(String),
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Buffer allocation failed: {0}")]
    BufferAllocation(String),
    #[error("Payload of {size} bytes exceeds the {limit} byte packet buffer")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Session already started")]
    AlreadyStarted,
}

/// Delay schedule between reconnection attempts; retries never give up
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// Delays in milliseconds for the first attempts
    pub pattern: Vec<u64>,
    /// Delay once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            pattern: vec![250, 500, 1000, 2000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectBackoff {
    /// Delay before the given attempt (1-based)
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Connection lifecycle events that drive state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Session handed to the event loop, first dial pending
    ConnectStarted,
    /// ConnAck received from broker
    ConnAckReceived,
    /// Broker initiated disconnect
    DisconnectedByBroker,
    /// Network or protocol error
    NetworkError(String),
    /// Local shutdown
    ClientDisconnected,
}

/// Logging-only lifecycle hooks and state transitions
pub struct ConnectionMonitor;

impl ConnectionMonitor {
    /// Determine next state after connection event
    pub fn next_state(client_id: &str, event: ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::ConnectStarted => {
                info!(client_id, "MQTT connect: session starting");
                ConnectionState::Connecting
            }
            ConnectionEvent::ConnAckReceived => {
                info!(client_id, "MQTT online");
                ConnectionState::Connected
            }
            ConnectionEvent::DisconnectedByBroker => {
                warn!(client_id, "MQTT offline: broker disconnected");
                ConnectionState::Disconnected("Broker disconnected".to_string())
            }
            ConnectionEvent::NetworkError(reason) => {
                error!(client_id, "MQTT offline: {}", reason);
                ConnectionState::Disconnected(reason)
            }
            ConnectionEvent::ClientDisconnected => {
                info!(client_id, "MQTT offline: client disconnected");
                ConnectionState::Disconnected("Client disconnected".to_string())
            }
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }
}

/// Kernel counter of seconds since boot
const UPTIME_PATH: &str = "/proc/uptime";

/// Milliseconds since boot from `/proc/uptime` contents (pure function)
pub fn parse_uptime_ms(raw: &str) -> Option<u128> {
    let secs: f64 = raw.split_whitespace().next()?.parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| (secs * 1000.0).round() as u128)
}

/// Milliseconds on the boot-relative monotonic clock, if the host exposes one
pub fn monotonic_ticks() -> Option<u128> {
    std::fs::read_to_string(UPTIME_PATH)
        .ok()
        .as_deref()
        .and_then(parse_uptime_ms)
}

/// Client identifier of the form `<prefix><ticks>` (pure function)
pub fn build_client_id(prefix: &str, ticks: u128) -> String {
    format!("{prefix}{ticks}")
}

/// Generate a client identifier from the boot tick counter
pub fn generate_client_id(prefix: &str) -> String {
    match monotonic_ticks() {
        Some(ticks) if ticks > 0 => build_client_id(prefix, ticks),
        // No boot clock on this host, fall back to a random suffix
        _ => format!("{prefix}{}", Uuid::new_v4().simple()),
    }
}

/// Split a broker URL into host, port and TLS flag (pure function)
pub fn parse_broker_url(broker_url: &str) -> Result<(String, u16, bool), MqttError> {
    let url =
        Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
    let tls = url.scheme() == "mqtts";
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok((host.to_string(), port, tls))
}

/// Build session options from config: identity, keep-alive, clean session,
/// last will, credentials and packet buffer limit
pub fn configure_mqtt_options(
    client_id: &str,
    config: &MqttSection,
) -> Result<MqttOptions, MqttError> {
    let (host, port, tls) = parse_broker_url(&config.broker_url)?;

    if config.buffer_size == 0 {
        return Err(MqttError::BufferAllocation(
            "packet buffer size must be greater than 0".to_string(),
        ));
    }
    let buffer_limit = u32::try_from(config.buffer_size).map_err(|_| {
        MqttError::BufferAllocation(format!(
            "packet buffer size {} does not fit the protocol limit",
            config.buffer_size
        ))
    })?;

    let mut mqtt_options = MqttOptions::new(client_id, host, port);

    if tls {
        let transport = RumqttcTransport::tls_with_default_config();
        mqtt_options.set_transport(transport);
    }

    if let Some(username_env) = &config.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = config
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            mqtt_options.set_credentials(&username, &password);
        }
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(buffer_limit));

    // Will: QoS 1, not retained
    let lwt = LastWill::new(
        &config.output_topic,
        config.will_message.clone(),
        QoS::AtLeastOnce,
        false,
        None,
    );
    mqtt_options.set_last_will(lwt);

    Ok(mqtt_options)
}

/// Approximate fixed header, topic length prefix, packet id and properties
pub const PUBLISH_OVERHEAD: usize = 10;

/// Reject publishes that would not fit the write buffer (pure function)
pub fn check_publish_size(topic: &str, payload: &[u8], limit: usize) -> Result<(), MqttError> {
    let size = PUBLISH_OVERHEAD + topic.len() + payload.len();
    if size > limit {
        return Err(MqttError::PayloadTooLarge { size, limit });
    }
    Ok(())
}
