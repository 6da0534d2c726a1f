//! Transport layer for the relay
//!
//! This module provides the transport abstraction the relay components are
//! written against, and its MQTT implementation.

use crate::transport::mqtt::{ConnectionState, SubscriptionTable};

pub mod mqtt;

/// Transport trait for broker communication
///
/// This trait provides an abstraction over the publish/subscribe session so
/// the relay components can be driven by a mock in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open the session in the background and route inbound messages through
    /// `subscriptions`; the filters are (re)subscribed on every connect
    async fn start(&self, subscriptions: SubscriptionTable) -> Result<(), Self::Error>;

    /// Publish a payload at QoS 1, not retained
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Disconnect and stop background work
    async fn shutdown(&self) -> Result<(), Self::Error>;
}
