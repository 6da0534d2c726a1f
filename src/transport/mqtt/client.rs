//! Impure I/O operations for MQTT client
//!
//! This module owns the rumqttc client and its event loop task. Pure decisions
//! live in [`super::connection`] and [`super::message_handler`].

use super::connection::{
    check_publish_size, configure_mqtt_options, generate_client_id, ConnectionEvent,
    ConnectionMonitor, ConnectionState, MqttError, ReconnectBackoff,
};
use super::message_handler::{EventRoute, MessageHandler, SubscriptionTable};
use crate::config::MqttSection;
use crate::transport::Transport;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the request channel between [`AsyncClient`] and the event loop
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Identity and request handle of a started session
struct Session {
    client_id: String,
    client: AsyncClient,
}

/// MQTT session with automatic reconnection
pub struct MqttClient {
    config: MqttSection,
    session: OnceCell<Session>,
    start_lock: Mutex<()>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    backoff: ReconnectBackoff,
}

impl MqttClient {
    /// Validate the session options; the client id and the network session are
    /// only created by [`Transport::start`]
    pub fn new(config: MqttSection) -> Result<Self, MqttError> {
        configure_mqtt_options(&config.client_id_prefix, &config)?;

        let ((state_tx, state_rx), (shutdown_tx, _)) = Self::setup_connection_channels();

        Ok(MqttClient {
            config,
            session: OnceCell::new(),
            start_lock: Mutex::new(()),
            event_loop_handle: Mutex::new(None),
            state_tx,
            state_rx,
            shutdown_tx,
            backoff: ReconnectBackoff::default(),
        })
    }

    /// Client identifier, assigned when the session starts
    pub fn client_id(&self) -> Option<&str> {
        self.session.get().map(|session| session.client_id.as_str())
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels =
            watch::channel(ConnectionState::Disconnected("Not started".to_string()));
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    /// Drive the rumqttc event loop until shutdown is signalled
    #[allow(clippy::too_many_arguments)]
    async fn run_event_loop(
        client_id: String,
        mut event_loop: EventLoop,
        client: AsyncClient,
        subscriptions: SubscriptionTable,
        state_tx: watch::Sender<ConnectionState>,
        mut shutdown_rx: watch::Receiver<bool>,
        backoff: ReconnectBackoff,
    ) {
        info!(client_id = %client_id, "Starting MQTT event loop");
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT event loop");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            Self::process_event_route(
                                route,
                                &client_id,
                                &client,
                                &subscriptions,
                                &state_tx,
                                &mut reconnect_attempts,
                            )
                            .await;
                        }
                        Err(e) => {
                            let new_state = ConnectionMonitor::next_state(
                                &client_id,
                                ConnectionEvent::NetworkError(e.to_string()),
                            );
                            state_tx.send_replace(new_state);

                            reconnect_attempts = reconnect_attempts.saturating_add(1);
                            let delay_ms = backoff.delay_ms(reconnect_attempts);
                            info!(
                                "Attempting reconnection {} after {}ms delay",
                                reconnect_attempts, delay_ms
                            );

                            // rumqttc redials on the next poll
                            if !Self::interruptible_sleep(shutdown_rx.clone(), delay_ms).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        info!(client_id = %client_id, "MQTT event loop stopped");
    }

    /// Apply one routed event to session state and subscribers
    async fn process_event_route(
        route: EventRoute,
        client_id: &str,
        client: &AsyncClient,
        subscriptions: &SubscriptionTable,
        state_tx: &watch::Sender<ConnectionState>,
        reconnect_attempts: &mut u32,
    ) {
        match route {
            EventRoute::ConnectionAcknowledged => {
                let new_state =
                    ConnectionMonitor::next_state(client_id, ConnectionEvent::ConnAckReceived);
                state_tx.send_replace(new_state);
                *reconnect_attempts = 0;
                Self::resubscribe_to_topics(client, subscriptions);
            }
            EventRoute::MessageReceived(message) => {
                subscriptions.dispatch(message).await;
            }
            EventRoute::Disconnected => {
                let new_state =
                    ConnectionMonitor::next_state(client_id, ConnectionEvent::DisconnectedByBroker);
                state_tx.send_replace(new_state);
            }
            EventRoute::SubscriptionConfirmed { packet_id, filters } => {
                debug!(target: "mqtt_transport", packet_id, filters, "Subscription confirmed");
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
            }
            EventRoute::OutgoingEvent => {}
        }
    }

    /// Subscribe every table filter; the session is clean so this runs on each ConnAck
    fn resubscribe_to_topics(client: &AsyncClient, subscriptions: &SubscriptionTable) {
        for filter in subscriptions.filters() {
            // try_subscribe: awaiting here would stall the loop that drains the request queue
            match client.try_subscribe(filter.clone(), QoS::AtLeastOnce) {
                Ok(()) => debug!(target: "mqtt_transport", "Subscribed to: {}", filter),
                Err(e) => error!("Failed to subscribe to {}: {}", filter, e),
            }
        }
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        if *shutdown_rx.borrow() {
            return false;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
                true
            }
        }
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), MqttError> {
        let current_state = self.state_rx.borrow().clone();
        if !ConnectionMonitor::can_publish(&current_state) {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn start(&self, subscriptions: SubscriptionTable) -> Result<(), Self::Error> {
        let _guard = self.start_lock.lock().await;
        if self.session.get().is_some() {
            return Err(MqttError::AlreadyStarted);
        }

        let client_id = generate_client_id(&self.config.client_id_prefix);
        let mqtt_options = configure_mqtt_options(&client_id, &self.config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let session = Session {
            client_id: client_id.clone(),
            client: client.clone(),
        };
        if self.session.set(session).is_err() {
            return Err(MqttError::AlreadyStarted);
        }

        info!(
            client_id = %client_id,
            broker = %self.config.broker_url,
            filters = ?subscriptions.filters(),
            "Starting MQTT session"
        );

        let new_state = ConnectionMonitor::next_state(&client_id, ConnectionEvent::ConnectStarted);
        self.state_tx.send_replace(new_state);

        let span = crate::mqtt_span!(client_id = %client_id, operation = "event_loop");
        let handle = tokio::spawn(
            Self::run_event_loop(
                client_id,
                event_loop,
                client,
                subscriptions,
                self.state_tx.clone(),
                self.shutdown_tx.subscribe(),
                self.backoff.clone(),
            )
            .instrument(span),
        );
        *self.event_loop_handle.lock().await = Some(handle);

        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        self.check_connection_state()?;
        check_publish_size(topic, &payload, self.config.buffer_size)?;

        let session = self.session.get().ok_or_else(|| MqttError::NotConnected {
            state: self.connection_state(),
        })?;

        let size = payload.len();
        session
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(topic, bytes = size, "Published MQTT message");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        ConnectionMonitor::can_publish(&self.state_rx.borrow())
    }

    fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        let handle = self.event_loop_handle.lock().await.take();
        let (Some(handle), Some(session)) = (handle, self.session.get()) else {
            debug!("MQTT session never started, nothing to shut down");
            return Ok(());
        };

        // Queue DISCONNECT first so the broker discards the will message
        if let Err(e) = session.client.disconnect().await {
            warn!("Failed to queue MQTT disconnect: {}", e);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        self.shutdown_tx.send_replace(true);
        let new_state =
            ConnectionMonitor::next_state(&session.client_id, ConnectionEvent::ClientDisconnected);
        self.state_tx.send_replace(new_state);

        match tokio::time::timeout(Duration::from_secs(2), handle).await {
            Ok(Ok(())) => info!("MQTT event loop shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("MQTT event loop ended with error: {}", e),
            Err(_) => warn!("MQTT event loop didn't shut down gracefully"),
            _ => {}
        }

        Ok(())
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);

        if let Ok(mut guard) = self.event_loop_handle.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
