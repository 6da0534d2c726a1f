//! Relay lifecycle management
//!
//! Owns the transport, the publisher and the request pipeline, performs the
//! one-time session setup and runs the delayed autostart sequence.

use crate::config::RelayConfig;
use crate::llm::LlmProvider;
use crate::relay::dispatcher::{RequestDispatcher, RequestWorker, WorkItem};
use crate::relay::publisher::PeriodicPublisher;
use crate::relay::router::{spawn_router_task, MessageRouter};
use crate::sensor::SensorReader;
use crate::transport::mqtt::{InboundMessage, MessageForwarder, SubscriptionTable};
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, Instrument};

/// Inbound messages buffered between the transport and the router
const INBOUND_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Transport error: {0}")]
    TransportError(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Pipeline pieces consumed by the first successful start
struct PendingTasks<T: Transport + 'static> {
    router: MessageRouter,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    worker: RequestWorker<T>,
    work_rx: mpsc::Receiver<WorkItem>,
}

/// Relay lifecycle with injected transport, provider and sensor
pub struct RelayLifecycle<T: Transport + 'static> {
    config: RelayConfig,
    transport: Arc<T>,
    publisher: PeriodicPublisher<T>,
    dispatcher: Arc<RequestDispatcher>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    pending: Mutex<Option<PendingTasks<T>>>,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport + 'static> RelayLifecycle<T> {
    pub fn new(
        config: RelayConfig,
        transport: T,
        llm_provider: Arc<dyn LlmProvider>,
        sensor: SensorReader,
    ) -> Self {
        let transport = Arc::new(transport);

        let publisher = PeriodicPublisher::new(
            transport.clone(),
            sensor,
            config.device.display_name.clone(),
            config.mqtt.output_topic.clone(),
            Duration::from_millis(config.publisher.interval_ms),
        );

        let (dispatcher, work_rx) =
            RequestDispatcher::new(config.router.queue_capacity, config.router.prompt_max_bytes);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        let pending = PendingTasks {
            router: MessageRouter::from_config(&config.router),
            inbound_rx,
            worker: RequestWorker::new(
                transport.clone(),
                llm_provider,
                config.mqtt.output_topic.clone(),
            ),
            work_rx,
        };

        Self {
            config,
            transport,
            publisher,
            dispatcher: Arc::new(dispatcher),
            inbound_tx,
            pending: Mutex::new(Some(pending)),
            started: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Get the transport instance for testing
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn publisher(&self) -> &PeriodicPublisher<T> {
        &self.publisher
    }

    pub fn dispatcher(&self) -> &Arc<RequestDispatcher> {
        &self.dispatcher
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Subscription table: the input topic plus a catch-all, both feeding the router
    fn build_subscription_table(&self) -> SubscriptionTable {
        let forwarder = MessageForwarder::new(self.inbound_tx.clone());
        SubscriptionTable::new()
            .with_handler(self.config.mqtt.input_topic.clone(), forwarder.clone())
            .with_default_handler(forwarder)
    }

    /// Set up the session once; later calls return `Ok(false)` without side effects
    pub async fn start_connection(&self) -> Result<bool, LifecycleError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("MQTT session already started");
            return Ok(false);
        }

        info!(
            broker = %self.config.mqtt.broker_url,
            input_topic = %self.config.mqtt.input_topic,
            "Starting MQTT session"
        );

        let table = self.build_subscription_table();
        if let Err(e) = self.transport.start(table).await {
            // Leave the guard open so a later call can retry
            self.started.store(false, Ordering::SeqCst);
            return Err(LifecycleError::TransportError(Box::new(e)));
        }

        let pending = self.pending.lock().await.take();
        if let Some(pending) = pending {
            let router_handle =
                spawn_router_task(pending.router, pending.inbound_rx, self.dispatcher.clone());
            let worker_handle = pending
                .worker
                .spawn(pending.work_rx, self.shutdown_tx.subscribe());

            let mut tasks = self.tasks.lock().await;
            tasks.push(router_handle);
            tasks.push(worker_handle);
        }

        info!("MQTT session started");
        Ok(true)
    }

    /// Connection start followed by publisher start
    ///
    /// The publisher starts even when the session could not be set up; its
    /// reports are then dropped as offline. The connection error is still
    /// returned to the caller.
    pub async fn autostart(&self) -> Result<(), LifecycleError> {
        let span = crate::lifecycle_span!(event = "autostart");
        async {
            let connection = self.start_connection().await;
            if let Err(e) = &connection {
                error!("MQTT session start failed, publishing offline: {}", e);
            }

            self.publisher.start().await;
            connection.map(|_| ())
        }
        .instrument(span)
        .await
    }

    /// Run [`Self::autostart`] after the configured grace period
    pub fn schedule_autostart(self: &Arc<Self>) -> JoinHandle<()> {
        let lifecycle = self.clone();
        let delay = Duration::from_secs(self.config.publisher.startup_delay_secs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(delay_secs = delay.as_secs(), "Autostart scheduled");
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => {
                    info!("Shutdown before autostart, skipping");
                    return;
                }
            }

            if let Err(e) = lifecycle.autostart().await {
                error!("Autostart failed: {}", e);
            }
        })
    }

    /// Stop the publisher, stop the worker and disconnect
    pub async fn shutdown(&self) -> Result<(), LifecycleError> {
        info!("Shutting down relay");

        self.publisher.stop().await;
        self.shutdown_tx.send_replace(true);

        if let Err(e) = self.transport.shutdown().await {
            error!("Transport shutdown error: {}", e);
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in tasks {
            // The router only ends when every inbound sender is gone
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Relay task shutdown error: {}", e);
                }
            }
        }

        info!("Relay shutdown complete");
        Ok(())
    }
}
