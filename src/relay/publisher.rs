//! Periodic temperature publisher
//!
//! One background task samples the sensor, renders a JSON report and publishes
//! it to the output topic, then sleeps a fixed interval. Readings taken while
//! the session is offline are dropped, never queued.

use crate::error::{sanitize_error_message, RelayError};
use crate::sensor::SensorReader;
use crate::transport::Transport;
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// JSON body of a temperature report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReport {
    pub user: String,
    pub text: String,
}

impl TemperatureReport {
    /// Render a report; the timestamp is omitted when the clock is unset
    pub fn new(display_name: &str, timestamp: Option<NaiveDateTime>, celsius: f32) -> Self {
        let text = match timestamp {
            Some(ts) => format!("{} temperature:{:.2}", ts.format("%Y-%m-%d %H:%M:%S"), celsius),
            None => format!("temperature:{celsius:.2}"),
        };

        Self {
            user: display_name.to_string(),
            text,
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, RelayError> {
        serde_json::to_vec(self)
            .map_err(|e| RelayError::internal(format!("report serialization failed: {e}")))
    }
}

/// Local wall-clock time, or `None` while the clock has not been set
pub fn wall_clock() -> Option<NaiveDateTime> {
    clock_if_set(Local::now().naive_local())
}

/// Treat anything before 2000-01-01 as an unsynchronized clock (pure function)
pub fn clock_if_set(now: NaiveDateTime) -> Option<NaiveDateTime> {
    let epoch = NaiveDate::from_ymd_opt(2000, 1, 1)?.and_hms_opt(0, 0, 0)?;
    (now >= epoch).then_some(now)
}

/// Result of one publisher iteration
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Published,
    SkippedOffline,
    SensorFailed,
    PublishFailed,
}

/// Samples the sensor and publishes reports on a fixed interval
pub struct PeriodicPublisher<T: Transport + 'static> {
    transport: Arc<T>,
    sensor: Arc<Mutex<SensorReader>>,
    display_name: String,
    topic: String,
    interval: Duration,
    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport + 'static> PeriodicPublisher<T> {
    pub fn new(
        transport: Arc<T>,
        sensor: SensorReader,
        display_name: impl Into<String>,
        topic: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            transport,
            sensor: Arc::new(Mutex::new(sensor)),
            display_name: display_name.into(),
            topic: topic.into(),
            interval,
            running: AtomicBool::new(false),
            stop_tx,
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Launch the loop; returns false without side effects while it is already running
    pub async fn start(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Temperature publisher already running");
            return false;
        }

        self.stop_tx.send_replace(false);
        let stop_rx = self.stop_tx.subscribe();

        let transport = self.transport.clone();
        let sensor = self.sensor.clone();
        let display_name = self.display_name.clone();
        let topic = self.topic.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            Self::run_loop(transport, sensor, display_name, topic, interval, stop_rx).await;
        });
        *self.handle.lock().await = Some(handle);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            topic = %self.topic,
            "Started publishing temperature"
        );
        true
    }

    /// Stop the loop and wait for the task to finish its current iteration
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.stop_tx.send_replace(true);
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Temperature publisher ended with error: {}", e);
                }
            }
        }
        info!("Temperature publisher stopped");
    }

    /// Run one sample-and-publish cycle
    pub async fn tick(&self) -> TickOutcome {
        Self::publish_once(&*self.transport, &self.sensor, &self.display_name, &self.topic).await
    }

    async fn run_loop(
        transport: Arc<T>,
        sensor: Arc<Mutex<SensorReader>>,
        display_name: String,
        topic: String,
        interval: Duration,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        loop {
            if *stop_rx.borrow() {
                break;
            }

            Self::publish_once(&*transport, &sensor, &display_name, &topic).await;

            // Fixed sleep after each iteration, no drift correction
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn publish_once(
        transport: &T,
        sensor: &Arc<Mutex<SensorReader>>,
        display_name: &str,
        topic: &str,
    ) -> TickOutcome {
        // Drivers do file or bus I/O, keep it off the async workers
        let sensor = sensor.clone();
        let reading = tokio::task::spawn_blocking(move || sensor.blocking_lock().read()).await;
        let celsius = match reading {
            Ok(Ok(celsius)) => celsius,
            Ok(Err(e)) => {
                error!("Temperature read failed: {}", e);
                return TickOutcome::SensorFailed;
            }
            Err(e) => {
                error!("Temperature read task failed: {}", e);
                return TickOutcome::SensorFailed;
            }
        };

        let report = TemperatureReport::new(display_name, wall_clock(), celsius);
        let payload = match report.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!("{}", e);
                return TickOutcome::PublishFailed;
            }
        };

        if !transport.is_connected() {
            warn!(celsius, "MQTT not connected, temperature report dropped");
            return TickOutcome::SkippedOffline;
        }

        match transport.publish(topic, payload).await {
            Ok(()) => {
                debug!(topic, text = %report.text, "Temperature report published");
                TickOutcome::Published
            }
            Err(e) => {
                error!(
                    "Temperature publish failed: {}",
                    sanitize_error_message(&e.to_string())
                );
                TickOutcome::PublishFailed
            }
        }
    }
}
