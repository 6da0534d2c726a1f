//! Mock implementations for testing

use crate::llm::provider::{LlmError, LlmProvider};
use crate::sensor::{SensorError, TemperatureDriver};
use crate::transport::mqtt::{ConnectionState, InboundMessage, MqttError, SubscriptionTable};
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub type PublishedMessage = (String, Vec<u8>);

/// Mock transport for testing
#[derive(Debug, Clone)]
pub struct MockTransport {
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub connected: Arc<AtomicBool>,
    pub start_calls: Arc<AtomicUsize>,
    pub subscriptions: Arc<Mutex<Option<SubscriptionTable>>>,
    pub should_fail: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            published_messages: Arc::default(),
            connected: Arc::new(AtomicBool::new(true)),
            start_calls: Arc::default(),
            subscriptions: Arc::default(),
            should_fail: false,
        }
    }
}

impl MockTransport {
    /// Connected transport that records every publish
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disconnected() -> Self {
        let transport = Self::default();
        transport.set_connected(false);
        transport
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn start_count(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    /// Published payloads decoded as UTF-8
    pub async fn get_published_texts(&self) -> Vec<String> {
        self.published_messages
            .lock()
            .await
            .iter()
            .map(|(_, payload)| String::from_utf8_lossy(payload).to_string())
            .collect()
    }

    pub async fn clear_history(&self) {
        self.published_messages.lock().await.clear();
    }

    /// Deliver a message as if the broker sent it; false if never started
    pub async fn inject(&self, topic: &str, payload: impl Into<bytes::Bytes>) -> bool {
        let table = self.subscriptions.lock().await.clone();
        match table {
            Some(table) => {
                table.dispatch(InboundMessage::new(topic, payload)).await;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn start(&self, subscriptions: SubscriptionTable) -> Result<(), Self::Error> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(MqttError::ConnectionFailed("Mock start failure".into()));
        }

        *self.subscriptions.lock().await = Some(subscriptions);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected {
                state: self.connection_state(),
            });
        }
        if self.should_fail {
            return Err(MqttError::PublishFailed("Mock publish failure".into()));
        }

        self.published_messages
            .lock()
            .await
            .push((topic.to_string(), payload));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected("Mock disconnection".to_string())
        }
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        self.set_connected(false);
        Ok(())
    }
}

/// Mock LLM provider for testing; clones share recorded prompts
#[derive(Debug, Default, Clone)]
pub struct MockLlmProvider {
    pub responses: Vec<String>,
    pub current_response: Arc<Mutex<usize>>,
    pub received_prompts: Arc<Mutex<Vec<String>>>,
    pub delay: Option<Duration>,
    pub should_fail: bool,
}

impl MockLlmProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            ..Default::default()
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub fn single_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Hold every completion for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn get_received_prompts(&self) -> Vec<String> {
        self.received_prompts.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.received_prompts.lock().await.push(prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail {
            return Err(LlmError::ApiError("Mock LLM failure".to_string()));
        }

        let mut current = self.current_response.lock().await;
        let response_idx = *current % self.responses.len().max(1);
        *current += 1;

        Ok(self
            .responses
            .get(response_idx)
            .cloned()
            .unwrap_or_else(|| "Mock response".to_string()))
    }
}

/// Mock temperature driver for testing
#[derive(Debug, Default)]
pub struct MockDriver {
    pub readings: Vec<f32>,
    pub next_reading: usize,
    pub init_calls: Arc<std::sync::Mutex<u32>>,
    pub failing_inits: u32,
    pub fail_reads: bool,
}

impl MockDriver {
    /// Driver that cycles through `readings`
    pub fn with_readings(readings: Vec<f32>) -> Self {
        Self {
            readings,
            ..Default::default()
        }
    }

    /// Driver whose first `count` init attempts fail
    pub fn failing_init(count: u32) -> Self {
        Self {
            readings: vec![25.0],
            failing_inits: count,
            ..Default::default()
        }
    }

    pub fn failing_reads() -> Self {
        Self {
            fail_reads: true,
            ..Default::default()
        }
    }
}

impl TemperatureDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn init(&mut self) -> Result<(), SensorError> {
        let mut calls = self
            .init_calls
            .lock()
            .map_err(|_| SensorError::InitFailed("init counter poisoned".to_string()))?;
        *calls += 1;

        if *calls <= self.failing_inits {
            return Err(SensorError::InitFailed("Mock init failure".to_string()));
        }
        Ok(())
    }

    fn read_celsius(&mut self) -> Result<f32, SensorError> {
        if self.fail_reads {
            return Err(SensorError::ReadFailed("Mock read failure".to_string()));
        }

        let value = match self.readings.len() {
            0 => 25.0,
            len => self.readings[self.next_reading % len],
        };
        self.next_reading += 1;
        Ok(value)
    }
}
