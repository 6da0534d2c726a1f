//! Asynchronous model request dispatch
//!
//! [`RequestDispatcher::schedule`] never blocks the router: prompts go into a
//! bounded queue drained by exactly one [`RequestWorker`], so requests run one
//! at a time and replies are published in submission order. Every failure is
//! logged and the item dropped.

use crate::error::sanitize_error_message;
use crate::llm::LlmProvider;
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// A prompt waiting for the worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub request_id: Uuid,
    pub prompt: String,
}

/// Longest prefix of `prompt` within `max_bytes` that ends on a char boundary
pub fn truncate_prompt(prompt: &str, max_bytes: usize) -> &str {
    if prompt.len() <= max_bytes {
        return prompt;
    }

    let mut cut = max_bytes;
    while !prompt.is_char_boundary(cut) {
        cut -= 1;
    }
    &prompt[..cut]
}

/// Result of handing a prompt to the queue
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    Queued(Uuid),
    QueueFull,
    QueueClosed,
}

/// Front end of the work queue
#[derive(Debug, Clone)]
pub struct RequestDispatcher {
    sender: mpsc::Sender<WorkItem>,
    prompt_max_bytes: usize,
}

impl RequestDispatcher {
    /// Create the dispatcher and the receiving end for its worker
    pub fn new(queue_capacity: usize, prompt_max_bytes: usize) -> (Self, mpsc::Receiver<WorkItem>) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        (
            Self {
                sender,
                prompt_max_bytes,
            },
            receiver,
        )
    }

    /// Truncate and enqueue a prompt without waiting for queue space
    pub fn schedule(&self, prompt: &str) -> ScheduleOutcome {
        let truncated = truncate_prompt(prompt, self.prompt_max_bytes);
        if truncated.len() < prompt.len() {
            debug!(
                original_bytes = prompt.len(),
                kept_bytes = truncated.len(),
                "Prompt truncated"
            );
        }

        let item = WorkItem {
            request_id: Uuid::new_v4(),
            prompt: truncated.to_string(),
        };
        let request_id = item.request_id;

        match self.sender.try_send(item) {
            Ok(()) => {
                debug!(%request_id, "Model request queued");
                ScheduleOutcome::Queued(request_id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                error!(%request_id, "Model request queue full, request dropped");
                ScheduleOutcome::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(%request_id, "Model request queue closed, request dropped");
                ScheduleOutcome::QueueClosed
            }
        }
    }
}

/// Result of executing one work item
#[derive(Debug, Clone, PartialEq)]
pub enum WorkOutcome {
    Published,
    ProviderFailed,
    Offline,
    PublishFailed,
}

/// Single consumer of the work queue
pub struct RequestWorker<T: Transport + 'static> {
    transport: Arc<T>,
    provider: Arc<dyn LlmProvider>,
    output_topic: String,
}

impl<T: Transport + 'static> RequestWorker<T> {
    pub fn new(
        transport: Arc<T>,
        provider: Arc<dyn LlmProvider>,
        output_topic: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            provider,
            output_topic: output_topic.into(),
        }
    }

    /// Call the model for one item and publish its reply
    pub async fn process(&self, item: WorkItem) -> WorkOutcome {
        let span = crate::llm_request_span!(
            request_id = %item.request_id,
            provider = self.provider.name()
        );

        async move {
            debug!(prompt_bytes = item.prompt.len(), "Requesting model reply");

            let reply = match self.provider.complete(&item.prompt).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!(
                        "Model request failed: {}",
                        sanitize_error_message(&e.to_string())
                    );
                    return WorkOutcome::ProviderFailed;
                }
            };

            if !self.transport.is_connected() {
                warn!("MQTT not connected, model reply dropped");
                return WorkOutcome::Offline;
            }

            match self
                .transport
                .publish(&self.output_topic, reply.into_bytes())
                .await
            {
                Ok(()) => {
                    info!(topic = %self.output_topic, "Model reply published");
                    WorkOutcome::Published
                }
                Err(e) => {
                    error!(
                        "Model reply publish failed: {}",
                        sanitize_error_message(&e.to_string())
                    );
                    WorkOutcome::PublishFailed
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Drain the queue until it closes or shutdown is signalled
    pub fn spawn(
        self,
        mut receiver: mpsc::Receiver<WorkItem>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Model request worker running");

            loop {
                let item = tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    item = receiver.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                };

                let request_id = item.request_id;
                tokio::select! {
                    _ = self.process(item) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            warn!(%request_id, "Shutdown during model request, request abandoned");
                            break;
                        }
                    }
                }
            }

            info!("Model request worker stopped");
        })
    }
}
