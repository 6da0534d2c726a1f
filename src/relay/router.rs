//! Inbound message routing policy
//!
//! Messages starting with the command prefix go to the model at once. Everything
//! else is counted, and every Nth plain message is forwarded verbatim.

use crate::config::RouterSection;
use crate::relay::dispatcher::RequestDispatcher;
use crate::transport::mqtt::InboundMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// What the router did with one message
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// Command prefix matched; carries the stripped prompt
    Command(String),
    /// Counter reached the threshold; carries the whole payload
    Triggered(String),
    /// Plain message counted without dispatch
    Counted(u32),
}

impl RouteDecision {
    /// Prompt to dispatch, if any
    pub fn prompt(&self) -> Option<&str> {
        match self {
            RouteDecision::Command(prompt) | RouteDecision::Triggered(prompt) => Some(prompt),
            RouteDecision::Counted(_) => None,
        }
    }
}

/// Routing state owned by the single router task
#[derive(Debug, Clone)]
pub struct MessageRouter {
    command_prefix: String,
    trigger_threshold: u32,
    counter: u32,
}

impl MessageRouter {
    pub fn new(command_prefix: impl Into<String>, trigger_threshold: u32) -> Self {
        Self {
            command_prefix: command_prefix.into(),
            trigger_threshold: trigger_threshold.max(1),
            counter: 0,
        }
    }

    pub fn from_config(section: &RouterSection) -> Self {
        Self::new(section.command_prefix.clone(), section.trigger_threshold)
    }

    /// Plain messages counted since the last trigger
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Apply the routing policy to one payload
    pub fn on_message(&mut self, payload: &str) -> RouteDecision {
        if let Some(rest) = payload.strip_prefix(self.command_prefix.as_str()) {
            // Only ASCII spaces are skipped
            return RouteDecision::Command(rest.trim_start_matches(' ').to_string());
        }

        self.counter += 1;
        if self.counter >= self.trigger_threshold {
            self.counter = 0;
            return RouteDecision::Triggered(payload.to_string());
        }

        RouteDecision::Counted(self.counter)
    }
}

/// Consume inbound messages in arrival order and schedule the prompts they yield
pub fn spawn_router_task(
    mut router: MessageRouter,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
    dispatcher: Arc<RequestDispatcher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Message router running");

        while let Some(message) = inbound_rx.recv().await {
            let payload = message.text();
            let decision = router.on_message(&payload);
            debug!(topic = %message.topic, ?decision, "Routed inbound message");

            if let Some(prompt) = decision.prompt() {
                dispatcher.schedule(prompt);
            }
        }

        info!("Message router stopped");
    })
}
