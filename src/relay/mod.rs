//! Relay components
//!
//! - [`publisher`] - periodic temperature reports
//! - [`router`] - inbound message policy
//! - [`dispatcher`] - bounded model request queue and its worker
//! - [`lifecycle`] - one-time session setup and delayed autostart

pub mod dispatcher;
pub mod lifecycle;
pub mod publisher;
pub mod router;

pub use dispatcher::{
    truncate_prompt, RequestDispatcher, RequestWorker, ScheduleOutcome, WorkItem, WorkOutcome,
};
pub use lifecycle::{LifecycleError, RelayLifecycle};
pub use publisher::{wall_clock, PeriodicPublisher, TemperatureReport, TickOutcome};
pub use router::{spawn_router_task, MessageRouter, RouteDecision};
