//! LLM provider abstraction layer
//!
//! This module provides the interface the request dispatcher talks to and a
//! chat-completions implementation for the remote model endpoint.

pub mod provider;
pub mod providers;

pub use provider::*;
pub use providers::*;
