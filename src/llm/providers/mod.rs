//! LLM provider implementations
//!
//! This module contains concrete implementations of the LlmProvider trait.

pub mod chat_completions;

pub use chat_completions::*;
