//! Testing utilities and mock implementations
//!
//! Mocks for the transport, the model provider and the temperature driver so
//! relay behaviour can be exercised without a broker, network or hardware.

pub mod mocks;

pub use mocks::*;
