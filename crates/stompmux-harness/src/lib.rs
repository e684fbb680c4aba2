//! Deterministic simulation harness for stompmux testing.
//!
//! An in-process [`SimTransport`] replaces the STOMP-over-WebSocket library,
//! and [`ModelWorld`] provides the reference behaviour for model-based
//! property tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod sim_transport;

pub use model::{Channel, ModelWorld, Operation, OperationError, OperationResult, destination};
pub use sim_transport::{SimCall, SimSubscription, SimTransport};
