//! Channel-multiplexing message router for STOMP-over-WebSocket clients.
//!
//! Pure state machine logic, decoupled from I/O. The STOMP wire protocol,
//! heartbeats and sockets belong to a [`Transport`] implementation; this
//! crate tracks subscriptions, demultiplexes inbound frames to per-channel
//! handlers and keeps subscription lifecycle consistent under
//! connect/disconnect churn.
//!
//! # Architecture
//!
//! Transport callbacks are modelled as [`TransportEvent`] values fed into an
//! explicit state machine. The caller (or a test harness) decides when events
//! are processed, so every transition and its side effects can be driven
//! deterministically without a network.
//!
//! # Components
//!
//! - [`registry`]: Subscription registry (one subscription per destination)
//! - [`router`]: Frame demultiplexing by destination
//! - [`client`]: Connection lifecycle controller
//! - [`state`]: Connection states and transition diagnostics
//! - [`transport`]: Transport abstraction and events
//! - [`config`]: Client configuration
//! - [`error`]: Error types

pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod registry;
pub mod router;
pub mod state;
pub mod transport;

pub use client::Client;
pub use config::{ClientConfig, Heartbeat};
pub use error::{ClientError, HandlerError, TransportError};
pub use frame::Frame;
pub use registry::{MessageHandler, Subscription, SubscriptionId, SubscriptionRegistry, handler_fn};
pub use router::{MessageRouter, RouteOutcome, RouterStats};
pub use state::{Connection, ConnectionState, DisconnectReason, StateChange};
pub use transport::{ConnectionId, OpenOptions, Transport, TransportEvent};
