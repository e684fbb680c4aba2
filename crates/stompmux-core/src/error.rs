//! Error types for the router core.

use thiserror::Error;

use crate::state::ConnectionState;

/// Errors returned synchronously by [`crate::Client`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The destination already has a live subscription.
    #[error("already subscribed to {destination}")]
    AlreadySubscribed {
        /// Destination that was subscribed twice.
        destination: String,
    },

    /// Operation requires a `Connected` client.
    #[error("not connected (state: {state:?})")]
    NotConnected {
        /// State the client was in.
        state: ConnectionState,
    },

    /// The transport refused the request.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors reported by a [`crate::Transport`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection id is not (or no longer) known to the transport.
    #[error("unknown connection {0}")]
    UnknownConnection(u64),

    /// The transport or broker rejected the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Socket-level failure.
    #[error("i/o error: {0}")]
    Io(String),
}

/// Failure raised by a message handler.
///
/// Caught by the router and handed to handler-error observers; never
/// propagated to the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("handler for {destination} failed: {message}")]
pub struct HandlerError {
    /// Destination whose handler failed. Filled in by the router.
    pub destination: String,
    /// Handler-supplied description.
    pub message: String,
}

impl HandlerError {
    /// Create a handler error. The router fills in the destination.
    pub fn new(message: impl Into<String>) -> Self {
        Self { destination: String::new(), message: message.into() }
    }
}
