//! Transport abstraction for STOMP-capable connections.
//!
//! The core never touches sockets. A transport owns the WebSocket, the STOMP
//! frame grammar and heartbeat negotiation; the core only asks it to open and
//! close connections, register and cancel subscriptions, and send frames.
//!
//! Instead of callbacks, the transport queues [`TransportEvent`]s which the
//! driver feeds into [`crate::Client::handle_event`] (or drains in one go
//! with [`crate::Client::pump`]). Every event is tagged with the
//! [`ConnectionId`] it belongs to, so the controller can discard events from
//! connections it has already abandoned.

use std::{collections::BTreeMap, fmt};

use crate::{config::Heartbeat, error::TransportError, frame::Frame};

/// Opaque identity of one transport connection.
///
/// Issued by [`Transport::open`]. Never reused by a well-behaved transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Parameters for opening a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    /// Broker URL, e.g. `ws://localhost:8082/stomp`.
    pub url: String,
    /// Heartbeat intervals to offer in the CONNECT frame.
    pub heartbeat: Heartbeat,
    /// Extra CONNECT headers.
    pub headers: BTreeMap<String, String>,
}

/// Events produced by a transport.
///
/// These replace the `onConnect` / `onDisconnect` / `onWebSocketClose` /
/// `onStompError` callbacks and per-subscription frame callbacks of a typical
/// STOMP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// CONNECTED received; the session is usable.
    Connected {
        /// Connection the handshake completed on.
        connection: ConnectionId,
    },

    /// Orderly STOMP disconnect completed.
    Disconnected {
        /// Connection that disconnected.
        connection: ConnectionId,
    },

    /// Underlying socket closed.
    Closed {
        /// Connection whose socket closed.
        connection: ConnectionId,
        /// Close reason reported by the socket, possibly empty.
        reason: String,
    },

    /// Broker sent an ERROR frame.
    Error {
        /// Connection the error arrived on.
        connection: ConnectionId,
        /// Value of the ERROR frame's `message` header.
        message: String,
    },

    /// MESSAGE frame for one of our subscriptions.
    Frame {
        /// Connection the frame arrived on.
        connection: ConnectionId,
        /// The parsed frame.
        frame: Frame,
    },
}

impl TransportEvent {
    /// Connection this event belongs to.
    pub fn connection(&self) -> ConnectionId {
        match self {
            Self::Connected { connection }
            | Self::Disconnected { connection }
            | Self::Closed { connection, .. }
            | Self::Error { connection, .. }
            | Self::Frame { connection, .. } => *connection,
        }
    }
}

/// A STOMP-capable transport.
///
/// All methods are synchronous requests; their outcomes (handshake completion,
/// socket loss, inbound frames) arrive later through [`Transport::poll_events`].
pub trait Transport {
    /// Handle for a registered subscription, returned by
    /// [`Transport::subscribe`] and handed back to
    /// [`Transport::unsubscribe`].
    type Subscription: fmt::Debug;

    /// Begin opening a connection. The handshake completes asynchronously with
    /// [`TransportEvent::Connected`].
    fn open(&mut self, options: &OpenOptions) -> Result<ConnectionId, TransportError>;

    /// Tear down a connection. Must be safe to call on a connection that is
    /// still handshaking or already gone.
    fn close(&mut self, connection: ConnectionId);

    /// Send SUBSCRIBE for `destination` on `connection`.
    fn subscribe(
        &mut self,
        connection: ConnectionId,
        destination: &str,
    ) -> Result<Self::Subscription, TransportError>;

    /// Send UNSUBSCRIBE for a previously registered subscription.
    fn unsubscribe(&mut self, subscription: Self::Subscription);

    /// Send a SEND frame on `connection`.
    fn send(&mut self, connection: ConnectionId, frame: &Frame) -> Result<(), TransportError>;

    /// Take every event queued since the last call, in arrival order.
    fn poll_events(&mut self) -> Vec<TransportEvent>;
}
