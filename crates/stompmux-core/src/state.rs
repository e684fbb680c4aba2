//! Connection state machine.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ connect() ┌────────────┐ Connected ┌───────────┐
//! │ Disconnected │──────────>│ Connecting │──────────>│ Connected │
//! └──────────────┘           └────────────┘           └───────────┘
//!        ^                        │                        │
//!        │  disconnect() /        │                        │ Disconnected /
//!        │  timeout / Closed      │                        │ Closed / Error
//!        └────────────────────────┴────────────────────────┘
//! ```
//!
//! A STOMP ERROR passes through `Erroring` on its way to `Disconnected` so
//! observers see the diagnostic before subscriptions are cleared.
//!
//! The [`Connection`] value only tracks state and timing. It never talks to
//! the transport; [`crate::Client`] owns that.

use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::transport::ConnectionId;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No usable connection.
    Disconnected,
    /// Open requested, waiting for CONNECTED.
    Connecting,
    /// CONNECTED received, subscriptions allowed.
    Connected,
    /// Broker reported an error; about to become `Disconnected`.
    Erroring,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Erroring => "erroring",
        };
        f.write_str(name)
    }
}

/// Why a connection stopped being usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Caller invoked `disconnect()`.
    Requested,
    /// Caller invoked `connect()` while a connection was live.
    Replaced,
    /// Broker completed an orderly disconnect.
    ServerDisconnect,
    /// Socket closed underneath us.
    SocketClosed {
        /// Close reason from the socket.
        reason: String,
    },
    /// Broker sent an ERROR frame.
    StompError {
        /// ERROR frame `message` header.
        message: String,
    },
    /// Handshake did not finish within the connect timeout.
    ConnectTimeout {
        /// Time spent in `Connecting`.
        elapsed: Duration,
    },
    /// The transport refused to open the connection.
    OpenFailed {
        /// Transport error description.
        error: String,
    },
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("disconnect requested"),
            Self::Replaced => f.write_str("replaced by a new connection"),
            Self::ServerDisconnect => f.write_str("server disconnected"),
            Self::SocketClosed { reason } if reason.is_empty() => f.write_str("socket closed"),
            Self::SocketClosed { reason } => write!(f, "socket closed: {reason}"),
            Self::StompError { message } => write!(f, "stomp error: {message}"),
            Self::ConnectTimeout { elapsed } => write!(f, "connect timeout after {elapsed:?}"),
            Self::OpenFailed { error } => write!(f, "open failed: {error}"),
        }
    }
}

/// A state transition, as delivered to state observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// State before the transition.
    pub previous: ConnectionState,
    /// State after the transition.
    pub current: ConnectionState,
    /// Diagnostic for transitions into `Erroring` or `Disconnected`.
    pub reason: Option<DisconnectReason>,
}

/// One connection attempt.
///
/// Created on connect request; dropped on explicit disconnect. After a
/// transport-initiated loss it stays around in `Disconnected` until the next
/// `connect()` or `disconnect()`.
#[derive(Debug, Clone)]
pub struct Connection {
    url: String,
    id: ConnectionId,
    state: ConnectionState,
    opened_at: Instant,
}

impl Connection {
    /// Create a connection in `Connecting` state.
    pub fn new(url: impl Into<String>, id: ConnectionId, now: Instant) -> Self {
        Self { url: url.into(), id, state: ConnectionState::Connecting, opened_at: now }
    }

    /// Broker URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Transport identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether `event_connection` refers to this connection.
    pub fn matches(&self, event_connection: ConnectionId) -> bool {
        self.id == event_connection
    }

    /// Whether the transport side is still live (handshaking or connected).
    pub fn is_live(&self) -> bool {
        matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected)
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    /// Check if the handshake has timed out.
    ///
    /// # Returns
    /// `Some(elapsed)` if still `Connecting` after `timeout`, `None` otherwise
    #[must_use]
    pub fn check_timeout(&self, now: Instant, timeout: Duration) -> Option<Duration> {
        if self.state != ConnectionState::Connecting {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.opened_at);
        if elapsed > timeout { Some(elapsed) } else { None }
    }
}
