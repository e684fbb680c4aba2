//! Client configuration.

use std::{collections::BTreeMap, time::Duration};

/// Heartbeat intervals offered to the broker.
///
/// Negotiation itself happens in the transport; the core only passes these
/// through on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// How often we promise to send something.
    pub outgoing: Duration,
    /// How often we want the broker to send something.
    pub incoming: Duration,
}

impl Heartbeat {
    /// Disable heartbeats in both directions.
    pub const DISABLED: Self = Self { outgoing: Duration::ZERO, incoming: Duration::ZERO };

    /// Render as the value of a STOMP `heart-beat` header (`cx,cy` in ms).
    pub fn header_value(&self) -> String {
        format!("{},{}", self.outgoing.as_millis(), self.incoming.as_millis())
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self { outgoing: Duration::from_secs(10), incoming: Duration::from_secs(10) }
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long a connection may stay in `Connecting` before
    /// [`crate::Client::tick`] abandons it.
    pub connect_timeout: Duration,
    /// Heartbeat intervals passed to the transport.
    pub heartbeat: Heartbeat,
    /// Extra CONNECT headers passed to the transport.
    pub connect_headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            heartbeat: Heartbeat::default(),
            connect_headers: BTreeMap::new(),
        }
    }
}
