//! Inbound and outbound message frames.
//!
//! A [`Frame`] is what the transport hands us after it has parsed a STOMP
//! `MESSAGE`, and what we hand back to it for a `SEND`. The wire grammar lives
//! in the transport; this type only carries the parts routing cares about.

use std::{collections::BTreeMap, fmt};

/// Header carrying the frame's destination on the wire.
pub const DESTINATION_HEADER: &str = "destination";

/// One parsed protocol message.
///
/// Frames are transient: the router consumes them immediately and never
/// stores them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Channel the frame was published to. Matched byte-for-byte.
    pub destination: String,
    /// Message body.
    pub body: String,
    /// Headers as delivered by the transport.
    pub headers: BTreeMap<String, String>,
}

impl Frame {
    /// Create a frame with no extra headers.
    pub fn new(destination: impl Into<String>, body: impl Into<String>) -> Self {
        Self { destination: destination.into(), body: body.into(), headers: BTreeMap::new() }
    }

    /// Builder-style header insertion.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Look up a header value.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.destination, self.body.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup() {
        let frame = Frame::new("/sub/chat/room", "hi").with_header("message-id", "7");
        assert_eq!(frame.header("message-id"), Some("7"));
        assert_eq!(frame.header("subscription"), None);
    }

    #[test]
    fn display_shows_destination_and_size() {
        let frame = Frame::new("/topic/a", "hello");
        assert_eq!(frame.to_string(), "/topic/a (5 bytes)");
    }
}
