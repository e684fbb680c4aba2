//! STOMP 1.2 over WebSocket
//!
//! A [`stompmux_core::Transport`] that speaks real STOMP to a broker. Each
//! connection runs as a tokio task owning its socket; the transport handle
//! talks to it over channels, so the core stays synchronous and polls events
//! the same way it does against the loopback broker.
//!
//! - [`codec`]: text frame encoding, decoding and heartbeat negotiation
//! - [`transport`]: [`WsTransport`] and the per-connection link task
//!
//! Only `ws://` URLs are supported; TLS is not compiled in.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod transport;

pub use codec::{CodecError, StompFrame, negotiate_heartbeat};
pub use transport::{WsSubscription, WsTransport};
