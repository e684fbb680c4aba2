//! Command-line arguments.

use std::time::Duration;

use clap::Parser;
use stompmux_core::{ClientConfig, Heartbeat};

/// Line-oriented STOMP channel shell.
#[derive(Debug, Parser)]
#[command(name = "stompmux", version, about)]
pub struct Args {
    /// Broker URL used by `/connect` without an argument.
    #[arg(long, env = "STOMPMUX_URL", default_value = "ws://localhost:8082/stomp")]
    pub url: String,

    /// Abandon a handshake after this many milliseconds.
    #[arg(long, env = "STOMPMUX_CONNECT_TIMEOUT_MS", default_value_t = 30_000)]
    pub connect_timeout_ms: u64,

    /// Heartbeat interval offered in both directions, in milliseconds. 0
    /// disables heartbeats.
    #[arg(long, env = "STOMPMUX_HEARTBEAT_MS", default_value_t = 10_000)]
    pub heartbeat_ms: u64,

    /// Extra CONNECT header, `key=value`. Repeatable.
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Use the in-process loopback broker instead of a real one. `/pub/...`
    /// sends are relayed to `/sub/...` subscribers.
    #[arg(long)]
    pub loopback: bool,

    /// Log filter, e.g. `debug` or `stompmux_core=trace`.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Build the client configuration.
    pub fn client_config(&self) -> ClientConfig {
        let interval = Duration::from_millis(self.heartbeat_ms);
        ClientConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            heartbeat: Heartbeat { outgoing: interval, incoming: interval },
            connect_headers: self.headers.iter().cloned().collect(),
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        },
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}
