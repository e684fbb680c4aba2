//! Line shell for stompmux
//!
//! A thin shell over [`stompmux_core::Client`]. The binary talks to a real
//! broker through `stompmux-ws`, or to the loopback broker from
//! `stompmux-harness` with `--loopback`. Parsing lives in [`commands`],
//! execution in [`shell`]; the binary only moves lines between stdin, the
//! shell and stdout.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod args;
pub mod commands;
pub mod shell;

pub use args::Args;
pub use commands::{Command, parse};
pub use shell::{Flow, Shell};

/// Errors that end the shell.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Reading stdin or writing stdout failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The log filter could not be parsed.
    #[error("invalid log filter: {0}")]
    LogFilter(String),
}
