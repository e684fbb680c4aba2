//! Command parsing for the line shell.
//!
//! This module parses input lines into structured [`Command`] values.

/// Parsed command from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Connect, optionally to a URL other than the configured one.
    Connect {
        /// Override URL.
        url: Option<String>,
    },

    /// Drop the current connection.
    Disconnect,

    /// Subscribe to a destination.
    Subscribe {
        /// Destination, e.g. `/sub/chat/room`.
        destination: String,
    },

    /// Cancel the subscription for a destination.
    Unsubscribe {
        /// Destination to cancel.
        destination: String,
    },

    /// Send a frame.
    Send {
        /// Target destination.
        destination: String,
        /// Frame body (rest of the line).
        body: String,
    },

    /// Show connection state and subscriptions.
    Status,

    /// Show usage.
    Help,

    /// Quit the shell.
    Quit,

    /// Blank line.
    Empty,

    /// Unknown or invalid command.
    Unknown {
        /// The original input.
        input: String,
    },

    /// Command with missing or invalid arguments.
    InvalidArgs {
        /// Command name.
        command: String,
        /// Error message.
        error: String,
    },
}

/// Usage text for [`Command::Help`].
pub const HELP: &str = "\
/connect [url]            open a connection (replaces any current one)
/disconnect               drop the connection
/sub <destination>        subscribe
/unsub <destination>      unsubscribe
/send <destination> <body>
/status                   connection state and subscriptions
/help, /h                 this text
/quit, /q";

fn usage(command: &str, usage: &str) -> Command {
    Command::InvalidArgs { command: command.into(), error: format!("Usage: {usage}") }
}

/// Parse a user input line into a command.
///
/// Commands start with `/`. Anything else is [`Command::Unknown`].
pub fn parse(input: &str) -> Command {
    let input = input.trim();

    if input.is_empty() {
        return Command::Empty;
    }

    let Some(cmd_str) = input.strip_prefix('/') else {
        return Command::Unknown { input: input.to_string() };
    };

    let (command, rest) = cmd_str.split_once(char::is_whitespace).unwrap_or((cmd_str, ""));
    let rest = rest.trim();
    let mut args = rest.split_whitespace();

    match command {
        "connect" => Command::Connect { url: args.next().map(str::to_string) },

        "disconnect" => Command::Disconnect,

        "sub" | "subscribe" => match args.next() {
            Some(destination) => Command::Subscribe { destination: destination.into() },
            None => usage("sub", "/sub <destination>"),
        },

        "unsub" | "unsubscribe" => match args.next() {
            Some(destination) => Command::Unsubscribe { destination: destination.into() },
            None => usage("unsub", "/unsub <destination>"),
        },

        "send" => match rest.split_once(char::is_whitespace) {
            Some((destination, body)) => {
                Command::Send { destination: destination.into(), body: body.trim_start().into() }
            },
            None if !rest.is_empty() => {
                Command::Send { destination: rest.into(), body: String::new() }
            },
            None => usage("send", "/send <destination> <body>"),
        },

        "status" => Command::Status,

        "help" | "h" => Command::Help,

        "quit" | "q" => Command::Quit,

        _ => Command::Unknown { input: input.to_string() },
    }
}
