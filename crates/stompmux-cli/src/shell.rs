//! Command execution over a [`Client`].
//!
//! [`Shell`] owns the client and its transport, turns parsed [`Command`]s
//! into client calls, and collects everything the user should see (command
//! results, state changes, delivered frames) as output lines. The binary
//! decides where the lines go.

use std::{cell::RefCell, rc::Rc, time::Instant};

use stompmux_core::{Client, ClientConfig, Frame, Transport, handler_fn};
use stompmux_harness::SimTransport;
use tracing::debug;

use crate::commands::{Command, HELP};

/// Whether the shell should keep reading input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep going.
    Continue,
    /// User asked to quit.
    Quit,
}

type Output = Rc<RefCell<Vec<String>>>;

/// Interactive shell state.
pub struct Shell<T: Transport> {
    client: Client<T>,
    url: String,
    output: Output,
}

impl Shell<SimTransport> {
    /// Shell over the in-process loopback broker, which relays `/pub/...`
    /// sends to `/sub/...` subscribers.
    pub fn loopback(config: ClientConfig, url: impl Into<String>) -> Self {
        Self::new(SimTransport::auto_accept().with_relay("/pub", "/sub"), config, url)
    }
}

impl<T: Transport> Shell<T> {
    /// Create a shell over `transport` that connects to `url` by default.
    pub fn new(transport: T, config: ClientConfig, url: impl Into<String>) -> Self {
        let mut client = Client::new(transport, config);
        let output = Output::default();

        let sink = Rc::clone(&output);
        client.on_state_change(move |change| {
            let line = match &change.reason {
                Some(reason) => format!("* {} -> {} ({reason})", change.previous, change.current),
                None => format!("* {} -> {}", change.previous, change.current),
            };
            sink.borrow_mut().push(line);
        });

        let sink = Rc::clone(&output);
        client.on_handler_error(move |err| sink.borrow_mut().push(format!("! {err}")));

        Self { client, url: url.into(), output }
    }

    /// Underlying client.
    pub fn client(&self) -> &Client<T> {
        &self.client
    }

    /// Run one command, then drain transport events.
    pub fn execute(&mut self, command: Command, now: Instant) -> Flow {
        debug!(?command, "executing");
        match command {
            Command::Connect { url } => {
                let url = url.unwrap_or_else(|| self.url.clone());
                if let Err(err) = self.client.connect(&url, now) {
                    self.emit(format!("error: {err}"));
                }
            },
            Command::Disconnect => self.client.disconnect(),
            Command::Subscribe { destination } => {
                let sink = Rc::clone(&self.output);
                let handler = handler_fn(move |frame: &Frame| {
                    sink.borrow_mut().push(format!("[{}] > {}", frame.destination, frame.body));
                    Ok(())
                });
                match self.client.subscribe(&destination, handler) {
                    Ok(id) => self.emit(format!("subscribed to {destination} ({id})")),
                    Err(err) => self.emit(format!("error: {err}")),
                }
            },
            Command::Unsubscribe { destination } => match self.client.unsubscribe(&destination) {
                Ok(true) => self.emit(format!("unsubscribed from {destination}")),
                Ok(false) => self.emit(format!("not subscribed to {destination}")),
                Err(err) => self.emit(format!("error: {err}")),
            },
            Command::Send { destination, body } => {
                if let Err(err) = self.client.publish(&Frame::new(destination, body)) {
                    self.emit(format!("error: {err}"));
                }
            },
            Command::Status => self.status(),
            Command::Help => self.emit(HELP.to_string()),
            Command::Quit => return Flow::Quit,
            Command::Empty => {},
            Command::Unknown { input } => {
                self.emit(format!("unknown command: {input} (try /help)"));
            },
            Command::InvalidArgs { command, error } => self.emit(format!("/{command}: {error}")),
        }

        self.client.pump();
        Flow::Continue
    }

    /// Enforce the connect timeout and drain transport events.
    pub fn tick(&mut self, now: Instant) {
        self.client.tick(now);
        self.client.pump();
    }

    /// Take the output produced since the last call.
    pub fn drain_output(&mut self) -> Vec<String> {
        std::mem::take(&mut *self.output.borrow_mut())
    }

    fn status(&self) {
        let line = match self.client.connection() {
            Some(conn) => format!("state: {} ({} {})", conn.state(), conn.id(), conn.url()),
            None => format!("state: {}", self.client.state()),
        };
        self.emit(line);

        let mut destinations: Vec<&str> = self.client.registry().destinations().collect();
        destinations.sort_unstable();
        let line = if destinations.is_empty() {
            "subscriptions: none".to_string()
        } else {
            format!("subscriptions: {}", destinations.join(", "))
        };
        self.emit(line);

        let stats = self.client.router_stats();
        self.emit(format!(
            "routed: {} dropped: {} handler failures: {}",
            stats.routed, stats.dropped, stats.handler_failures
        ));
    }

    fn emit(&self, line: String) {
        self.output.borrow_mut().push(line);
    }
}

#[cfg(test)]
mod tests {
    use stompmux_core::ConnectionState;

    use super::*;
    use crate::commands::parse;

    fn run<T: Transport>(shell: &mut Shell<T>, line: &str) -> Vec<String> {
        shell.execute(parse(line), Instant::now());
        shell.drain_output()
    }

    fn shell() -> Shell<SimTransport> {
        Shell::loopback(ClientConfig::default(), "ws://localhost:8082/stomp")
    }

    #[test]
    fn connect_reports_transitions() {
        let mut shell = shell();

        let out = run(&mut shell, "/connect");

        assert_eq!(out, vec!["* disconnected -> connecting", "* connecting -> connected"]);
        assert_eq!(shell.client().state(), ConnectionState::Connected);
    }

    #[test]
    fn send_loops_back_to_subscriber() {
        let mut shell = shell();
        run(&mut shell, "/connect");
        run(&mut shell, "/sub /sub/chat/room");

        let out = run(&mut shell, "/send /pub/chat/room hello");

        assert_eq!(out, vec!["[/sub/chat/room] > hello"]);
    }

    #[test]
    fn subscribe_while_disconnected_reports_error() {
        let mut shell = shell();

        let out = run(&mut shell, "/sub /sub/chat/room");

        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("error: "));
    }

    #[test]
    fn duplicate_subscribe_reports_error() {
        let mut shell = shell();
        run(&mut shell, "/connect");
        run(&mut shell, "/sub /sub/a");

        let out = run(&mut shell, "/sub /sub/a");

        assert_eq!(out.len(), 1);
        assert!(out[0].contains("/sub/a"));
        assert_eq!(shell.client().registry().len(), 1);
    }

    #[test]
    fn unsubscribe_absent_is_reported() {
        let mut shell = shell();
        run(&mut shell, "/connect");

        assert_eq!(run(&mut shell, "/unsub /sub/a"), vec!["not subscribed to /sub/a"]);
    }

    #[test]
    fn status_lists_subscriptions() {
        let mut shell = shell();
        run(&mut shell, "/connect");
        run(&mut shell, "/sub /sub/b");
        run(&mut shell, "/sub /sub/a");

        let out = run(&mut shell, "/status");

        assert!(out[0].starts_with("state: connected (conn-1"));
        assert_eq!(out[1], "subscriptions: /sub/a, /sub/b");
    }

    #[test]
    fn disconnect_clears_subscriptions() {
        let mut shell = shell();
        run(&mut shell, "/connect");
        run(&mut shell, "/sub /sub/a");

        let out = run(&mut shell, "/disconnect");

        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("* connected -> disconnected (disconnect requested)"));
        assert!(shell.client().registry().is_empty());
    }

    #[tokio::test]
    async fn unreachable_broker_is_reported_as_closed() {
        let transport = stompmux_ws::WsTransport::new();
        let mut shell = Shell::new(transport, ClientConfig::default(), "ws://127.0.0.1:1/stomp");

        let mut out = run(&mut shell, "/connect");
        for _ in 0..300 {
            if shell.client().state() == ConnectionState::Disconnected {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            shell.tick(Instant::now());
            out.extend(shell.drain_output());
        }

        assert_eq!(out[0], "* disconnected -> connecting");
        assert!(out.iter().all(|line| !line.contains("-> connected")), "{out:?}");
        assert!(out[1].starts_with("* connecting -> disconnected (socket closed"), "{out:?}");
    }

    #[test]
    fn quit_stops_the_loop() {
        let mut shell = shell();
        assert_eq!(shell.execute(Command::Quit, Instant::now()), Flow::Quit);
        assert_eq!(shell.execute(Command::Status, Instant::now()), Flow::Continue);
    }
}
