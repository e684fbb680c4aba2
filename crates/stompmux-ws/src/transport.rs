//! WebSocket transport and per-connection link tasks.
//!
//! [`WsTransport::open`] spawns one task per connection on the ambient tokio
//! runtime. The task owns the socket: it performs the CONNECT handshake,
//! writes SUBSCRIBE/UNSUBSCRIBE/SEND for commands it receives over a
//! channel, keeps heartbeats in both directions and reports everything back
//! as [`TransportEvent`]s. A task always ends with exactly one terminal
//! event (`Disconnected`, `Closed` or `Error`) unless the caller closed it.
//!
//! ```text
//! Client ──open/subscribe/send──► WsTransport ──LinkCommand──► link task ──► socket
//!    ▲                                │                            │
//!    └────────poll_events─────────────┴────────TransportEvent◄─────┘
//! ```

use std::collections::HashMap;

use futures::{SinkExt, StreamExt};
use stompmux_core::{
    ConnectionId, Frame, Heartbeat, OpenOptions, Transport, TransportError, TransportEvent,
};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::{Instant, Interval, MissedTickBehavior},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{debug, info, trace, warn};

use crate::codec::{self, CONNECTED, CodecError, ERROR, MESSAGE, RECEIPT, StompFrame};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle for one broker-side subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WsSubscription {
    /// Connection the subscription was made on.
    pub connection: ConnectionId,
    /// STOMP subscription id.
    pub id: u64,
}

#[derive(Debug)]
enum LinkCommand {
    Subscribe { id: u64, destination: String },
    Unsubscribe { id: u64 },
    Send(Frame),
    Close,
}

#[derive(Debug)]
struct Link {
    commands: UnboundedSender<LinkCommand>,
    /// CONNECTED has been reported for this link.
    open: bool,
}

/// STOMP over WebSocket.
///
/// Must be used from within a tokio runtime; `open` fails otherwise.
#[derive(Debug)]
pub struct WsTransport {
    next_connection: u64,
    next_subscription: u64,
    links: HashMap<ConnectionId, Link>,
    events_tx: UnboundedSender<TransportEvent>,
    events_rx: UnboundedReceiver<TransportEvent>,
}

impl WsTransport {
    /// Transport with no connections.
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            next_connection: 0,
            next_subscription: 0,
            links: HashMap::new(),
            events_tx,
            events_rx,
        }
    }

    /// Number of links whose task has not reported a terminal event.
    pub fn live_links(&self) -> usize {
        self.links.len()
    }

    fn command(
        &self,
        connection: ConnectionId,
        command: LinkCommand,
    ) -> Result<(), TransportError> {
        let link = self
            .links
            .get(&connection)
            .filter(|link| link.open)
            .ok_or(TransportError::UnknownConnection(connection.0))?;
        link.commands
            .send(command)
            .map_err(|_| TransportError::Io(format!("{connection} link task has stopped")))
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for WsTransport {
    type Subscription = WsSubscription;

    fn open(&mut self, options: &OpenOptions) -> Result<ConnectionId, TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Io(format!("no tokio runtime: {e}")))?;

        self.next_connection += 1;
        let connection = ConnectionId(self.next_connection);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        runtime.spawn(run_link(connection, options.clone(), commands_rx, self.events_tx.clone()));
        self.links.insert(connection, Link { commands, open: false });

        debug!(%connection, url = %options.url, "link task spawned");
        Ok(connection)
    }

    fn close(&mut self, connection: ConnectionId) {
        if let Some(link) = self.links.remove(&connection) {
            // Task may already be gone; nothing left to close then.
            let _ = link.commands.send(LinkCommand::Close);
        }
    }

    fn subscribe(
        &mut self,
        connection: ConnectionId,
        destination: &str,
    ) -> Result<WsSubscription, TransportError> {
        let id = self.next_subscription + 1;
        self.command(connection, LinkCommand::Subscribe { id, destination: destination.into() })?;
        self.next_subscription = id;
        Ok(WsSubscription { connection, id })
    }

    fn unsubscribe(&mut self, subscription: WsSubscription) {
        if let Some(link) = self.links.get(&subscription.connection) {
            let _ = link.commands.send(LinkCommand::Unsubscribe { id: subscription.id });
        }
    }

    fn send(&mut self, connection: ConnectionId, frame: &Frame) -> Result<(), TransportError> {
        self.command(connection, LinkCommand::Send(frame.clone()))
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            match &event {
                TransportEvent::Connected { connection } => {
                    if let Some(link) = self.links.get_mut(connection) {
                        link.open = true;
                    }
                },
                TransportEvent::Disconnected { connection }
                | TransportEvent::Closed { connection, .. }
                | TransportEvent::Error { connection, .. } => {
                    self.links.remove(connection);
                },
                TransportEvent::Frame { .. } => {},
            }
            events.push(event);
        }
        events
    }
}

#[derive(Debug, Error)]
enum LinkError {
    #[error("{0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("malformed frame: {0}")]
    Codec(#[from] CodecError),

    #[error("expected CONNECTED, got {0}")]
    Handshake(String),
}

impl From<tungstenite::Error> for LinkError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// What one inbound WebSocket message amounted to.
enum Inbound {
    Frame(StompFrame),
    /// Heartbeat or control message.
    Idle,
    /// Socket is finished; report this and stop.
    Ended(TransportEvent),
}

async fn run_link(
    connection: ConnectionId,
    options: OpenOptions,
    mut commands: UnboundedReceiver<LinkCommand>,
    events: UnboundedSender<TransportEvent>,
) {
    let terminal = match session(connection, &options, &mut commands, &events).await {
        Ok(terminal) => terminal,
        Err(err) => {
            warn!(%connection, url = %options.url, error = %err, "link failed");
            Some(TransportEvent::Closed { connection, reason: err.to_string() })
        },
    };
    if let Some(event) = terminal {
        let _ = events.send(event);
    }
    debug!(%connection, "link task finished");
}

/// Drive one connection until it ends.
///
/// Returns the terminal event to report, or `None` when the caller closed
/// the link and no longer listens for it.
async fn session(
    connection: ConnectionId,
    options: &OpenOptions,
    commands: &mut UnboundedReceiver<LinkCommand>,
    events: &UnboundedSender<TransportEvent>,
) -> Result<Option<TransportEvent>, LinkError> {
    // Nothing but Close can be queued before CONNECTED is reported.
    let (mut socket, _) = tokio::select! {
        connected = connect_async(options.url.as_str()) => connected?,
        _ = commands.recv() => return Ok(None),
    };
    write(&mut socket, &StompFrame::connect(options)).await?;
    debug!(%connection, "socket open, CONNECT sent");

    let heartbeat = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::Close) | None => {
                    let _ = socket.close(None).await;
                    return Ok(None);
                },
                Some(other) => trace!(%connection, ?other, "command before CONNECTED ignored"),
            },
            message = socket.next() => match inbound(connection, message)? {
                Inbound::Idle => {},
                Inbound::Ended(event) => return Ok(Some(event)),
                Inbound::Frame(frame) if frame.command == CONNECTED => {
                    break codec::negotiate_heartbeat(options.heartbeat, frame.get("heart-beat"));
                },
                Inbound::Frame(frame) if frame.command == ERROR => {
                    return Ok(Some(error_event(connection, &frame)));
                },
                Inbound::Frame(frame) => return Err(LinkError::Handshake(frame.command)),
            },
        }
    };

    info!(%connection, url = %options.url, ?heartbeat, "STOMP session established");
    let _ = events.send(TransportEvent::Connected { connection });

    let mut keepalive = Keepalive::new(heartbeat);
    loop {
        tokio::select! {
            command = commands.recv() => {
                let frame = match command {
                    Some(LinkCommand::Subscribe { id, destination }) => {
                        StompFrame::subscribe(id, &destination)
                    },
                    Some(LinkCommand::Unsubscribe { id }) => StompFrame::unsubscribe(id),
                    Some(LinkCommand::Send(frame)) => StompFrame::send(&frame),
                    Some(LinkCommand::Close) | None => {
                        let _ = write(&mut socket, &StompFrame::new(codec::DISCONNECT)).await;
                        let _ = socket.close(None).await;
                        debug!(%connection, "link closed by caller");
                        return Ok(None);
                    },
                };
                trace!(%connection, command = %frame.command, "writing frame");
                write(&mut socket, &frame).await?;
                keepalive.sent();
            },
            message = socket.next() => {
                keepalive.seen();
                match inbound(connection, message)? {
                    Inbound::Idle => {},
                    Inbound::Ended(event) => return Ok(Some(event)),
                    Inbound::Frame(frame) if frame.command == MESSAGE => {
                        match frame.into_message() {
                            Ok(frame) => {
                                let _ = events.send(TransportEvent::Frame { connection, frame });
                            },
                            Err(err) => warn!(%connection, error = %err, "dropping MESSAGE"),
                        }
                    },
                    Inbound::Frame(frame) if frame.command == ERROR => {
                        return Ok(Some(error_event(connection, &frame)));
                    },
                    Inbound::Frame(frame) if frame.command == RECEIPT => {
                        trace!(%connection, "receipt");
                    },
                    Inbound::Frame(frame) => {
                        debug!(%connection, command = %frame.command, "unexpected frame");
                    },
                }
            },
            () = keepalive.tick() => {
                if keepalive.incoming_overdue() {
                    warn!(%connection, "broker heartbeat missed");
                    let _ = socket.close(None).await;
                    let reason = "heartbeat timeout".to_string();
                    return Ok(Some(TransportEvent::Closed { connection, reason }));
                }
                if keepalive.outgoing_due() {
                    socket.send(Message::text("\n".to_string())).await?;
                    keepalive.sent();
                }
            },
        }
    }
}

async fn write(socket: &mut Socket, frame: &StompFrame) -> Result<(), LinkError> {
    socket.send(Message::text(frame.encode())).await?;
    Ok(())
}

fn inbound(
    connection: ConnectionId,
    message: Option<Result<Message, tungstenite::Error>>,
) -> Result<Inbound, LinkError> {
    let decoded = match message {
        None => {
            let reason = "stream ended".to_string();
            return Ok(Inbound::Ended(TransportEvent::Closed { connection, reason }));
        },
        Some(Err(err)) => return Err(err.into()),
        Some(Ok(Message::Text(text))) => codec::decode(text.as_str())?,
        Some(Ok(Message::Binary(data))) => {
            codec::decode(std::str::from_utf8(&data).map_err(|_| CodecError::NotUtf8)?)?
        },
        Some(Ok(Message::Close(frame))) => {
            return Ok(Inbound::Ended(close_event(connection, frame)));
        },
        // tungstenite answers pings itself
        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => None,
    };
    Ok(decoded.map_or(Inbound::Idle, Inbound::Frame))
}

fn close_event(connection: ConnectionId, frame: Option<CloseFrame>) -> TransportEvent {
    match frame {
        Some(frame) if frame.code != CloseCode::Normal => {
            let reason = format!("{} {}", u16::from(frame.code), frame.reason.as_str());
            TransportEvent::Closed { connection, reason: reason.trim_end().to_string() }
        },
        _ => TransportEvent::Disconnected { connection },
    }
}

fn error_event(connection: ConnectionId, frame: &StompFrame) -> TransportEvent {
    TransportEvent::Error { connection, message: frame.error_message() }
}

/// Heartbeat bookkeeping for one session.
///
/// Ticks at the shorter of the two negotiated intervals. The broker is
/// overdue after twice its interval without traffic.
struct Keepalive {
    heartbeat: Heartbeat,
    interval: Option<Interval>,
    last_sent: Instant,
    last_seen: Instant,
}

impl Keepalive {
    fn new(heartbeat: Heartbeat) -> Self {
        let period = [heartbeat.outgoing, heartbeat.incoming]
            .into_iter()
            .filter(|d| !d.is_zero())
            .min();
        let interval = period.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let now = Instant::now();
        Self { heartbeat, interval, last_sent: now, last_seen: now }
    }

    async fn tick(&mut self) {
        match &mut self.interval {
            Some(interval) => {
                interval.tick().await;
            },
            None => std::future::pending().await,
        }
    }

    fn sent(&mut self) {
        self.last_sent = Instant::now();
    }

    fn seen(&mut self) {
        self.last_seen = Instant::now();
    }

    fn outgoing_due(&self) -> bool {
        !self.heartbeat.outgoing.is_zero() && self.last_sent.elapsed() >= self.heartbeat.outgoing
    }

    fn incoming_overdue(&self) -> bool {
        !self.heartbeat.incoming.is_zero() && self.last_seen.elapsed() > self.heartbeat.incoming * 2
    }
}
