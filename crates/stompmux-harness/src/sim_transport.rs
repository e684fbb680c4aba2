//! In-process simulated transport.
//!
//! [`SimTransport`] stands in for a STOMP-over-WebSocket client library. It
//! keeps a tiny loopback broker: connections, per-connection subscriptions,
//! and a queue of [`TransportEvent`]s the client drains with `poll_events`.
//! Nothing happens unless the test (or the CLI driver) asks for it, so every
//! interleaving is reproducible.
//!
//! The handle is cheap to clone and all clones share one network, so a test
//! can keep a clone to inject events after handing the transport to a
//! [`stompmux_core::Client`]. Single-threaded by construction (`Rc`).

use std::{
    cell::RefCell,
    collections::{BTreeMap, VecDeque},
    rc::Rc,
};

use stompmux_core::{ConnectionId, Frame, OpenOptions, Transport, TransportError, TransportEvent};
use tracing::{debug, trace};

/// Subscription handle issued by [`SimTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimSubscription {
    /// Connection the subscription was made on.
    pub connection: ConnectionId,
    /// Transport-side subscription id (the STOMP `id` header).
    pub id: u64,
}

/// Transport calls, in the order they were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    /// `open` was called and issued this id.
    Open {
        /// Issued connection.
        connection: ConnectionId,
        /// Requested URL.
        url: String,
    },
    /// `close` was called.
    Close {
        /// Closed connection.
        connection: ConnectionId,
    },
    /// `subscribe` was called.
    Subscribe {
        /// Connection subscribed on.
        connection: ConnectionId,
        /// Destination requested.
        destination: String,
    },
    /// `unsubscribe` was called.
    Unsubscribe {
        /// Cancelled subscription.
        subscription: SimSubscription,
    },
    /// `send` was called.
    Send {
        /// Connection sent on.
        connection: ConnectionId,
        /// Frame sent.
        frame: Frame,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Handshaking,
    Open,
    Closed,
}

#[derive(Debug)]
struct SimLink {
    state: LinkState,
    options: OpenOptions,
    subscriptions: BTreeMap<u64, String>,
}

#[derive(Debug, Default)]
struct SimNetwork {
    next_id: u64,
    links: BTreeMap<ConnectionId, SimLink>,
    events: VecDeque<TransportEvent>,
    calls: Vec<SimCall>,
    auto_accept: bool,
    refuse_open: bool,
    relay: Option<(String, String)>,
}

impl SimNetwork {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn live(&self, connection: ConnectionId) -> Result<&SimLink, TransportError> {
        match self.links.get(&connection) {
            Some(link) if link.state == LinkState::Open => Ok(link),
            _ => Err(TransportError::UnknownConnection(connection.0)),
        }
    }

    fn fan_out(&mut self, frame: &Frame) -> usize {
        let targets: Vec<ConnectionId> = self
            .links
            .iter()
            .filter(|(_, link)| link.state == LinkState::Open)
            .filter(|(_, link)| link.subscriptions.values().any(|d| *d == frame.destination))
            .map(|(id, _)| *id)
            .collect();

        for connection in &targets {
            self.events
                .push_back(TransportEvent::Frame { connection: *connection, frame: frame.clone() });
        }
        targets.len()
    }

    fn end(&mut self, connection: ConnectionId) {
        if let Some(link) = self.links.get_mut(&connection) {
            link.state = LinkState::Closed;
        }
    }
}

/// Simulated STOMP transport backed by an in-process loopback broker.
#[derive(Debug, Clone, Default)]
pub struct SimTransport {
    network: Rc<RefCell<SimNetwork>>,
}

impl SimTransport {
    /// Create a transport whose handshakes complete only when
    /// [`SimTransport::accept`] is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that queues `Connected` as soon as `open` is
    /// called.
    pub fn auto_accept() -> Self {
        let transport = Self::new();
        transport.network.borrow_mut().auto_accept = true;
        transport
    }

    /// Republish frames sent to `app_prefix...` on `broker_prefix...`, the way
    /// a broker relays application destinations to subscriber destinations.
    #[must_use]
    pub fn with_relay(
        self,
        app_prefix: impl Into<String>,
        broker_prefix: impl Into<String>,
    ) -> Self {
        self.network.borrow_mut().relay = Some((app_prefix.into(), broker_prefix.into()));
        self
    }

    /// Make subsequent `open` calls fail.
    pub fn refuse_open(&self, refuse: bool) {
        self.network.borrow_mut().refuse_open = refuse;
    }

    /// Complete the handshake for `connection` by queueing `Connected`.
    ///
    /// Queues the event even for connections the client already closed, to
    /// model a handshake that was in flight when the client gave up.
    pub fn accept(&self, connection: ConnectionId) {
        let mut net = self.network.borrow_mut();
        if let Some(link) = net.links.get_mut(&connection)
            && link.state == LinkState::Handshaking
        {
            link.state = LinkState::Open;
        }
        debug!(%connection, "handshake accepted");
        net.events.push_back(TransportEvent::Connected { connection });
    }

    /// Drop the socket under `connection`.
    pub fn drop_socket(&self, connection: ConnectionId, reason: impl Into<String>) {
        let mut net = self.network.borrow_mut();
        net.end(connection);
        net.events.push_back(TransportEvent::Closed { connection, reason: reason.into() });
    }

    /// Send a STOMP ERROR on `connection`; the broker then closes it.
    pub fn stomp_error(&self, connection: ConnectionId, message: impl Into<String>) {
        let mut net = self.network.borrow_mut();
        net.end(connection);
        net.events.push_back(TransportEvent::Error { connection, message: message.into() });
    }

    /// Orderly broker-side disconnect of `connection`.
    pub fn server_disconnect(&self, connection: ConnectionId) {
        let mut net = self.network.borrow_mut();
        net.end(connection);
        net.events.push_back(TransportEvent::Disconnected { connection });
    }

    /// Queue `frame` on `connection` regardless of subscriptions, like a
    /// MESSAGE already on the wire.
    pub fn deliver(&self, connection: ConnectionId, frame: Frame) {
        self.network.borrow_mut().events.push_back(TransportEvent::Frame { connection, frame });
    }

    /// Broker-side publish: queue `frame` on every open connection subscribed
    /// to its destination. Returns the number of connections reached.
    pub fn publish(&self, frame: &Frame) -> usize {
        self.network.borrow_mut().fan_out(frame)
    }

    /// Every transport call made so far.
    pub fn calls(&self) -> Vec<SimCall> {
        self.network.borrow().calls.clone()
    }

    /// Connections opened so far, in order.
    pub fn opened(&self) -> Vec<ConnectionId> {
        self.network
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                SimCall::Open { connection, .. } => Some(*connection),
                _ => None,
            })
            .collect()
    }

    /// Connections the client closed, in order.
    pub fn closed(&self) -> Vec<ConnectionId> {
        self.network
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                SimCall::Close { connection } => Some(*connection),
                _ => None,
            })
            .collect()
    }

    /// Connections whose socket is open (handshaking or connected).
    pub fn live_connections(&self) -> Vec<ConnectionId> {
        self.network
            .borrow()
            .links
            .iter()
            .filter(|(_, link)| link.state != LinkState::Closed)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Destinations the broker currently holds for `connection`.
    pub fn broker_subscriptions(&self, connection: ConnectionId) -> Vec<String> {
        self.network
            .borrow()
            .links
            .get(&connection)
            .map(|link| link.subscriptions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Options `connection` was opened with.
    pub fn open_options(&self, connection: ConnectionId) -> Option<OpenOptions> {
        self.network.borrow().links.get(&connection).map(|link| link.options.clone())
    }

    /// Number of events waiting to be polled.
    pub fn pending_events(&self) -> usize {
        self.network.borrow().events.len()
    }
}

impl Transport for SimTransport {
    type Subscription = SimSubscription;

    fn open(&mut self, options: &OpenOptions) -> Result<ConnectionId, TransportError> {
        let mut net = self.network.borrow_mut();
        if net.refuse_open {
            return Err(TransportError::Io(format!("connection refused: {}", options.url)));
        }

        let connection = ConnectionId(net.next());
        net.calls.push(SimCall::Open { connection, url: options.url.clone() });
        net.links.insert(
            connection,
            SimLink {
                state: LinkState::Handshaking,
                options: options.clone(),
                subscriptions: BTreeMap::new(),
            },
        );

        let auto_accept = net.auto_accept;
        drop(net);
        if auto_accept {
            self.accept(connection);
        }
        Ok(connection)
    }

    fn close(&mut self, connection: ConnectionId) {
        let mut net = self.network.borrow_mut();
        net.calls.push(SimCall::Close { connection });

        let was_open =
            net.links.get(&connection).is_some_and(|link| link.state != LinkState::Closed);
        net.end(connection);
        if was_open {
            let reason = "closed by client".to_string();
            net.events.push_back(TransportEvent::Closed { connection, reason });
        }
    }

    fn subscribe(
        &mut self,
        connection: ConnectionId,
        destination: &str,
    ) -> Result<SimSubscription, TransportError> {
        let mut net = self.network.borrow_mut();
        net.live(connection)?;

        let id = net.next();
        net.calls.push(SimCall::Subscribe { connection, destination: destination.to_string() });
        if let Some(link) = net.links.get_mut(&connection) {
            link.subscriptions.insert(id, destination.to_string());
        }
        trace!(%connection, %destination, id, "broker subscription added");
        Ok(SimSubscription { connection, id })
    }

    fn unsubscribe(&mut self, subscription: SimSubscription) {
        let mut net = self.network.borrow_mut();
        net.calls.push(SimCall::Unsubscribe { subscription });
        if let Some(link) = net.links.get_mut(&subscription.connection) {
            link.subscriptions.remove(&subscription.id);
        }
    }

    fn send(&mut self, connection: ConnectionId, frame: &Frame) -> Result<(), TransportError> {
        let mut net = self.network.borrow_mut();
        net.live(connection)?;
        net.calls.push(SimCall::Send { connection, frame: frame.clone() });

        let relayed = net.relay.as_ref().and_then(|(app, broker)| {
            frame.destination.strip_prefix(app.as_str()).map(|rest| {
                let mut out = frame.clone();
                out.destination = format!("{broker}{rest}");
                out
            })
        });
        let outbound = relayed.unwrap_or_else(|| frame.clone());
        let reached = net.fan_out(&outbound);
        trace!(destination = %outbound.destination, reached, "loopback publish");
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        self.network.borrow_mut().events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use stompmux_core::Heartbeat;

    use super::*;

    fn options(url: &str) -> OpenOptions {
        OpenOptions { url: url.into(), heartbeat: Heartbeat::default(), headers: BTreeMap::new() }
    }

    #[test]
    fn handshake_completes_on_accept() {
        let mut transport = SimTransport::new();
        let id = transport.open(&options("ws://sim")).unwrap();

        assert!(transport.poll_events().is_empty());

        transport.accept(id);
        assert_eq!(transport.poll_events(), vec![TransportEvent::Connected { connection: id }]);
    }

    #[test]
    fn auto_accept_queues_connected() {
        let mut transport = SimTransport::auto_accept();
        let id = transport.open(&options("ws://sim")).unwrap();
        assert_eq!(transport.poll_events(), vec![TransportEvent::Connected { connection: id }]);
    }

    #[test]
    fn subscribe_requires_open_link() {
        let mut transport = SimTransport::new();
        let id = transport.open(&options("ws://sim")).unwrap();

        let result = transport.subscribe(id, "/topic/a");
        assert_eq!(result, Err(TransportError::UnknownConnection(id.0)));
    }

    #[test]
    fn send_loops_back_to_subscribers() {
        let mut transport = SimTransport::auto_accept();
        let id = transport.open(&options("ws://sim")).unwrap();
        transport.poll_events();
        transport.subscribe(id, "/topic/a").unwrap();

        transport.send(id, &Frame::new("/topic/a", "x")).unwrap();
        transport.send(id, &Frame::new("/topic/b", "y")).unwrap();

        assert_eq!(
            transport.poll_events(),
            vec![TransportEvent::Frame { connection: id, frame: Frame::new("/topic/a", "x") }]
        );
    }

    #[test]
    fn relay_rewrites_app_prefix() {
        let mut transport = SimTransport::auto_accept().with_relay("/pub", "/sub");
        let id = transport.open(&options("ws://sim")).unwrap();
        transport.poll_events();
        transport.subscribe(id, "/sub/chat/room").unwrap();

        transport.send(id, &Frame::new("/pub/chat/room", "hi")).unwrap();

        let events = transport.poll_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            TransportEvent::Frame { frame, .. } if frame.destination == "/sub/chat/room"
        ));
    }

    #[test]
    fn unsubscribe_stops_fan_out() {
        let mut transport = SimTransport::auto_accept();
        let id = transport.open(&options("ws://sim")).unwrap();
        transport.poll_events();
        let sub = transport.subscribe(id, "/topic/a").unwrap();

        transport.unsubscribe(sub);

        assert_eq!(transport.publish(&Frame::new("/topic/a", "x")), 0);
        assert!(transport.broker_subscriptions(id).is_empty());
    }

    #[test]
    fn close_marks_link_closed() {
        let mut transport = SimTransport::auto_accept();
        let id = transport.open(&options("ws://sim")).unwrap();

        transport.close(id);

        assert!(transport.live_connections().is_empty());
        assert_eq!(transport.closed(), vec![id]);
    }
}
