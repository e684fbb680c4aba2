//! Connection lifecycle controller.
//!
//! [`Client`] ties the pieces together: it owns the transport, the current
//! [`Connection`], the [`SubscriptionRegistry`] and the [`MessageRouter`], and
//! drives the state machine described in [`crate::state`].
//!
//! # Event Flow
//!
//! Caller requests (`connect`, `subscribe`, ...) go straight to the transport.
//! Their outcomes come back as [`TransportEvent`]s, which the driver feeds to
//! [`Client::handle_event`] or drains with [`Client::pump`]. Events whose
//! [`ConnectionId`] does not match the current connection are stale and
//! ignored, which is what makes `disconnect()` safe while a handshake is
//! still in flight.
//!
//! Everything runs on one thread. Handlers and observers are plain `FnMut`
//! values with no `Send` bound.

use std::{fmt, time::Instant};

use tracing::{debug, info, trace, warn};

use crate::{
    config::ClientConfig,
    error::{ClientError, HandlerError},
    frame::Frame,
    registry::{MessageHandler, SubscriptionId, SubscriptionRegistry},
    router::{MessageRouter, RouterStats},
    state::{Connection, ConnectionState, DisconnectReason, StateChange},
    transport::{ConnectionId, OpenOptions, Transport, TransportEvent},
};

type StateObserver = Box<dyn FnMut(&StateChange)>;
type ErrorObserver = Box<dyn FnMut(&HandlerError)>;

/// Channel-multiplexing STOMP client.
pub struct Client<T: Transport> {
    transport: T,
    config: ClientConfig,
    connection: Option<Connection>,
    registry: SubscriptionRegistry<T::Subscription>,
    router: MessageRouter,
    state_observers: Vec<StateObserver>,
    error_observers: Vec<ErrorObserver>,
}

impl<T: Transport> Client<T> {
    /// Create a disconnected client over `transport`.
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            connection: None,
            registry: SubscriptionRegistry::new(),
            router: MessageRouter::new(),
            state_observers: Vec::new(),
            error_observers: Vec::new(),
        }
    }

    /// Current state. `Disconnected` when there is no connection at all.
    pub fn state(&self) -> ConnectionState {
        self.connection.as_ref().map_or(ConnectionState::Disconnected, Connection::state)
    }

    /// Current connection, if one has been opened and not explicitly
    /// discarded.
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// Live subscriptions.
    pub fn registry(&self) -> &SubscriptionRegistry<T::Subscription> {
        &self.registry
    }

    /// Router counters.
    pub fn router_stats(&self) -> RouterStats {
        self.router.stats()
    }

    /// Configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Register a state-change observer.
    pub fn on_state_change<F>(&mut self, observer: F)
    where
        F: FnMut(&StateChange) + 'static,
    {
        self.state_observers.push(Box::new(observer));
    }

    /// Register an observer for message handler failures.
    pub fn on_handler_error<F>(&mut self, observer: F)
    where
        F: FnMut(&HandlerError) + 'static,
    {
        self.error_observers.push(Box::new(observer));
    }

    /// Open a connection to `url`.
    ///
    /// A live connection is torn down first (closed, subscriptions cleared,
    /// observers told `Disconnected` with [`DisconnectReason::Replaced`]).
    /// The new connection starts in `Connecting`; it becomes `Connected` when
    /// the transport reports the handshake.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the transport refuses to open. Observers see
    /// `Connecting` followed by `Disconnected` with
    /// [`DisconnectReason::OpenFailed`].
    pub fn connect(&mut self, url: &str, now: Instant) -> Result<ConnectionId, ClientError> {
        self.enter_disconnected(DisconnectReason::Replaced, true);
        self.connection = None;

        let options = OpenOptions {
            url: url.to_string(),
            heartbeat: self.config.heartbeat,
            headers: self.config.connect_headers.clone(),
        };

        self.notify(ConnectionState::Disconnected, ConnectionState::Connecting, None);

        match self.transport.open(&options) {
            Ok(id) => {
                info!(%url, connection = %id, "connecting");
                self.connection = Some(Connection::new(url, id, now));
                Ok(id)
            },
            Err(err) => {
                warn!(%url, error = %err, "open failed");
                self.notify(
                    ConnectionState::Connecting,
                    ConnectionState::Disconnected,
                    Some(DisconnectReason::OpenFailed { error: err.to_string() }),
                );
                Err(err.into())
            },
        }
    }

    /// Drop the current connection.
    ///
    /// State becomes `Disconnected` before this returns, regardless of what
    /// the transport reports later. Safe to call while the handshake is
    /// outstanding and safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if self.connection.is_none() {
            debug!("disconnect with no connection");
            return;
        }

        self.enter_disconnected(DisconnectReason::Requested, true);
        self.connection = None;
    }

    /// Subscribe `handler` to `destination`.
    ///
    /// # Errors
    ///
    /// - `NotConnected` unless `Connected`.
    /// - `AlreadySubscribed` if the destination already has a subscription.
    /// - `Transport` if the transport rejects the SUBSCRIBE.
    pub fn subscribe<H>(
        &mut self,
        destination: &str,
        handler: H,
    ) -> Result<SubscriptionId, ClientError>
    where
        H: MessageHandler + 'static,
    {
        let connection = self.connected_id()?;
        self.registry.subscribe(&mut self.transport, connection, destination, Box::new(handler))
    }

    /// Cancel the subscription for `destination`.
    ///
    /// Returns `Ok(false)` if there was none. Once this returns, frames for
    /// `destination` are dropped even if they were already in flight.
    ///
    /// # Errors
    ///
    /// `NotConnected` unless `Connected`.
    pub fn unsubscribe(&mut self, destination: &str) -> Result<bool, ClientError> {
        self.connected_id()?;
        Ok(self.registry.unsubscribe(&mut self.transport, destination))
    }

    /// Send `frame` to its destination.
    ///
    /// # Errors
    ///
    /// - `NotConnected` unless `Connected`.
    /// - `Transport` if the transport fails to send.
    pub fn publish(&mut self, frame: &Frame) -> Result<(), ClientError> {
        let connection = self.connected_id()?;
        trace!(destination = %frame.destination, bytes = frame.body.len(), "publishing");
        self.transport.send(connection, frame)?;
        Ok(())
    }

    /// Process one transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        let Some(conn) = self.connection.as_ref() else {
            debug!(connection = %event.connection(), "event with no connection, ignoring");
            return;
        };

        if !conn.matches(event.connection()) {
            debug!(
                connection = %event.connection(),
                current = %conn.id(),
                "stale event, ignoring"
            );
            return;
        }

        let state = conn.state();
        match event {
            TransportEvent::Connected { .. } => {
                if state != ConnectionState::Connecting {
                    warn!(%state, "unexpected CONNECTED");
                    return;
                }
                self.set_state(ConnectionState::Connected);
                info!(url = %self.url(), "connected");
                self.notify(ConnectionState::Connecting, ConnectionState::Connected, None);
            },
            TransportEvent::Disconnected { .. } => {
                self.enter_disconnected(DisconnectReason::ServerDisconnect, false);
            },
            TransportEvent::Closed { reason, .. } => {
                self.enter_disconnected(DisconnectReason::SocketClosed { reason }, false);
            },
            TransportEvent::Error { message, .. } => {
                if state == ConnectionState::Disconnected {
                    debug!(%message, "error after disconnect, ignoring");
                    return;
                }
                warn!(%message, "stomp error");
                let reason = DisconnectReason::StompError { message };
                self.set_state(ConnectionState::Erroring);
                self.notify(state, ConnectionState::Erroring, Some(reason.clone()));
                self.enter_disconnected(reason, false);
            },
            TransportEvent::Frame { frame, .. } => {
                if state != ConnectionState::Connected {
                    trace!(destination = %frame.destination, %state, "frame while not connected");
                    return;
                }
                let observers = &mut self.error_observers;
                self.router.route(&mut self.registry, &frame, &mut |err: &HandlerError| {
                    for observer in observers.iter_mut() {
                        observer(err);
                    }
                });
            },
        }
    }

    /// Drain the transport's queued events into [`Client::handle_event`].
    ///
    /// Returns the number of events processed.
    pub fn pump(&mut self) -> usize {
        let events = self.transport.poll_events();
        let count = events.len();
        for event in events {
            self.handle_event(event);
        }
        count
    }

    /// Abandon a handshake that has exceeded the connect timeout.
    ///
    /// Call periodically. Does nothing unless `Connecting`.
    pub fn tick(&mut self, now: Instant) {
        let Some(elapsed) = self
            .connection
            .as_ref()
            .and_then(|conn| conn.check_timeout(now, self.config.connect_timeout))
        else {
            return;
        };

        warn!(?elapsed, "connect timeout");
        self.enter_disconnected(DisconnectReason::ConnectTimeout { elapsed }, true);
    }

    fn connected_id(&self) -> Result<ConnectionId, ClientError> {
        match &self.connection {
            Some(conn) if conn.state() == ConnectionState::Connected => Ok(conn.id()),
            _ => Err(ClientError::NotConnected { state: self.state() }),
        }
    }

    fn url(&self) -> &str {
        self.connection.as_ref().map_or("", Connection::url)
    }

    fn set_state(&mut self, state: ConnectionState) {
        if let Some(conn) = self.connection.as_mut() {
            conn.set_state(state);
        }
    }

    /// Move the current connection to `Disconnected`, clearing subscriptions.
    ///
    /// `close_transport` is set for locally initiated teardown; a connection
    /// the transport already lost is not closed again.
    fn enter_disconnected(&mut self, reason: DisconnectReason, close_transport: bool) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };

        let previous = conn.state();
        if previous == ConnectionState::Disconnected {
            return;
        }

        let id = conn.id();
        conn.set_state(ConnectionState::Disconnected);
        if close_transport {
            self.transport.close(id);
        }
        self.registry.clear();

        info!(connection = %id, %reason, "disconnected");
        self.notify(previous, ConnectionState::Disconnected, Some(reason));
    }

    fn notify(
        &mut self,
        previous: ConnectionState,
        current: ConnectionState,
        reason: Option<DisconnectReason>,
    ) {
        debug!(%previous, %current, "state change");
        let change = StateChange { previous, current, reason };
        for observer in &mut self.state_observers {
            observer(&change);
        }
    }
}

impl<T> fmt::Debug for Client<T>
where
    T: Transport + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.transport)
            .field("config", &self.config)
            .field("connection", &self.connection)
            .field("registry", &self.registry)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}
