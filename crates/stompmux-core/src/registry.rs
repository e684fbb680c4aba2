//! Subscription registry.
//!
//! Maps each destination to at most one live subscription. Subscribing an
//! already-present destination is rejected rather than replaced, so the
//! transport never carries two SUBSCRIBEs for the same channel.

use std::{collections::HashMap, fmt};

use tracing::debug;

use crate::{
    error::{ClientError, HandlerError},
    frame::Frame,
    transport::{ConnectionId, Transport},
};

/// Registry-issued subscription identity. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Consumer of frames for one destination.
///
/// Implemented for any `FnMut(&Frame) -> Result<(), HandlerError>`.
pub trait MessageHandler {
    /// Handle one frame.
    fn on_message(&mut self, frame: &Frame) -> Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
    F: FnMut(&Frame) -> Result<(), HandlerError>,
{
    fn on_message(&mut self, frame: &Frame) -> Result<(), HandlerError> {
        self(frame)
    }
}

/// Pin a closure to the [`MessageHandler`] signature.
///
/// Lets callers write `handler_fn(|frame| { ..; Ok(()) })` without spelling
/// out the argument and return types.
pub fn handler_fn<F>(f: F) -> F
where
    F: FnMut(&Frame) -> Result<(), HandlerError>,
{
    f
}

/// A live subscription.
pub struct Subscription<S> {
    id: SubscriptionId,
    destination: String,
    handle: S,
    handler: Box<dyn MessageHandler>,
}

impl<S> Subscription<S> {
    /// Registry-issued id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Destination this subscription is keyed by.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Transport handle.
    pub fn handle(&self) -> &S {
        &self.handle
    }

    pub(crate) fn handler_mut(&mut self) -> &mut dyn MessageHandler {
        self.handler.as_mut()
    }
}

impl<S: fmt::Debug> fmt::Debug for Subscription<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Destination-keyed subscription table.
///
/// Generic over the transport's subscription handle type `S`.
pub struct SubscriptionRegistry<S> {
    entries: HashMap<String, Subscription<S>>,
    next_id: u64,
}

impl<S> SubscriptionRegistry<S> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { entries: HashMap::new(), next_id: 1 }
    }

    /// Register `destination` with the transport and bind `handler` to it.
    ///
    /// # Errors
    ///
    /// - `AlreadySubscribed` if the destination is present; nothing is sent.
    /// - `Transport` if the transport rejects the SUBSCRIBE; nothing is
    ///   stored.
    pub fn subscribe<T>(
        &mut self,
        transport: &mut T,
        connection: ConnectionId,
        destination: &str,
        handler: Box<dyn MessageHandler>,
    ) -> Result<SubscriptionId, ClientError>
    where
        T: Transport<Subscription = S>,
    {
        if self.entries.contains_key(destination) {
            return Err(ClientError::AlreadySubscribed { destination: destination.to_string() });
        }

        let handle = transport.subscribe(connection, destination)?;
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        debug!(%destination, %id, %connection, "subscribed");
        self.entries.insert(
            destination.to_string(),
            Subscription { id, destination: destination.to_string(), handle, handler },
        );

        Ok(id)
    }

    /// Cancel the subscription for `destination`.
    ///
    /// Returns `false` (and does nothing) if there was none.
    pub fn unsubscribe<T>(&mut self, transport: &mut T, destination: &str) -> bool
    where
        T: Transport<Subscription = S>,
    {
        let Some(subscription) = self.entries.remove(destination) else {
            return false;
        };

        debug!(%destination, id = %subscription.id, "unsubscribed");
        transport.unsubscribe(subscription.handle);
        true
    }

    /// Drop every mapping without contacting the transport.
    ///
    /// Used after the connection is gone, when the transport's own
    /// subscriptions are already invalid.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            debug!(count = self.entries.len(), "clearing subscriptions");
        }
        self.entries.clear();
    }

    /// Subscription bound to `destination`, if any.
    pub fn lookup(&self, destination: &str) -> Option<&Subscription<S>> {
        self.entries.get(destination)
    }

    pub(crate) fn lookup_mut(&mut self, destination: &str) -> Option<&mut Subscription<S>> {
        self.entries.get_mut(destination)
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no live subscriptions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subscribed destinations, in no particular order.
    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl<S> Default for SubscriptionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: fmt::Debug> fmt::Debug for SubscriptionRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("entries", &self.entries)
            .field("next_id", &self.next_id)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{HashSet, VecDeque};

    use proptest::prelude::*;

    use super::*;
    use crate::{error::TransportError, transport::OpenOptions, transport::TransportEvent};

    /// Records calls; assigns sequential subscription handles.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) next: u64,
        pub(crate) opened: Vec<ConnectionId>,
        pub(crate) closed: Vec<ConnectionId>,
        pub(crate) subscribed: Vec<(ConnectionId, String)>,
        pub(crate) unsubscribed: Vec<u64>,
        pub(crate) sent: Vec<Frame>,
        pub(crate) reject_subscribe: bool,
        pub(crate) reject_open: bool,
        pub(crate) events: VecDeque<TransportEvent>,
    }

    impl Transport for RecordingTransport {
        type Subscription = u64;

        fn open(&mut self, _options: &OpenOptions) -> Result<ConnectionId, TransportError> {
            if self.reject_open {
                return Err(TransportError::Rejected("refused".into()));
            }
            self.next += 1;
            let id = ConnectionId(self.next);
            self.opened.push(id);
            Ok(id)
        }

        fn close(&mut self, connection: ConnectionId) {
            self.closed.push(connection);
        }

        fn subscribe(
            &mut self,
            connection: ConnectionId,
            destination: &str,
        ) -> Result<u64, TransportError> {
            if self.reject_subscribe {
                return Err(TransportError::Rejected("no".into()));
            }
            self.next += 1;
            self.subscribed.push((connection, destination.to_string()));
            Ok(self.next)
        }

        fn unsubscribe(&mut self, subscription: u64) {
            self.unsubscribed.push(subscription);
        }

        fn send(&mut self, _connection: ConnectionId, frame: &Frame) -> Result<(), TransportError> {
            self.sent.push(frame.clone());
            Ok(())
        }

        fn poll_events(&mut self) -> Vec<TransportEvent> {
            self.events.drain(..).collect()
        }
    }

    fn noop() -> Box<dyn MessageHandler> {
        Box::new(handler_fn(|_| Ok(())))
    }

    #[test]
    fn subscribe_registers_with_transport() {
        let mut transport = RecordingTransport::default();
        let mut registry = SubscriptionRegistry::new();

        let id = registry.subscribe(&mut transport, ConnectionId(1), "/topic/a", noop()).unwrap();

        assert_eq!(id, SubscriptionId(1));
        assert_eq!(transport.subscribed, vec![(ConnectionId(1), "/topic/a".to_string())]);
        assert_eq!(registry.lookup("/topic/a").map(Subscription::id), Some(id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_subscribe_is_rejected_without_transport_call() {
        let mut transport = RecordingTransport::default();
        let mut registry = SubscriptionRegistry::new();

        registry.subscribe(&mut transport, ConnectionId(1), "/topic/a", noop()).unwrap();
        let result = registry.subscribe(&mut transport, ConnectionId(1), "/topic/a", noop());

        assert!(matches!(result, Err(ClientError::AlreadySubscribed { .. })));
        assert_eq!(transport.subscribed.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn transport_rejection_stores_nothing() {
        let mut transport = RecordingTransport { reject_subscribe: true, ..Default::default() };
        let mut registry = SubscriptionRegistry::new();

        let result = registry.subscribe(&mut transport, ConnectionId(1), "/topic/a", noop());

        assert!(matches!(result, Err(ClientError::Transport(TransportError::Rejected(_)))));
        assert!(registry.lookup("/topic/a").is_none());
    }

    #[test]
    fn unsubscribe_absent_is_noop() {
        let mut transport = RecordingTransport::default();
        let mut registry: SubscriptionRegistry<u64> = SubscriptionRegistry::new();

        assert!(!registry.unsubscribe(&mut transport, "/topic/missing"));
        assert!(transport.unsubscribed.is_empty());
    }

    #[test]
    fn unsubscribe_cancels_transport_handle() {
        let mut transport = RecordingTransport::default();
        let mut registry = SubscriptionRegistry::new();

        registry.subscribe(&mut transport, ConnectionId(1), "/topic/a", noop()).unwrap();
        let handle = *registry.lookup("/topic/a").unwrap().handle();

        assert!(registry.unsubscribe(&mut transport, "/topic/a"));
        assert_eq!(transport.unsubscribed, vec![handle]);
        assert!(registry.is_empty());
    }

    #[test]
    fn clear_is_silent_and_idempotent() {
        let mut transport = RecordingTransport::default();
        let mut registry = SubscriptionRegistry::new();

        registry.subscribe(&mut transport, ConnectionId(1), "/topic/a", noop()).unwrap();
        registry.subscribe(&mut transport, ConnectionId(1), "/topic/b", noop()).unwrap();

        registry.clear();
        registry.clear();

        assert!(registry.lookup("/topic/a").is_none());
        assert!(registry.lookup("/topic/b").is_none());
        assert!(transport.unsubscribed.is_empty());
    }

    #[test]
    fn ids_are_not_reused_after_unsubscribe() {
        let mut transport = RecordingTransport::default();
        let mut registry = SubscriptionRegistry::new();

        let first =
            registry.subscribe(&mut transport, ConnectionId(1), "/topic/a", noop()).unwrap();
        registry.unsubscribe(&mut transport, "/topic/a");
        let second =
            registry.subscribe(&mut transport, ConnectionId(1), "/topic/a", noop()).unwrap();

        assert!(second > first);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe(u8),
        Unsubscribe(u8),
        Clear,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4).prop_map(Op::Subscribe),
            (0u8..4).prop_map(Op::Unsubscribe),
            Just(Op::Clear),
        ]
    }

    proptest! {
        #[test]
        fn registry_tracks_set_model(ops in prop::collection::vec(op(), 0..64)) {
            let mut transport = RecordingTransport::default();
            let mut registry = SubscriptionRegistry::new();
            let mut model = HashSet::new();

            for op in ops {
                match op {
                    Op::Subscribe(n) => {
                        let destination = format!("/topic/{n}");
                        let result = registry.subscribe(
                            &mut transport,
                            ConnectionId(1),
                            &destination,
                            noop(),
                        );
                        prop_assert_eq!(result.is_ok(), model.insert(destination));
                    },
                    Op::Unsubscribe(n) => {
                        let destination = format!("/topic/{n}");
                        let removed = registry.unsubscribe(&mut transport, &destination);
                        prop_assert_eq!(removed, model.remove(&destination));
                    },
                    Op::Clear => {
                        registry.clear();
                        model.clear();
                    },
                }
                prop_assert_eq!(registry.len(), model.len());
            }
        }

        #[test]
        fn clear_empties_every_lookup(subscribed in prop::collection::hash_set(0u8..16, 0..16)) {
            let mut transport = RecordingTransport::default();
            let mut registry = SubscriptionRegistry::new();
            for n in &subscribed {
                registry
                    .subscribe(&mut transport, ConnectionId(1), &format!("/topic/{n}"), noop())
                    .unwrap();
            }

            registry.clear();

            for n in 0u8..16 {
                let destination = format!("/topic/{n}");
                prop_assert!(registry.lookup(&destination).is_none());
            }
        }
    }
}
