//! Reference model for model-based testing.
//!
//! [`ModelWorld`] is the obviously-correct version of the client: a state
//! enum, a set of subscribed channels and a delivery counter. Property tests
//! apply the same random [`Operation`] sequence to the model and to a real
//! [`stompmux_core::Client`] over [`crate::SimTransport`], then compare.

use std::collections::{BTreeMap, BTreeSet};

use stompmux_core::ConnectionState;

/// Small channel number. Keeps the destination space tiny so random
/// sequences hit duplicates and unsubscribes often.
pub type Channel = u8;

/// Destination string for a channel.
pub fn destination(channel: Channel) -> String {
    format!("/sub/channel/{channel}")
}

/// One step of a generated scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Caller connects (replacing any live connection).
    Connect,
    /// Transport completes the current handshake.
    Accept,
    /// Transport completes the handshake of an abandoned connection.
    AcceptStale,
    /// Caller disconnects.
    Disconnect,
    /// Socket under the current connection drops.
    DropSocket,
    /// Broker sends ERROR on the current connection.
    StompError,
    /// Caller subscribes to a channel.
    Subscribe {
        /// Target channel.
        channel: Channel,
    },
    /// Caller unsubscribes from a channel.
    Unsubscribe {
        /// Target channel.
        channel: Channel,
    },
    /// Broker publishes one message on a channel.
    Publish {
        /// Target channel.
        channel: Channel,
    },
}

/// Errors the model can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// Operation requires `Connected`.
    NotConnected,
    /// Channel already subscribed.
    AlreadySubscribed,
}

/// Outcome of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation succeeded (or had nothing to report).
    Ok,
    /// Unsubscribe succeeded; whether a subscription was removed.
    Unsubscribed(bool),
    /// Operation failed.
    Error(OperationError),
}

/// Reference model of one client.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    state: ConnectionState,
    subscriptions: BTreeSet<Channel>,
    delivered: BTreeMap<Channel, usize>,
}

impl ModelWorld {
    /// A disconnected client with no history.
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            subscriptions: BTreeSet::new(),
            delivered: BTreeMap::new(),
        }
    }

    /// Expected connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Expected subscribed channels.
    pub fn subscriptions(&self) -> &BTreeSet<Channel> {
        &self.subscriptions
    }

    /// Expected handler invocations per channel.
    pub fn delivered(&self) -> &BTreeMap<Channel, usize> {
        &self.delivered
    }

    /// Apply one operation.
    pub fn apply(&mut self, op: Operation) -> OperationResult {
        match op {
            Operation::Connect => {
                self.state = ConnectionState::Connecting;
                self.subscriptions.clear();
                OperationResult::Ok
            },
            Operation::Accept => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Connected;
                }
                OperationResult::Ok
            },
            Operation::AcceptStale => OperationResult::Ok,
            Operation::Disconnect | Operation::DropSocket | Operation::StompError => {
                self.state = ConnectionState::Disconnected;
                self.subscriptions.clear();
                OperationResult::Ok
            },
            Operation::Subscribe { channel } => {
                if self.state != ConnectionState::Connected {
                    return OperationResult::Error(OperationError::NotConnected);
                }
                if !self.subscriptions.insert(channel) {
                    return OperationResult::Error(OperationError::AlreadySubscribed);
                }
                OperationResult::Ok
            },
            Operation::Unsubscribe { channel } => {
                if self.state != ConnectionState::Connected {
                    return OperationResult::Error(OperationError::NotConnected);
                }
                OperationResult::Unsubscribed(self.subscriptions.remove(&channel))
            },
            Operation::Publish { channel } => {
                if self.state == ConnectionState::Connected && self.subscriptions.contains(&channel)
                {
                    *self.delivered.entry(channel).or_insert(0) += 1;
                }
                OperationResult::Ok
            },
        }
    }
}

impl Default for ModelWorld {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_needs_connection() {
        let mut model = ModelWorld::new();
        assert_eq!(
            model.apply(Operation::Subscribe { channel: 1 }),
            OperationResult::Error(OperationError::NotConnected)
        );
    }

    #[test]
    fn duplicate_subscribe_rejected() {
        let mut model = ModelWorld::new();
        model.apply(Operation::Connect);
        model.apply(Operation::Accept);

        assert_eq!(model.apply(Operation::Subscribe { channel: 1 }), OperationResult::Ok);
        assert_eq!(
            model.apply(Operation::Subscribe { channel: 1 }),
            OperationResult::Error(OperationError::AlreadySubscribed)
        );
        assert_eq!(model.subscriptions().len(), 1);
    }

    #[test]
    fn drop_clears_subscriptions() {
        let mut model = ModelWorld::new();
        model.apply(Operation::Connect);
        model.apply(Operation::Accept);
        model.apply(Operation::Subscribe { channel: 1 });

        model.apply(Operation::DropSocket);

        assert_eq!(model.state(), ConnectionState::Disconnected);
        assert!(model.subscriptions().is_empty());
    }
}
