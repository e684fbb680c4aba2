//! Destination-based frame demultiplexing.
//!
//! The router never fails: unmatched frames are dropped (the channel may have
//! been torn down between send and receive) and handler failures are handed
//! to the caller-supplied error sink. A panicking handler counts as a failure
//! when panics unwind; under `panic = "abort"` there is nothing to catch.

use std::panic::{self, AssertUnwindSafe};

use tracing::{trace, warn};

use crate::{error::HandlerError, frame::Frame, registry::SubscriptionRegistry};

/// What happened to one routed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handler ran and returned `Ok`.
    Delivered,
    /// No subscription for the destination.
    Dropped,
    /// Handler ran and returned `Err`.
    HandlerFailed,
}

/// Running counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Frames delivered to a handler that succeeded.
    pub routed: u64,
    /// Frames with no matching subscription.
    pub dropped: u64,
    /// Frames whose handler failed.
    pub handler_failures: u64,
}

/// Frame router
#[derive(Debug, Default)]
pub struct MessageRouter {
    stats: RouterStats,
}

impl MessageRouter {
    /// Create a router with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters since creation.
    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    /// Route one frame.
    ///
    /// Looks up `frame.destination` exactly as given. A handler error is
    /// tagged with the destination and passed to `on_error`; it is not
    /// returned.
    pub fn route<S>(
        &mut self,
        registry: &mut SubscriptionRegistry<S>,
        frame: &Frame,
        on_error: &mut dyn FnMut(&HandlerError),
    ) -> RouteOutcome {
        let Some(subscription) = registry.lookup_mut(&frame.destination) else {
            trace!(destination = %frame.destination, "no subscription, dropping frame");
            self.stats.dropped += 1;
            return RouteOutcome::Dropped;
        };

        let handler = subscription.handler_mut();
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.on_message(frame)))
            .unwrap_or_else(|payload| Err(HandlerError::new(panic_message(payload.as_ref()))));

        match result {
            Ok(()) => {
                trace!(destination = %frame.destination, bytes = frame.body.len(), "routed");
                self.stats.routed += 1;
                RouteOutcome::Delivered
            },
            Err(mut err) => {
                err.destination.clone_from(&frame.destination);
                warn!(destination = %frame.destination, error = %err.message, "handler failed");
                self.stats.handler_failures += 1;
                on_error(&err);
                RouteOutcome::HandlerFailed
            },
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload");
    format!("handler panicked: {detail}")
}
