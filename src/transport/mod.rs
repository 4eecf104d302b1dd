//! Protocol transport boundary
//!
//! Provider sessions drive a STOMP client through this trait and never encode
//! frames or schedule reconnects themselves. [`ws::WsTransport`] is the
//! network implementation; [`memory::MemoryTransport`] stands in for tests.
//! Completion of asynchronous work (connect, reconnect, inbound messages,
//! errors) is reported on the event channel handed to [`StompTransport::activate`].
//!
//! # Event flow
//!
//! ```text
//!   ProviderSession                         StompTransport impl
//!   ───────────────                         ───────────────────
//!   activate(events_tx) ──────────────────► open socket, STOMP CONNECT
//!                       ◄── Connected ────
//!   subscribe(topic)    ──────────────────► SUBSCRIBE
//!   publish(trigger)    ──────────────────► SEND
//!                       ◄── Message ──────  MESSAGE frames, in order
//!                       ◄── Error/Closed ─  socket or ERROR frame
//!   deactivate()        ──────────────────► DISCONNECT, stop reconnecting
//! ```

pub mod memory;
pub mod ws;

use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::feed::ProviderConfig;

pub use memory::{MemoryFeed, MemoryTransport, MemoryTransportFactory};
pub use ws::{WsTransport, WsTransportConfig, WsTransportFactory};

/// Handle for an active subscription on one transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    /// Parse the wire form written by `Display`
    pub fn parse(s: &str) -> Option<Self> {
        s.strip_prefix("sub-")?.parse().ok().map(SubscriptionId)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Events reported by a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection (or reconnection) established
    Connected,
    /// A message arrived on a subscription
    Message {
        subscription: SubscriptionId,
        body: Bytes,
    },
    /// Protocol-level error frame or socket failure
    Error(String),
    /// Socket closed. `reconnecting` is false once the transport gave up.
    Closed { reason: String, reconnecting: bool },
}

/// Transport failures surfaced synchronously
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport failed to initialize: {0}")]
    Init(String),

    #[error("transport not connected")]
    NotConnected,

    #[error("unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),

    #[error("{0}")]
    Other(String),
}

/// A STOMP client owned by exactly one provider session.
///
/// Methods must not block; long-running work is spawned by the
/// implementation and reported back as [`TransportEvent`]s.
pub trait StompTransport: Send + 'static {
    /// Start connecting. Events for this activation go to `events`.
    fn activate(&mut self, events: mpsc::UnboundedSender<TransportEvent>);

    /// Subscribe to a topic
    fn subscribe(&mut self, topic: &str) -> Result<SubscriptionId, TransportError>;

    /// Publish a body to a destination
    fn publish(&mut self, destination: &str, body: &str) -> Result<(), TransportError>;

    /// Drop a subscription
    fn unsubscribe(&mut self, subscription: SubscriptionId) -> Result<(), TransportError>;

    /// Disconnect and stop any reconnect attempts
    fn deactivate(&mut self);
}

/// Creates one transport per provider session
pub trait TransportFactory: Send + Sync + 'static {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn StompTransport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_id_wire_form() {
        let id = SubscriptionId(42);
        assert_eq!(id.to_string(), "sub-42");
        assert_eq!(SubscriptionId::parse("sub-42"), Some(id));
        assert_eq!(SubscriptionId::parse("sub-x"), None);
        assert_eq!(SubscriptionId::parse("42"), None);
    }
}
