//! Consumer handles
//!
//! A session keeps one handle per attached consumer. The handle only holds the
//! sending half of the consumer's bounded outbound channel, so the consumer's
//! lifetime is independent of the session: once the consumer drops its
//! receiver, sends fail and the session forgets the handle.
//!
//! Sessions never wait on a consumer. A consumer whose queue is full when an
//! event is pushed is evicted: the session drops it and the gateway closes its
//! channel.

use std::fmt;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::envelope::Envelope;

/// Identifier of one consumer channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// Outcome of a non-blocking delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Outbound queue full
    Lagging,
    /// Receiver dropped
    Closed,
}

/// Sending side of one consumer's outbound channel
#[derive(Debug, Clone)]
pub struct ConsumerHandle {
    id: ConsumerId,
    tx: mpsc::Sender<Envelope>,
    evicted: CancellationToken,
}

impl ConsumerHandle {
    pub fn new(id: ConsumerId, tx: mpsc::Sender<Envelope>) -> Self {
        Self {
            id,
            tx,
            evicted: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Offer an envelope without waiting for queue space
    pub fn deliver(&self, envelope: Envelope) -> Delivery {
        match self.tx.try_send(envelope) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Lagging,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Deliver an envelope, waiting for queue space. Returns false if the
    /// consumer is gone.
    pub async fn send(&self, envelope: Envelope) -> bool {
        self.tx.send(envelope).await.is_ok()
    }

    /// Mark the consumer as too slow; every clone observes it
    pub fn evict(&self) {
        self.evicted.cancel();
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.is_cancelled()
    }

    /// Completes once [`evict`](Self::evict) was called on any clone
    pub async fn evicted(&self) {
        self.evicted.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MessageType;

    fn event() -> Envelope {
        Envelope::event(MessageType::Status, serde_json::json!({}))
    }

    #[tokio::test]
    async fn test_full_queue_reports_lagging() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = ConsumerHandle::new(ConsumerId(1), tx);

        assert_eq!(handle.deliver(event()), Delivery::Delivered);
        assert_eq!(handle.deliver(event()), Delivery::Lagging);

        rx.recv().await.unwrap();
        assert_eq!(handle.deliver(event()), Delivery::Delivered);

        drop(rx);
        assert_eq!(handle.deliver(event()), Delivery::Closed);
        assert!(!handle.send(event()).await);
    }

    #[tokio::test]
    async fn test_eviction_seen_by_clones() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ConsumerHandle::new(ConsumerId(1), tx);
        let clone = handle.clone();

        clone.evict();
        assert!(handle.is_evicted());
        tokio::time::timeout(std::time::Duration::from_secs(1), handle.evicted())
            .await
            .unwrap();
    }
}
