//! In-memory transport
//!
//! Stands in for a STOMP client in tests and demos. Each provider id gets a
//! [`MemoryFeed`] that plays the remote producer: it can report connects,
//! push frames and fail the connection, and it records everything the
//! session subscribed to and published.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::feed::ProviderConfig;

use super::{StompTransport, SubscriptionId, TransportError, TransportEvent, TransportFactory};

#[derive(Debug, Default)]
struct FeedState {
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    active: bool,
    transports_created: usize,
    activations: usize,
    next_subscription: u64,
    subscriptions: Vec<(SubscriptionId, String)>,
    published: Vec<(String, String)>,
}

type SharedFeed = Arc<Mutex<FeedState>>;

/// Factory handing out [`MemoryTransport`]s, one feed per provider id
#[derive(Clone)]
pub struct MemoryTransportFactory {
    feeds: Arc<Mutex<HashMap<String, SharedFeed>>>,
    auto_connect: bool,
    init_failure: Option<String>,
}

impl MemoryTransportFactory {
    /// Transports report `Connected` as soon as they are activated
    pub fn new() -> Self {
        Self {
            feeds: Arc::new(Mutex::new(HashMap::new())),
            auto_connect: true,
            init_failure: None,
        }
    }

    /// Transports wait for [`MemoryFeed::connect`] before reporting `Connected`
    pub fn manual_connect() -> Self {
        Self {
            auto_connect: false,
            ..Self::new()
        }
    }

    /// Every `create` call fails with the given reason
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            init_failure: Some(reason.into()),
            ..Self::new()
        }
    }

    /// Producer-side handle for a provider id
    pub fn feed(&self, provider_id: &str) -> MemoryFeed {
        MemoryFeed {
            state: self.shared(provider_id),
        }
    }

    fn shared(&self, provider_id: &str) -> SharedFeed {
        let mut feeds = self.feeds.lock();
        Arc::clone(feeds.entry(provider_id.to_string()).or_default())
    }
}

impl Default for MemoryTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn StompTransport>, TransportError> {
        if let Some(ref reason) = self.init_failure {
            return Err(TransportError::Init(reason.clone()));
        }

        let state = self.shared(&config.provider_id);
        state.lock().transports_created += 1;

        Ok(Box::new(MemoryTransport {
            state,
            auto_connect: self.auto_connect,
        }))
    }
}

/// Transport backed by a [`MemoryFeed`]
pub struct MemoryTransport {
    state: SharedFeed,
    auto_connect: bool,
}

impl StompTransport for MemoryTransport {
    fn activate(&mut self, events: mpsc::UnboundedSender<TransportEvent>) {
        let mut state = self.state.lock();
        state.active = true;
        state.activations += 1;
        state.subscriptions.clear();
        if self.auto_connect {
            let _ = events.send(TransportEvent::Connected);
        }
        state.events = Some(events);
    }

    fn subscribe(&mut self, topic: &str) -> Result<SubscriptionId, TransportError> {
        let mut state = self.state.lock();
        if !state.active {
            return Err(TransportError::NotConnected);
        }
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        state.subscriptions.push((id, topic.to_string()));
        Ok(id)
    }

    fn publish(&mut self, destination: &str, body: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.active {
            return Err(TransportError::NotConnected);
        }
        state
            .published
            .push((destination.to_string(), body.to_string()));
        Ok(())
    }

    fn unsubscribe(&mut self, subscription: SubscriptionId) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|(id, _)| *id != subscription);
        if state.subscriptions.len() == before {
            return Err(TransportError::UnknownSubscription(subscription));
        }
        Ok(())
    }

    fn deactivate(&mut self) {
        let mut state = self.state.lock();
        state.active = false;
        state.events = None;
        state.subscriptions.clear();
    }
}

/// Producer-side view of one provider's transport
#[derive(Clone)]
pub struct MemoryFeed {
    state: SharedFeed,
}

impl MemoryFeed {
    fn emit(&self, event: TransportEvent) -> bool {
        let state = self.state.lock();
        match state.events {
            Some(ref tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Report a (re)connect. Returns false if no transport is active.
    pub fn connect(&self) -> bool {
        self.emit(TransportEvent::Connected)
    }

    /// Deliver a frame body on the latest subscription
    pub fn frame(&self, body: impl Into<String>) -> bool {
        let subscription = {
            let state = self.state.lock();
            state
                .subscriptions
                .last()
                .map(|(id, _)| *id)
                .unwrap_or(SubscriptionId(0))
        };
        self.emit(TransportEvent::Message {
            subscription,
            body: Bytes::from(body.into()),
        })
    }

    /// Report a protocol or socket error
    pub fn error(&self, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Error(reason.into()))
    }

    /// Report the socket closing
    pub fn close(&self, reason: impl Into<String>, reconnecting: bool) -> bool {
        self.emit(TransportEvent::Closed {
            reason: reason.into(),
            reconnecting,
        })
    }

    /// Whether a transport is activated and not yet deactivated
    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Number of transports the factory created for this provider
    pub fn transports_created(&self) -> usize {
        self.state.lock().transports_created
    }

    /// Number of times a transport was activated
    pub fn activations(&self) -> usize {
        self.state.lock().activations
    }

    /// Topics currently subscribed
    pub fn subscriptions(&self) -> Vec<String> {
        self.state
            .lock()
            .subscriptions
            .iter()
            .map(|(_, topic)| topic.clone())
            .collect()
    }

    /// Every (destination, body) published so far
    pub fn published(&self) -> Vec<(String, String)> {
        self.state.lock().published.clone()
    }
}
