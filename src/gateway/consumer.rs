//! Gateway side of a consumer channel
//!
//! Each consumer channel gets its own task that takes requests in order,
//! answers every request exactly once on that consumer's outbound channel,
//! and releases the consumer's session attachment when the channel closes or
//! a session evicts the consumer for not keeping up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::feed::ProviderConfig;
use crate::registry::{Release, SessionRegistry};

use super::client::ConsumerClient;
use super::config::GatewayConfig;
use super::envelope::{Envelope, MessageType};
use super::error::GatewayError;
use super::handle::{ConsumerHandle, ConsumerId};

/// Consumer-side ends of a gateway channel
pub struct ConsumerChannel {
    /// Identifier assigned by the gateway
    pub id: ConsumerId,
    /// Requests to the gateway
    pub requests: mpsc::Sender<Envelope>,
    /// Responses and pushed events from the gateway
    pub inbound: mpsc::Receiver<Envelope>,
}

/// Entry point for consumers
pub struct Gateway {
    registry: Arc<SessionRegistry>,
    config: GatewayConfig,
    next_consumer_id: AtomicU64,
}

impl Gateway {
    pub fn new(registry: Arc<SessionRegistry>, config: GatewayConfig) -> Self {
        Self {
            registry,
            config,
            next_consumer_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Open a raw envelope channel for a new consumer
    pub fn open(self: &Arc<Self>) -> ConsumerChannel {
        let id = ConsumerId(self.next_consumer_id.fetch_add(1, Ordering::Relaxed));
        let (request_tx, request_rx) = mpsc::channel(self.config.request_queue.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_queue.max(1));

        let session = ConsumerSession {
            handle: ConsumerHandle::new(id, outbound_tx),
            gateway: Arc::clone(self),
            attached: None,
        };
        tokio::spawn(session.run(request_rx));

        tracing::debug!(consumer = %id, "Consumer channel opened");

        ConsumerChannel {
            id,
            requests: request_tx,
            inbound: outbound_rx,
        }
    }

    /// Open a channel wrapped in a correlating client
    pub fn client(self: &Arc<Self>) -> ConsumerClient {
        ConsumerClient::new(self.open(), self.config.request_timeout)
    }
}

/// Per-consumer request loop
struct ConsumerSession {
    handle: ConsumerHandle,
    gateway: Arc<Gateway>,
    attached: Option<String>,
}

impl ConsumerSession {
    async fn run(mut self, mut requests: mpsc::Receiver<Envelope>) {
        loop {
            let request = tokio::select! {
                _ = self.handle.evicted() => {
                    tracing::warn!(consumer = %self.handle.id(), "Consumer evicted, closing channel");
                    break;
                }
                request = requests.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            let id = request.id.clone();
            let kind = request.kind;

            let response = match self.handle_request(request).await {
                Ok(payload) => Envelope::success(id, kind, payload),
                Err(e) => {
                    tracing::debug!(consumer = %self.handle.id(), ?kind, error = %e, "Request failed");
                    Envelope::failure(id, kind, e.to_string())
                }
            };

            let delivered = tokio::select! {
                delivered = self.handle.send(response) => delivered,
                _ = self.handle.evicted() => false,
            };
            if !delivered {
                break;
            }
        }

        self.detach().await;
        tracing::debug!(consumer = %self.handle.id(), "Consumer channel closed");
    }

    async fn handle_request(&mut self, request: Envelope) -> Result<Value, GatewayError> {
        let Some(request_id) = request.id.clone() else {
            return Err(GatewayError::MissingRequestId);
        };

        let timeout = self.gateway.config.request_timeout;
        let work = async {
            match request.kind {
                MessageType::Connect => self.connect(&request).await,
                MessageType::Disconnect => self.disconnect(&request).await,
                MessageType::Refresh => {
                    let provider_id = self.target(&request)?;
                    let phase = self.gateway.registry.refresh(&provider_id).await?;
                    Ok(json!({ "providerId": provider_id, "phase": phase }))
                }
                MessageType::GetSnapshot => {
                    let provider_id = self.target(&request)?;
                    let records = self.gateway.registry.snapshot(&provider_id).await?;
                    Ok(json!({
                        "providerId": provider_id,
                        "count": records.len(),
                        "records": records,
                    }))
                }
                MessageType::GetStatistics => {
                    let provider_id = self.target(&request)?;
                    let report = self.gateway.registry.statistics(&provider_id).await?;
                    serde_json::to_value(report)
                        .map_err(|e| GatewayError::InvalidPayload(e.to_string()))
                }
                other => Err(GatewayError::UnsupportedRequest(format!("{:?}", other))),
            }
        };

        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(request_id)),
        }
    }

    async fn connect(&mut self, request: &Envelope) -> Result<Value, GatewayError> {
        let payload = request
            .payload
            .clone()
            .ok_or_else(|| GatewayError::InvalidPayload("connect requires a provider config".into()))?;
        let config: ProviderConfig = serde_json::from_value(payload)
            .map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
        let provider_id = config.provider_id.clone();

        // The current attachment survives a connect that fails
        let session = self
            .gateway
            .registry
            .acquire(config, self.handle.clone())
            .await?;

        if let Some(previous) = self.attached.replace(provider_id.clone()) {
            if previous != provider_id {
                self.gateway.registry.release(&previous, self.handle.id()).await;
            }
        }

        Ok(json!({
            "providerId": provider_id,
            "config": session.config(),
        }))
    }

    async fn disconnect(&mut self, request: &Envelope) -> Result<Value, GatewayError> {
        let provider_id = match request.provider_id() {
            Some(id) => id.to_string(),
            None => match self.attached.clone() {
                Some(id) => id,
                None => return Ok(json!({ "detached": false })),
            },
        };

        let released = self
            .gateway
            .registry
            .release(&provider_id, self.handle.id())
            .await;
        if self.attached.as_deref() == Some(provider_id.as_str()) {
            self.attached = None;
        }

        Ok(json!({
            "providerId": provider_id,
            "detached": released.was_attached(),
            "sessionClosed": released == Release::TornDown,
        }))
    }

    /// Provider a request is about: explicit `providerId` or the attached one
    fn target(&self, request: &Envelope) -> Result<String, GatewayError> {
        request
            .provider_id()
            .map(str::to_string)
            .or_else(|| self.attached.clone())
            .ok_or(GatewayError::NotConnected)
    }

    async fn detach(&mut self) {
        if let Some(provider_id) = self.attached.take() {
            self.gateway
                .registry
                .release(&provider_id, self.handle.id())
                .await;
        }
    }
}
