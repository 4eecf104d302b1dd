//! Correlating consumer client
//!
//! Wraps the two ends of a consumer channel. Requests get a generated id and
//! wait on a pending entry; a router task matches responses back to those
//! entries and passes pushed events through to [`ConsumerClient::next_event`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::feed::ProviderConfig;

use super::consumer::ConsumerChannel;
use super::envelope::{Envelope, MessageType};
use super::error::GatewayError;
use super::handle::ConsumerId;
use super::pending::{PendingRequests, RequestResult};

/// Consumer-side request/response client
pub struct ConsumerClient {
    id: Option<ConsumerId>,
    requests: mpsc::Sender<Envelope>,
    events: mpsc::UnboundedReceiver<Envelope>,
    pending: Arc<PendingRequests>,
    timeout: Duration,
    next_request: AtomicU64,
    router: JoinHandle<()>,
}

impl ConsumerClient {
    pub fn new(channel: ConsumerChannel, timeout: Duration) -> Self {
        let mut client = Self::from_parts(channel.requests, channel.inbound, timeout);
        client.id = Some(channel.id);
        client
    }

    /// Build a client over arbitrary channel ends
    pub fn from_parts(
        requests: mpsc::Sender<Envelope>,
        inbound: mpsc::Receiver<Envelope>,
        timeout: Duration,
    ) -> Self {
        let pending = Arc::new(PendingRequests::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let router = tokio::spawn(route(inbound, Arc::clone(&pending), events_tx));

        Self {
            id: None,
            requests,
            events: events_rx,
            pending,
            timeout,
            next_request: AtomicU64::new(1),
            router,
        }
    }

    /// Gateway-assigned id, when opened through a gateway
    pub fn id(&self) -> Option<ConsumerId> {
        self.id
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Send a request with a generated id and wait for its response
    pub async fn request(
        &self,
        kind: MessageType,
        payload: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let id = format!("req-{}", self.next_request.fetch_add(1, Ordering::Relaxed));
        self.request_with_id(&id, kind, payload).await
    }

    /// Send a request with a caller-chosen id and wait for its response
    pub async fn request_with_id(
        &self,
        id: &str,
        kind: MessageType,
        payload: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let receiver = self.pending.register(id, self.timeout)?;

        if self
            .requests
            .send(Envelope::request(id, kind, payload))
            .await
            .is_err()
        {
            self.pending.remove(id);
            return Err(GatewayError::ChannelClosed);
        }

        match tokio::time::timeout_at(receiver.deadline, receiver.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GatewayError::ChannelClosed),
            Err(_) => {
                self.pending.remove(id);
                tracing::debug!(request = %id, ?kind, "Request timed out");
                Err(GatewayError::Timeout(id.to_string()))
            }
        }
    }

    pub async fn connect(&self, config: &ProviderConfig) -> Result<Value, GatewayError> {
        let payload =
            serde_json::to_value(config).map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
        self.request(MessageType::Connect, Some(payload)).await
    }

    pub async fn disconnect(&self) -> Result<Value, GatewayError> {
        self.request(MessageType::Disconnect, None).await
    }

    pub async fn refresh(&self) -> Result<Value, GatewayError> {
        self.request(MessageType::Refresh, None).await
    }

    pub async fn snapshot(&self) -> Result<Value, GatewayError> {
        self.request(MessageType::GetSnapshot, None).await
    }

    pub async fn statistics(&self) -> Result<Value, GatewayError> {
        self.request(MessageType::GetStatistics, None).await
    }

    /// Statistics for a named provider, attached or not
    pub async fn statistics_for(&self, provider_id: &str) -> Result<Value, GatewayError> {
        self.request(
            MessageType::GetStatistics,
            Some(json!({ "providerId": provider_id })),
        )
        .await
    }

    /// Next pushed event; `None` once the gateway side is gone
    pub async fn next_event(&mut self) -> Option<Envelope> {
        self.events.recv().await
    }

    /// Next pushed event of one type, skipping others
    pub async fn next_event_of(&mut self, kind: MessageType) -> Option<Envelope> {
        while let Some(event) = self.events.recv().await {
            if event.kind == kind {
                return Some(event);
            }
        }
        None
    }

    pub fn try_next_event(&mut self) -> Option<Envelope> {
        self.events.try_recv().ok()
    }
}

impl Drop for ConsumerClient {
    fn drop(&mut self) {
        self.router.abort();
    }
}

async fn route(
    mut inbound: mpsc::Receiver<Envelope>,
    pending: Arc<PendingRequests>,
    events: mpsc::UnboundedSender<Envelope>,
) {
    while let Some(envelope) = inbound.recv().await {
        let Some(id) = envelope.id.clone() else {
            let _ = events.send(envelope);
            continue;
        };

        let result: RequestResult = match envelope.error {
            Some(error) => Err(GatewayError::Remote(error)),
            None => Ok(envelope.payload.unwrap_or(Value::Null)),
        };

        if !pending.resolve(&id, result) {
            tracing::debug!(request = %id, "Dropping response with no pending request");
        }
    }

    pending.fail_all(GatewayError::ChannelClosed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_response_resolves_request() {
        let (req_tx, mut req_rx) = mpsc::channel(8);
        let (in_tx, in_rx) = mpsc::channel(8);
        let client = ConsumerClient::from_parts(req_tx, in_rx, Duration::from_secs(5));

        tokio::spawn(async move {
            let request = req_rx.recv().await.unwrap();
            in_tx
                .send(Envelope::success(request.id, request.kind, json!({"ok": 1})))
                .await
                .unwrap();
        });

        let value = client.request(MessageType::Refresh, None).await.unwrap();
        assert_eq!(value["ok"], 1);
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn test_error_response() {
        let (req_tx, mut req_rx) = mpsc::channel(8);
        let (in_tx, in_rx) = mpsc::channel(8);
        let client = ConsumerClient::from_parts(req_tx, in_rx, Duration::from_secs(5));

        tokio::spawn(async move {
            let request = req_rx.recv().await.unwrap();
            in_tx
                .send(Envelope::failure(request.id, request.kind, "boom"))
                .await
                .unwrap();
        });

        assert_eq!(
            client.request_with_id("x", MessageType::Refresh, None).await,
            Err(GatewayError::Remote("boom".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_response_dropped() {
        let (req_tx, mut req_rx) = mpsc::channel(8);
        let (in_tx, in_rx) = mpsc::channel(8);
        let mut client = ConsumerClient::from_parts(req_tx, in_rx, Duration::from_millis(100));

        let result = client
            .request_with_id("slow", MessageType::GetSnapshot, None)
            .await;
        assert_eq!(result, Err(GatewayError::Timeout("slow".into())));
        assert_eq!(client.pending(), 0);

        let request = req_rx.recv().await.unwrap();
        in_tx
            .send(Envelope::success(request.id, request.kind, json!({})))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(client.try_next_event().is_none());
    }

    #[tokio::test]
    async fn test_events_pass_through() {
        let (req_tx, _req_rx) = mpsc::channel(8);
        let (in_tx, in_rx) = mpsc::channel(8);
        let mut client = ConsumerClient::from_parts(req_tx, in_rx, Duration::from_secs(5));

        in_tx
            .send(Envelope::event(MessageType::Status, json!({"providerId": "p1"})))
            .await
            .unwrap();

        let event = client.next_event().await.unwrap();
        assert_eq!(event.kind, MessageType::Status);
    }

    #[tokio::test]
    async fn test_closed_channel_fails_pending() {
        let (req_tx, mut req_rx) = mpsc::channel(8);
        let (in_tx, in_rx) = mpsc::channel(8);
        let client = ConsumerClient::from_parts(req_tx, in_rx, Duration::from_secs(5));

        tokio::spawn(async move {
            let _request = req_rx.recv().await;
            drop(in_tx);
        });

        assert_eq!(
            client.request(MessageType::Refresh, None).await,
            Err(GatewayError::ChannelClosed)
        );
    }
}
