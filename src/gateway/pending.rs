//! Request/response correlation
//!
//! Each outstanding request is a single-fire completion handle plus a
//! deadline, keyed by correlation id. An entry is removed by whichever comes
//! first: the matching response or the deadline. Anything arriving later
//! finds no entry and is dropped.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::error::GatewayError;

/// Outcome delivered to a waiting requester
pub type RequestResult = Result<Value, GatewayError>;

/// One outstanding request
#[derive(Debug)]
pub struct PendingRequest {
    tx: oneshot::Sender<RequestResult>,
    deadline: Instant,
}

/// Receiving side of a registered request
#[derive(Debug)]
pub struct PendingReceiver {
    pub id: String,
    pub deadline: Instant,
    pub rx: oneshot::Receiver<RequestResult>,
}

/// Table of outstanding requests
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request that expires after `timeout`
    pub fn register(&self, id: &str, timeout: Duration) -> Result<PendingReceiver, GatewayError> {
        let mut inner = self.inner.lock();
        if inner.contains_key(id) {
            return Err(GatewayError::DuplicateRequestId(id.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        inner.insert(id.to_string(), PendingRequest { tx, deadline });

        Ok(PendingReceiver {
            id: id.to_string(),
            deadline,
            rx,
        })
    }

    /// Complete request `id`. Returns false if it is not pending.
    pub fn resolve(&self, id: &str, result: RequestResult) -> bool {
        let Some(pending) = self.inner.lock().remove(id) else {
            return false;
        };
        pending.tx.send(result).is_ok()
    }

    /// Drop request `id` without completing it
    pub fn remove(&self, id: &str) -> bool {
        self.inner.lock().remove(id).is_some()
    }

    /// Fail every request whose deadline is at or before `now`
    pub fn expire(&self, now: Instant) -> Vec<String> {
        let expired: Vec<(String, PendingRequest)> = {
            let mut inner = self.inner.lock();
            let ids: Vec<String> = inner
                .iter()
                .filter(|(_, p)| p.deadline <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| inner.remove(&id).map(|p| (id, p)))
                .collect()
        };

        expired
            .into_iter()
            .map(|(id, pending)| {
                let _ = pending.tx.send(Err(GatewayError::Timeout(id.clone())));
                id
            })
            .collect()
    }

    /// Fail every outstanding request with `error`
    pub fn fail_all(&self, error: GatewayError) -> usize {
        let drained: Vec<PendingRequest> = self.inner.lock().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for pending in drained {
            let _ = pending.tx.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_resolve_once() {
        let pending = PendingRequests::new();
        let receiver = pending.register("r1", Duration::from_secs(10)).unwrap();

        assert!(pending.resolve("r1", Ok(json!({"ok": true}))));
        assert!(!pending.resolve("r1", Ok(json!({"ok": false}))));
        assert!(pending.is_empty());

        assert_eq!(receiver.rx.await.unwrap().unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let pending = PendingRequests::new();
        let _r = pending.register("r1", Duration::from_secs(10)).unwrap();

        assert_eq!(
            pending.register("r1", Duration::from_secs(10)).unwrap_err(),
            GatewayError::DuplicateRequestId("r1".into())
        );
    }

    #[tokio::test]
    async fn test_expire_past_deadline() {
        let pending = PendingRequests::new();
        let short = pending.register("short", Duration::from_millis(0)).unwrap();
        let _long = pending.register("long", Duration::from_secs(60)).unwrap();

        let expired = pending.expire(Instant::now());
        assert_eq!(expired, vec!["short".to_string()]);
        assert!(pending.contains("long"));
        assert_eq!(
            short.rx.await.unwrap(),
            Err(GatewayError::Timeout("short".into()))
        );

        // Late response is ignored
        assert!(!pending.resolve("short", Ok(Value::Null)));
    }

    #[tokio::test]
    async fn test_fail_all() {
        let pending = PendingRequests::new();
        let a = pending.register("a", Duration::from_secs(10)).unwrap();
        let b = pending.register("b", Duration::from_secs(10)).unwrap();

        assert_eq!(pending.fail_all(GatewayError::ChannelClosed), 2);
        assert_eq!(a.rx.await.unwrap(), Err(GatewayError::ChannelClosed));
        assert_eq!(b.rx.await.unwrap(), Err(GatewayError::ChannelClosed));
    }
}
