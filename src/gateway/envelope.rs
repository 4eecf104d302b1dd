//! Consumer-facing message envelopes
//!
//! Every message between a consumer and the broker is a JSON object
//! `{ id, type, payload?, error? }`. Requests and their responses share the
//! caller-chosen `id`; pushed events carry no `id`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::session::SessionPhase;
use crate::stats::SessionStatistics;

/// Envelope `type` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    // Requests
    Connect,
    Disconnect,
    Refresh,
    GetSnapshot,
    GetStatistics,

    // Events
    Connected,
    Disconnected,
    Data,
    SnapshotComplete,
    Error,
    Status,

    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// Whether consumers may send this type as a request
    pub fn is_request(self) -> bool {
        matches!(
            self,
            MessageType::Connect
                | MessageType::Disconnect
                | MessageType::Refresh
                | MessageType::GetSnapshot
                | MessageType::GetStatistics
        )
    }
}

/// Wire envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub kind: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// Request with a correlation id
    pub fn request(id: impl Into<String>, kind: MessageType, payload: Option<Value>) -> Self {
        Self {
            id: Some(id.into()),
            kind,
            payload,
            error: None,
        }
    }

    /// Successful response to request `id`
    pub fn success(id: Option<String>, kind: MessageType, payload: Value) -> Self {
        Self {
            id,
            kind,
            payload: Some(payload),
            error: None,
        }
    }

    /// Error response to request `id`
    pub fn failure(id: Option<String>, kind: MessageType, error: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            payload: None,
            error: Some(error.into()),
        }
    }

    /// Unsolicited event
    pub fn event(kind: MessageType, payload: Value) -> Self {
        Self {
            id: None,
            kind,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn is_event(&self) -> bool {
        self.id.is_none()
    }

    /// `payload.providerId`, when present
    pub fn provider_id(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.get("providerId"))
            .and_then(Value::as_str)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Events a provider session broadcasts to its consumers
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    Connected {
        provider_id: String,
        phase: SessionPhase,
    },
    Disconnected {
        provider_id: String,
        reason: String,
    },
    Data {
        provider_id: String,
        phase: SessionPhase,
        records: Vec<Value>,
    },
    SnapshotComplete {
        provider_id: String,
        row_count: u64,
        duration_ms: u64,
        timed_out: bool,
    },
    Error {
        provider_id: String,
        message: String,
    },
    Status {
        provider_id: String,
        phase: SessionPhase,
        statistics: SessionStatistics,
    },
}

impl BrokerEvent {
    pub fn kind(&self) -> MessageType {
        match self {
            BrokerEvent::Connected { .. } => MessageType::Connected,
            BrokerEvent::Disconnected { .. } => MessageType::Disconnected,
            BrokerEvent::Data { .. } => MessageType::Data,
            BrokerEvent::SnapshotComplete { .. } => MessageType::SnapshotComplete,
            BrokerEvent::Error { .. } => MessageType::Error,
            BrokerEvent::Status { .. } => MessageType::Status,
        }
    }

    pub fn into_envelope(self) -> Envelope {
        let kind = self.kind();
        let payload = match self {
            BrokerEvent::Connected { provider_id, phase } => {
                json!({ "providerId": provider_id, "phase": phase })
            }
            BrokerEvent::Disconnected {
                provider_id,
                reason,
            } => json!({ "providerId": provider_id, "reason": reason }),
            BrokerEvent::Data {
                provider_id,
                phase,
                records,
            } => json!({
                "providerId": provider_id,
                "phase": phase,
                "count": records.len(),
                "records": records,
            }),
            BrokerEvent::SnapshotComplete {
                provider_id,
                row_count,
                duration_ms,
                timed_out,
            } => json!({
                "providerId": provider_id,
                "rowCount": row_count,
                "durationMs": duration_ms,
                "timedOut": timed_out,
            }),
            BrokerEvent::Error {
                provider_id,
                message,
            } => json!({ "providerId": provider_id, "message": message }),
            BrokerEvent::Status {
                provider_id,
                phase,
                statistics,
            } => json!({
                "providerId": provider_id,
                "phase": phase,
                "statistics": statistics,
            }),
        };
        Envelope::event(kind, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip_shape() {
        let raw = r#"{"id":"x1","type":"get-statistics","payload":{"providerId":"p9"}}"#;
        let env = Envelope::from_json(raw).unwrap();

        assert_eq!(env.id.as_deref(), Some("x1"));
        assert_eq!(env.kind, MessageType::GetStatistics);
        assert!(env.kind.is_request());
        assert_eq!(env.provider_id(), Some("p9"));
    }

    #[test]
    fn test_unknown_type_decodes() {
        let env = Envelope::from_json(r#"{"id":"1","type":"subscribe-all"}"#).unwrap();
        assert_eq!(env.kind, MessageType::Unknown);
        assert!(!env.kind.is_request());
    }

    #[test]
    fn test_event_omits_id_and_error() {
        let env = BrokerEvent::SnapshotComplete {
            provider_id: "p1".into(),
            row_count: 2,
            duration_ms: 15,
            timed_out: false,
        }
        .into_envelope();

        let json: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "snapshot-complete");
        assert_eq!(json["payload"]["rowCount"], 2);
        assert!(json.get("id").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_data_event_payload() {
        let env = BrokerEvent::Data {
            provider_id: "p1".into(),
            phase: SessionPhase::Snapshot,
            records: vec![json!({"id": "1"})],
        }
        .into_envelope();

        let payload = env.payload.unwrap();
        assert_eq!(payload["phase"], "snapshot");
        assert_eq!(payload["count"], 1);
        assert_eq!(payload["records"][0]["id"], "1");
    }

    #[test]
    fn test_failure_response() {
        let env = Envelope::failure(Some("x1".into()), MessageType::GetStatistics, "unknown provider");
        let json: Value = serde_json::to_value(&env).unwrap();
        assert_eq!(json["id"], "x1");
        assert_eq!(json["error"], "unknown provider");
        assert!(json.get("payload").is_none());
    }
}
