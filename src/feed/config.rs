//! Provider configuration
//!
//! A `ProviderConfig` is supplied by the first consumer that connects to a
//! provider and stays fixed for the life of the session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default end-of-snapshot sentinel token
pub const DEFAULT_END_TOKEN: &str = "Success";

/// Default key field used to index snapshot records
pub const DEFAULT_KEY_FIELD: &str = "id";

/// Default requested message rate (messages per second)
pub const DEFAULT_MESSAGE_RATE: u32 = 1000;

/// Default snapshot timeout in milliseconds
pub const DEFAULT_SNAPSHOT_TIMEOUT_MS: u64 = 60_000;

/// Reasons a provider configuration is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("message rate must be greater than zero")]
    ZeroRate,

    #[error("batch size must be greater than zero when set")]
    ZeroBatchSize,
}

/// Configuration for one provider (logical data feed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Feed / client identifier, also used in destination names
    pub provider_id: String,

    /// WebSocket URL of the STOMP endpoint
    pub websocket_url: String,

    /// Logical data type requested from the producer (e.g. "positions")
    pub data_type: String,

    /// Requested message rate
    #[serde(default = "default_message_rate")]
    pub message_rate: u32,

    /// Optional batch size appended to the trigger destination
    #[serde(default)]
    pub batch_size: Option<u32>,

    /// End-of-snapshot sentinel token
    #[serde(default = "default_end_token")]
    pub end_token: String,

    /// Scalar field identifying a record
    #[serde(default = "default_key_field")]
    pub key_field: String,

    /// How long the snapshot phase may last before it is closed forcibly
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,
}

fn default_message_rate() -> u32 {
    DEFAULT_MESSAGE_RATE
}

fn default_end_token() -> String {
    DEFAULT_END_TOKEN.to_string()
}

fn default_key_field() -> String {
    DEFAULT_KEY_FIELD.to_string()
}

fn default_snapshot_timeout_ms() -> u64 {
    DEFAULT_SNAPSHOT_TIMEOUT_MS
}

impl ProviderConfig {
    /// Create a config with default rate, token, key field and timeout
    pub fn new(
        provider_id: impl Into<String>,
        websocket_url: impl Into<String>,
        data_type: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            websocket_url: websocket_url.into(),
            data_type: data_type.into(),
            message_rate: DEFAULT_MESSAGE_RATE,
            batch_size: None,
            end_token: default_end_token(),
            key_field: default_key_field(),
            snapshot_timeout_ms: DEFAULT_SNAPSHOT_TIMEOUT_MS,
        }
    }

    /// Set the requested message rate
    pub fn message_rate(mut self, rate: u32) -> Self {
        self.message_rate = rate;
        self
    }

    /// Set the batch size
    pub fn batch_size(mut self, size: u32) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set the end-of-snapshot token
    pub fn end_token(mut self, token: impl Into<String>) -> Self {
        self.end_token = token.into();
        self
    }

    /// Set the key field
    pub fn key_field(mut self, field: impl Into<String>) -> Self {
        self.key_field = field.into();
        self
    }

    /// Set the snapshot timeout
    pub fn snapshot_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Snapshot timeout as a `Duration`
    pub fn snapshot_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    /// Check the invariants a session relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider_id.trim().is_empty() {
            return Err(ConfigError::Empty("providerId"));
        }
        if self.websocket_url.trim().is_empty() {
            return Err(ConfigError::Empty("websocketUrl"));
        }
        if self.data_type.trim().is_empty() {
            return Err(ConfigError::Empty("dataType"));
        }
        if self.key_field.is_empty() {
            return Err(ConfigError::Empty("keyField"));
        }
        if self.end_token.trim().is_empty() {
            return Err(ConfigError::Empty("endToken"));
        }
        if self.message_rate == 0 {
            return Err(ConfigError::ZeroRate);
        }
        if self.batch_size == Some(0) {
            return Err(ConfigError::ZeroBatchSize);
        }
        Ok(())
    }
}
