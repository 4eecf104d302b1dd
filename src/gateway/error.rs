//! Gateway error types

use thiserror::Error;

use crate::registry::RegistryError;

/// Errors answered to a single request; never broadcast
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("not connected to a provider")]
    NotConnected,

    #[error("missing request id")]
    MissingRequestId,

    #[error("unsupported request type: {0}")]
    UnsupportedRequest(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("duplicate request id: {0}")]
    DuplicateRequestId(String),

    #[error("request {0} timed out")]
    Timeout(String),

    #[error("consumer channel closed")]
    ChannelClosed,

    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// Error text carried in a response envelope
    #[error("{0}")]
    Remote(String),
}
