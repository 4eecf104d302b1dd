//! Error types
//!
//! Crate-wide error enum. Component errors (registry, gateway, transport,
//! config) convert into it with `?`.

use thiserror::Error;

use crate::feed::ConfigError;
use crate::gateway::GatewayError;
use crate::registry::RegistryError;
use crate::transport::TransportError;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level broker error
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid provider config: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
