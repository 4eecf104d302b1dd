//! Registry error types
//!
//! Error types for session registry operations.

use crate::feed::ConfigError;
use crate::transport::TransportError;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No session for this provider id
    SessionNotFound(String),
    /// Session task has stopped
    SessionClosed(String),
    /// Provider config failed validation
    InvalidConfig(ConfigError),
    /// Transport could not be created
    TransportInit(TransportError),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::SessionNotFound(id) => write!(f, "Unknown provider: {}", id),
            RegistryError::SessionClosed(id) => write!(f, "Session closed: {}", id),
            RegistryError::InvalidConfig(e) => write!(f, "Invalid provider config: {}", e),
            RegistryError::TransportInit(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<ConfigError> for RegistryError {
    fn from(e: ConfigError) -> Self {
        RegistryError::InvalidConfig(e)
    }
}
