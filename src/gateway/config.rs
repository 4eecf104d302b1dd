//! Gateway configuration

use std::time::Duration;

/// Consumer gateway options
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long a request may wait for its response
    pub request_timeout: Duration,

    /// Capacity of each consumer's inbound request queue
    pub request_queue: usize,

    /// Capacity of each consumer's outbound queue. A consumer that lets it
    /// fill up is disconnected.
    pub outbound_queue: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            request_queue: 64,
            outbound_queue: 1024,
        }
    }
}

impl GatewayConfig {
    /// Set the request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the inbound request queue capacity (minimum 1)
    pub fn request_queue(mut self, capacity: usize) -> Self {
        self.request_queue = capacity.max(1);
        self
    }

    /// Set the outbound queue capacity (minimum 1)
    pub fn outbound_queue(mut self, capacity: usize) -> Self {
        self.outbound_queue = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.request_queue, 64);
        assert_eq!(config.outbound_queue, 1024);
    }

    #[test]
    fn test_queue_floor() {
        let config = GatewayConfig::default().request_queue(0).outbound_queue(0);
        assert_eq!(config.request_queue, 1);
        assert_eq!(config.outbound_queue, 1);
    }
}
