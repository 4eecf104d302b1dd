//! Registry configuration
//!
//! Settings applied to every provider session the registry creates.

use std::time::Duration;

/// Provider session settings
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How often a `status` event is pushed to consumers
    pub stats_interval: Duration,

    /// Pause between teardown and reconnect on `refresh`
    pub refresh_settle_delay: Duration,

    /// Trailing window for the messages-per-second figure
    pub rate_window: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stats_interval: Duration::from_secs(1),
            refresh_settle_delay: Duration::from_millis(250),
            rate_window: Duration::from_secs(1),
        }
    }
}

impl RegistryConfig {
    /// Set the status push interval
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Set the refresh settle delay
    pub fn refresh_settle_delay(mut self, delay: Duration) -> Self {
        self.refresh_settle_delay = delay;
        self
    }

    /// Set the rate window
    pub fn rate_window(mut self, window: Duration) -> Self {
        self.rate_window = window;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.stats_interval, Duration::from_secs(1));
        assert_eq!(config.refresh_settle_delay, Duration::from_millis(250));
        assert_eq!(config.rate_window, Duration::from_secs(1));
    }

    #[test]
    fn test_builder_chaining() {
        let config = RegistryConfig::default()
            .stats_interval(Duration::from_millis(100))
            .refresh_settle_delay(Duration::from_millis(10))
            .rate_window(Duration::from_secs(5));

        assert_eq!(config.stats_interval, Duration::from_millis(100));
        assert_eq!(config.refresh_settle_delay, Duration::from_millis(10));
        assert_eq!(config.rate_window, Duration::from_secs(5));
    }
}
