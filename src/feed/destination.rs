//! Destination naming shared with the remote data producer
//!
//! These strings are a protocol contract and must match the producer exactly.

use super::config::ProviderConfig;

/// Destination the trigger request is published to:
/// `/snapshot/{dataType}/{clientId}/{rate}[/{batchSize}]`
pub fn trigger_destination(config: &ProviderConfig) -> String {
    let mut dest = format!(
        "/snapshot/{}/{}/{}",
        config.data_type, config.provider_id, config.message_rate
    );
    if let Some(batch) = config.batch_size {
        dest.push('/');
        dest.push_str(&batch.to_string());
    }
    dest
}

/// Topic the session listens on: `/snapshot/{dataType}/{clientId}`
pub fn listener_topic(config: &ProviderConfig) -> String {
    format!("/snapshot/{}/{}", config.data_type, config.provider_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_without_batch() {
        let config = ProviderConfig::new("client-1", "ws://h/ws", "positions").message_rate(500);
        assert_eq!(trigger_destination(&config), "/snapshot/positions/client-1/500");
    }

    #[test]
    fn test_trigger_with_batch() {
        let config = ProviderConfig::new("client-1", "ws://h/ws", "trades")
            .message_rate(100)
            .batch_size(25);
        assert_eq!(trigger_destination(&config), "/snapshot/trades/client-1/100/25");
    }

    #[test]
    fn test_listener_topic() {
        let config = ProviderConfig::new("client-1", "ws://h/ws", "trades").batch_size(25);
        assert_eq!(listener_topic(&config), "/snapshot/trades/client-1");
    }
}
