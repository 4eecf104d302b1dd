//! Inbound frame classification
//!
//! Every frame body received on the listener topic is classified on its own,
//! in arrival order. While a snapshot is running the sentinel check comes
//! before JSON parsing, so a snapshot record whose text contains the token
//! (or the word "success") ends the snapshot. Realtime frames only go
//! through [`parse_records`].

use serde_json::Value;

use super::config::ProviderConfig;

/// Sentinel accepted regardless of the configured token
pub const FALLBACK_END_TOKEN: &str = "success";

/// Result of classifying one frame
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// End-of-snapshot sentinel
    EndOfSnapshot,
    /// One or more JSON records
    Records(Vec<Value>),
    /// Not JSON and not a sentinel; dropped
    Ignored,
}

impl Classified {
    /// Number of records carried (0 for non-data frames)
    pub fn record_count(&self) -> usize {
        match self {
            Classified::Records(records) => records.len(),
            _ => 0,
        }
    }
}

/// Classify a frame body received during the snapshot phase
pub fn classify(config: &ProviderConfig, body: &str) -> Classified {
    if is_end_of_snapshot(&config.end_token, body) {
        return Classified::EndOfSnapshot;
    }
    parse_records(body)
}

/// Parse a frame body as records without looking for the sentinel
pub fn parse_records(body: &str) -> Classified {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => Classified::Records(items),
        Ok(value) => Classified::Records(vec![value]),
        Err(_) => Classified::Ignored,
    }
}

/// Case-insensitive containment test against the token and the fallback
pub fn is_end_of_snapshot(end_token: &str, body: &str) -> bool {
    let folded = body.trim().to_lowercase();
    let token = end_token.trim().to_lowercase();

    (!token.is_empty() && folded.contains(&token)) || folded.contains(FALLBACK_END_TOKEN)
}
