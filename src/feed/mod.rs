//! Feed-level building blocks
//!
//! Pure, I/O-free pieces a provider session is built from: its configuration,
//! the destination naming contract with the producer, the frame classifier
//! and the keyed snapshot cache.

pub mod cache;
pub mod classify;
pub mod config;
pub mod destination;

pub use cache::{record_key, SnapshotCache};
pub use classify::{classify, is_end_of_snapshot, parse_records, Classified, FALLBACK_END_TOKEN};
pub use config::{ConfigError, ProviderConfig};
pub use destination::{listener_topic, trigger_destination};
