//! Session registry
//!
//! The registry owns every provider session and reference-counts them by
//! attached consumers. One session (and one transport connection) serves all
//! consumers of a provider id.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<SessionRegistry>
//!                  ┌───────────────────────────────┐
//!                  │ sessions: HashMap<ProviderId, │
//!                  │   SessionEntry {              │
//!                  │     handle: SessionHandle,    │
//!                  │     consumers: {ConsumerId},  │
//!                  │   }                           │
//!                  │ >                             │
//!                  └───────────────┬───────────────┘
//!                                  │ commands
//!                                  ▼
//!                      [ProviderSession task]
//!                  transport ─► classify ─► cache
//!                                  │ broadcast
//!         ┌────────────────────────┼────────────────────────┐
//!         ▼                        ▼                        ▼
//!   [Consumer 1]             [Consumer 2]             [Consumer 3]
//! ```
//!
//! Consumers never see the cache itself: `get-snapshot` returns a copy and
//! pushed events carry owned payloads.

pub mod config;
pub mod entry;
pub mod error;
pub mod store;

pub use config::RegistryConfig;
pub use entry::SessionInfo;
pub use error::RegistryError;
pub use store::{Release, SessionRegistry};
