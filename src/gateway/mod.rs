//! Consumer gateway
//!
//! Consumers talk to the broker through JSON envelopes over a channel pair.
//! The gateway owns one request loop per consumer: it parses requests,
//! resolves them against the session registry and answers each with a
//! response echoing the request id. Session events are pushed on the same
//! outbound channel without an id.
//!
//! ```text
//!   ConsumerClient ── requests ──► ConsumerSession ──► SessionRegistry
//!         ▲                              │                  │
//!         └──── responses + events ◄─────┴──── ProviderSession broadcasts
//! ```

pub mod client;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod handle;
pub mod pending;

pub use client::ConsumerClient;
pub use config::GatewayConfig;
pub use consumer::{ConsumerChannel, Gateway};
pub use envelope::{BrokerEvent, Envelope, MessageType};
pub use error::GatewayError;
pub use handle::{ConsumerHandle, ConsumerId, Delivery};
pub use pending::{PendingReceiver, PendingRequests, RequestResult};
