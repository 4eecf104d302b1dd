//! # stomp-broker
//!
//! A broker that lets many consumers share one STOMP-over-WebSocket
//! connection per logical data feed ("provider").
//!
//! For each provider the broker opens a single upstream connection, asks the
//! producer for a full snapshot by publishing to a trigger destination, and
//! keeps a keyed cache of the records it receives. A sentinel frame (or a
//! timeout) ends the snapshot phase; from then on frames are real-time
//! updates. Every frame is fanned out to all attached consumers, and late
//! joiners read the cache instead of forcing a resubscribe.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use stomp_broker::transport::WsTransportFactory;
//! use stomp_broker::{Broker, ProviderConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Broker::new(Arc::new(WsTransportFactory::default()));
//!     let mut client = broker.client();
//!
//!     client
//!         .connect(&ProviderConfig::new("desk-1", "ws://feeds/ws", "positions"))
//!         .await?;
//!
//!     while let Some(event) = client.next_event().await {
//!         println!("{:?}", event.kind);
//!     }
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod transport;

pub use broker::Broker;
pub use error::{Error, Result};
pub use feed::ProviderConfig;
pub use gateway::{BrokerEvent, ConsumerClient, Envelope, Gateway, GatewayConfig, MessageType};
pub use registry::{RegistryConfig, SessionRegistry};
pub use server::{BrokerServer, ServerConfig};
pub use session::SessionPhase;
pub use stats::SessionStatistics;
