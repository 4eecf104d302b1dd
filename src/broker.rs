//! Broker facade
//!
//! Wires a transport factory, the session registry and the consumer gateway
//! together. Embedders usually only touch this type.

use std::sync::Arc;

use crate::gateway::{ConsumerChannel, ConsumerClient, Gateway, GatewayConfig};
use crate::registry::{RegistryConfig, SessionRegistry};
use crate::server::{BrokerServer, ServerConfig};
use crate::transport::TransportFactory;

/// A running broker instance
pub struct Broker {
    registry: Arc<SessionRegistry>,
    gateway: Arc<Gateway>,
}

impl Broker {
    /// Create a broker with default registry and gateway settings
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self::with_config(factory, RegistryConfig::default(), GatewayConfig::default())
    }

    pub fn with_config(
        factory: Arc<dyn TransportFactory>,
        registry_config: RegistryConfig,
        gateway_config: GatewayConfig,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::with_config(factory, registry_config));
        let gateway = Arc::new(Gateway::new(Arc::clone(&registry), gateway_config));

        Self { registry, gateway }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// New in-process consumer with request correlation
    pub fn client(&self) -> ConsumerClient {
        self.gateway.client()
    }

    /// New in-process consumer speaking raw envelopes
    pub fn open_channel(&self) -> ConsumerChannel {
        self.gateway.open()
    }

    /// WebSocket server in front of this broker's gateway
    pub fn server(&self, config: ServerConfig) -> BrokerServer {
        BrokerServer::new(config, Arc::clone(&self.gateway))
    }

    /// Tear down every session and wait for their tasks
    pub async fn shutdown(&self) {
        self.registry.drain().await;
        tracing::info!("Broker shut down");
    }
}
