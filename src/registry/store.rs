//! Session registry implementation
//!
//! Maps provider ids to provider sessions. Sessions are created by the first
//! consumer that connects to a provider and torn down as soon as the last
//! consumer is released.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::feed::ProviderConfig;
use crate::gateway::{ConsumerHandle, ConsumerId};
use crate::session::{ProviderSession, SessionHandle, SessionPhase, StatusReport};
use crate::transport::TransportFactory;

use super::config::RegistryConfig;
use super::entry::{SessionEntry, SessionInfo};
use super::error::RegistryError;

/// What a [`SessionRegistry::release`] call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The consumer held no attachment to that provider
    NotAttached,
    /// Detached; other consumers keep the session alive
    Detached,
    /// Detached the last consumer and stopped the session
    TornDown,
}

impl Release {
    pub fn was_attached(self) -> bool {
        self != Release::NotAttached
    }

    pub fn torn_down(self) -> bool {
        self == Release::TornDown
    }
}

/// Central registry for all provider sessions
///
/// Attach/detach bookkeeping happens under the write lock, so concurrent
/// consumers can never lose or double-count an attachment.
pub struct SessionRegistry {
    /// Map of provider id to session entry
    sessions: RwLock<HashMap<String, SessionEntry>>,

    /// Creates one transport per new session
    factory: Arc<dyn TransportFactory>,

    /// Configuration
    config: RegistryConfig,
}

impl SessionRegistry {
    /// Create a new registry with default configuration
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self::with_config(factory, RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(factory: Arc<dyn TransportFactory>, config: RegistryConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            factory,
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Attach a consumer to the session for `config.provider_id`
    ///
    /// If the session exists, the supplied config is ignored: the first
    /// consumer's config stays in force for the life of the session.
    /// Otherwise a session is created and starts connecting.
    pub async fn acquire(
        &self,
        config: ProviderConfig,
        consumer: ConsumerHandle,
    ) -> Result<SessionHandle, RegistryError> {
        config.validate()?;

        let provider_id = config.provider_id.clone();
        let consumer_id = consumer.id();
        let mut sessions = self.sessions.write().await;

        let stale = match sessions.get_mut(&provider_id) {
            Some(entry) if !entry.handle.is_closed() => {
                if *entry.handle.config() != config {
                    tracing::debug!(
                        provider = %provider_id,
                        consumer = %consumer_id,
                        "Config differs from session config, keeping the first one"
                    );
                }

                entry.handle.attach(consumer)?;
                entry.consumers.insert(consumer_id);

                tracing::info!(
                    provider = %provider_id,
                    consumer = %consumer_id,
                    consumers = entry.consumers.len(),
                    "Consumer attached (existing session)"
                );
                return Ok(entry.handle.clone());
            }
            Some(_) => true,
            None => false,
        };

        if stale {
            tracing::warn!(provider = %provider_id, "Replacing stopped session");
            sessions.remove(&provider_id);
        }

        let transport = self.factory.create(&config).map_err(|e| {
            tracing::error!(provider = %provider_id, error = %e, "Transport initialization failed");
            RegistryError::TransportInit(e)
        })?;

        let (handle, task) = ProviderSession::spawn(config, transport, self.config.clone());
        handle.attach(consumer)?;
        sessions.insert(
            provider_id.clone(),
            SessionEntry::new(handle.clone(), consumer_id, task),
        );

        tracing::info!(
            provider = %provider_id,
            consumer = %consumer_id,
            sessions = sessions.len(),
            "Consumer attached (new session)"
        );

        Ok(handle)
    }

    /// Detach a consumer from a provider's session
    ///
    /// Tears the session down when its last consumer leaves. Releasing an
    /// unknown pair is a no-op reported as [`Release::NotAttached`].
    pub async fn release(&self, provider_id: &str, consumer: ConsumerId) -> Release {
        let mut sessions = self.sessions.write().await;

        let Some(entry) = sessions.get_mut(provider_id) else {
            return Release::NotAttached;
        };
        if !entry.consumers.remove(&consumer) {
            return Release::NotAttached;
        }
        entry.handle.detach(consumer);

        tracing::debug!(
            provider = %provider_id,
            consumer = %consumer,
            remaining = entry.consumers.len(),
            "Consumer released"
        );

        if !entry.consumers.is_empty() {
            return Release::Detached;
        }

        if let Some(entry) = sessions.remove(provider_id) {
            entry.handle.shutdown("last consumer released");
            tracing::info!(
                provider = %provider_id,
                sessions = sessions.len(),
                "Session torn down"
            );
        }
        Release::TornDown
    }

    /// Look up a session handle
    pub async fn session(&self, provider_id: &str) -> Result<SessionHandle, RegistryError> {
        self.sessions
            .read()
            .await
            .get(provider_id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| RegistryError::SessionNotFound(provider_id.to_string()))
    }

    /// Copy of a session's cached records
    pub async fn snapshot(&self, provider_id: &str) -> Result<Vec<Value>, RegistryError> {
        self.session(provider_id).await?.snapshot().await
    }

    /// Phase and statistics of a session
    pub async fn statistics(&self, provider_id: &str) -> Result<StatusReport, RegistryError> {
        self.session(provider_id).await?.statistics().await
    }

    /// Force a fresh snapshot cycle
    pub async fn refresh(&self, provider_id: &str) -> Result<SessionPhase, RegistryError> {
        self.session(provider_id).await?.refresh().await
    }

    /// Check if a session exists for the provider
    pub async fn contains(&self, provider_id: &str) -> bool {
        self.sessions.read().await.contains_key(provider_id)
    }

    /// Number of attached consumers, if the session exists
    pub async fn consumer_count(&self, provider_id: &str) -> Option<usize> {
        self.sessions
            .read()
            .await
            .get(provider_id)
            .map(|entry| entry.consumers.len())
    }

    /// Registry-side info for a session
    pub async fn session_info(&self, provider_id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(provider_id).map(SessionEntry::info)
    }

    /// Get total number of sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Tear down every session and wait for the tasks to finish
    pub async fn drain(&self) {
        let entries: Vec<SessionEntry> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, entry)| entry).collect()
        };

        tracing::info!(sessions = entries.len(), "Draining session registry");

        for entry in &entries {
            entry.handle.shutdown("broker shutting down");
        }
        for entry in entries {
            if let Err(e) = entry.task.await {
                tracing::warn!(error = %e, "Session task ended abnormally");
            }
        }
    }
}
