//! Session entry types
//!
//! Per-provider bookkeeping stored in the registry: the session handle and
//! the set of consumers holding a reference to it.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::gateway::ConsumerId;
use crate::session::SessionHandle;

/// Entry for a single provider session in the registry
pub(super) struct SessionEntry {
    /// Handle to the session task
    pub handle: SessionHandle,

    /// Attached consumers; the session lives while this is non-empty
    pub consumers: HashSet<ConsumerId>,

    /// Session task
    pub task: JoinHandle<()>,

    /// When the session was created
    pub created_at: Instant,
}

impl SessionEntry {
    pub(super) fn new(handle: SessionHandle, first: ConsumerId, task: JoinHandle<()>) -> Self {
        let mut consumers = HashSet::new();
        consumers.insert(first);

        Self {
            handle,
            consumers,
            task,
            created_at: Instant::now(),
        }
    }

    pub(super) fn info(&self) -> SessionInfo {
        SessionInfo {
            provider_id: self.handle.provider_id().to_string(),
            consumer_count: self.consumers.len(),
            age: self.created_at.elapsed(),
            closed: self.handle.is_closed(),
        }
    }
}

/// Registry-side view of a session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Provider id
    pub provider_id: String,
    /// Number of attached consumers
    pub consumer_count: usize,
    /// Time since the session was created
    pub age: Duration,
    /// Whether the session task has exited
    pub closed: bool,
}
