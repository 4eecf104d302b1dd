//! Provider session
//!
//! One task per provider id. The task owns the transport, the snapshot cache,
//! the counters and the set of attached consumers, and processes everything
//! (consumer commands, transport events, timers) strictly one at a time, so
//! none of that state needs a lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::feed::{
    classify, listener_topic, parse_records, trigger_destination, Classified, ProviderConfig,
    SnapshotCache,
};
use crate::gateway::{BrokerEvent, ConsumerHandle, ConsumerId, Delivery, Envelope};
use crate::registry::{RegistryConfig, RegistryError};
use crate::stats::{SessionCounters, SessionStatistics};
use crate::transport::{StompTransport, SubscriptionId, TransportEvent};

use super::state::{PhaseInput, PhaseMachine, SessionPhase};

/// Phase and statistics of a session at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub provider_id: String,
    pub phase: SessionPhase,
    pub consumers: usize,
    pub statistics: SessionStatistics,
}

/// Commands accepted by the session task
enum SessionCommand {
    Attach(ConsumerHandle),
    Detach(ConsumerId),
    Refresh {
        reply: oneshot::Sender<SessionPhase>,
    },
    GetSnapshot {
        reply: oneshot::Sender<Vec<Value>>,
    },
    GetStatistics {
        reply: oneshot::Sender<StatusReport>,
    },
    Shutdown {
        reason: String,
    },
}

/// Cloneable handle to a running provider session
#[derive(Clone)]
pub struct SessionHandle {
    provider_id: String,
    config: Arc<ProviderConfig>,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Configuration the session was created with
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Whether the session task has exited
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub(crate) fn attach(&self, consumer: ConsumerHandle) -> Result<(), RegistryError> {
        self.send(SessionCommand::Attach(consumer))
    }

    pub(crate) fn detach(&self, consumer: ConsumerId) {
        let _ = self.send(SessionCommand::Detach(consumer));
    }

    pub(crate) fn shutdown(&self, reason: impl Into<String>) {
        let _ = self.send(SessionCommand::Shutdown {
            reason: reason.into(),
        });
    }

    /// Tear down the connection and start a fresh snapshot cycle
    pub async fn refresh(&self) -> Result<SessionPhase, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Refresh { reply })?;
        rx.await.map_err(|_| self.closed())
    }

    /// Copy of the cached records
    pub async fn snapshot(&self) -> Result<Vec<Value>, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::GetSnapshot { reply })?;
        rx.await.map_err(|_| self.closed())
    }

    /// Current phase and statistics
    pub async fn statistics(&self) -> Result<StatusReport, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::GetStatistics { reply })?;
        rx.await.map_err(|_| self.closed())
    }

    fn send(&self, command: SessionCommand) -> Result<(), RegistryError> {
        self.commands.send(command).map_err(|_| self.closed())
    }

    fn closed(&self) -> RegistryError {
        RegistryError::SessionClosed(self.provider_id.clone())
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("provider_id", &self.provider_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// State owned by the session task
pub struct ProviderSession {
    config: Arc<ProviderConfig>,
    settings: RegistryConfig,
    transport: Box<dyn StompTransport>,
    phases: PhaseMachine,
    cache: SnapshotCache,
    counters: SessionCounters,
    consumers: HashMap<ConsumerId, ConsumerHandle>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    subscription: Option<SubscriptionId>,
    snapshot_started: Option<Instant>,
    snapshot_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
}

impl ProviderSession {
    /// Spawn the session task and begin connecting
    pub fn spawn(
        config: ProviderConfig,
        transport: Box<dyn StompTransport>,
        settings: RegistryConfig,
    ) -> (SessionHandle, JoinHandle<()>) {
        let config = Arc::new(config);
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = SessionHandle {
            provider_id: config.provider_id.clone(),
            config: Arc::clone(&config),
            commands: tx,
        };

        let session = Self {
            cache: SnapshotCache::new(config.key_field.clone()),
            counters: SessionCounters::new(settings.rate_window),
            config,
            settings,
            transport,
            phases: PhaseMachine::new(),
            consumers: HashMap::new(),
            events: None,
            subscription: None,
            snapshot_started: None,
            snapshot_deadline: None,
            reconnect_at: None,
        };

        let task = tokio::spawn(session.run(rx));
        (handle, task)
    }

    fn provider_id(&self) -> &str {
        &self.config.provider_id
    }

    fn phase(&self) -> SessionPhase {
        self.phases.phase()
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        tracing::info!(
            provider = %self.provider_id(),
            url = %self.config.websocket_url,
            data_type = %self.config.data_type,
            "Provider session started"
        );

        self.connect();

        let mut stats_ticker = tokio::time::interval(self.settings.stats_interval);
        stats_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown { reason }) => break reason,
                    Some(command) => self.handle_command(command),
                    None => break "all handles dropped".to_string(),
                },
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => self.events = None,
                },
                _ = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.connect();
                }
                _ = sleep_until(self.snapshot_deadline) => {
                    self.snapshot_deadline = None;
                    self.on_snapshot_timeout();
                }
                _ = stats_ticker.tick() => self.push_status(),
            }
        };

        self.teardown(&reason);
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Attach(consumer) => self.attach(consumer),
            SessionCommand::Detach(id) => {
                if self.consumers.remove(&id).is_some() {
                    tracing::debug!(
                        provider = %self.provider_id(),
                        consumer = %id,
                        remaining = self.consumers.len(),
                        "Consumer detached"
                    );
                }
            }
            SessionCommand::Refresh { reply } => {
                self.refresh();
                let _ = reply.send(self.phase());
            }
            SessionCommand::GetSnapshot { reply } => {
                let _ = reply.send(self.cache.values());
            }
            SessionCommand::GetStatistics { reply } => {
                let _ = reply.send(self.status_report());
            }
            SessionCommand::Shutdown { .. } => {}
        }
    }

    /// Attach a consumer and tell it where the session stands
    fn attach(&mut self, consumer: ConsumerHandle) {
        let id = consumer.id();
        let phase = self.phase();

        let mut report = vec![self.status_event()];
        if phase.is_connected() {
            report.push(BrokerEvent::Connected {
                provider_id: self.provider_id().to_string(),
                phase,
            });
        }
        if phase == SessionPhase::Realtime {
            report.push(BrokerEvent::SnapshotComplete {
                provider_id: self.provider_id().to_string(),
                row_count: self.counters.cycle_snapshot_rows,
                duration_ms: self
                    .counters
                    .last_snapshot_duration
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
                timed_out: false,
            });
        }

        for event in report {
            match consumer.deliver(event.into_envelope()) {
                Delivery::Delivered => {}
                Delivery::Lagging => {
                    tracing::warn!(provider = %self.provider_id(), consumer = %id, "Consumer queue full on attach, evicting");
                    consumer.evict();
                    return;
                }
                Delivery::Closed => {
                    tracing::debug!(provider = %self.provider_id(), consumer = %id, "Consumer gone before attach");
                    return;
                }
            }
        }

        self.consumers.insert(id, consumer);
        tracing::info!(
            provider = %self.provider_id(),
            consumer = %id,
            consumers = self.consumers.len(),
            phase = %phase,
            "Consumer attached"
        );

        // A consumer arriving after a failure retries the connection
        if !phase.is_live() && self.reconnect_at.is_none() {
            self.connect();
        }
    }

    /// Activate the transport. No-op while connecting or connected.
    fn connect(&mut self) {
        let was_activated = self.events.is_some();
        if self.phases.apply(PhaseInput::Connect).is_none() {
            tracing::debug!(provider = %self.provider_id(), phase = %self.phase(), "Connect ignored");
            return;
        }

        if was_activated {
            self.transport.deactivate();
        }

        // Fresh channel per activation so stale events are never classified
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(rx);
        self.subscription = None;

        tracing::info!(provider = %self.provider_id(), url = %self.config.websocket_url, "Connecting");
        self.push_status();
        self.transport.activate(tx);
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_transport_connected(),
            TransportEvent::Message { subscription, body } => {
                if self.subscription != Some(subscription) {
                    tracing::trace!(provider = %self.provider_id(), %subscription, "Frame for stale subscription");
                    return;
                }
                self.on_frame(&body);
            }
            TransportEvent::Error(reason) => {
                tracing::warn!(provider = %self.provider_id(), reason = %reason, "Transport error");
                self.broadcast(BrokerEvent::Error {
                    provider_id: self.provider_id().to_string(),
                    message: reason.clone(),
                });
                self.enter_disconnected(&reason);
            }
            TransportEvent::Closed {
                reason,
                reconnecting,
            } => {
                if reconnecting {
                    tracing::info!(provider = %self.provider_id(), reason = %reason, "Transport closed, reconnecting");
                } else {
                    tracing::warn!(provider = %self.provider_id(), reason = %reason, "Transport closed, gave up");
                    self.broadcast(BrokerEvent::Error {
                        provider_id: self.provider_id().to_string(),
                        message: format!("connection closed: {}", reason),
                    });
                }
                self.enter_disconnected(&reason);
            }
        }
    }

    /// Start a snapshot cycle: clear, subscribe, trigger
    fn on_transport_connected(&mut self) {
        match self.phase() {
            SessionPhase::Connecting => {}
            SessionPhase::Idle | SessionPhase::Disconnected => {
                // Transport reconnected by itself
                self.phases.apply(PhaseInput::Connect);
                self.push_status();
            }
            SessionPhase::Snapshot | SessionPhase::Realtime => {
                self.enter_disconnected("transport reconnected");
                self.phases.apply(PhaseInput::Connect);
                self.push_status();
            }
        }

        self.phases.apply(PhaseInput::TransportConnected);
        self.cache.clear();
        self.counters.start_cycle();
        self.counters.connects += 1;

        let now = Instant::now();
        self.snapshot_started = Some(now);
        self.snapshot_deadline = Some(now + self.config.snapshot_timeout_duration());

        if let Some(old) = self.subscription.take() {
            let _ = self.transport.unsubscribe(old);
        }

        let topic = listener_topic(&self.config);
        match self.transport.subscribe(&topic) {
            Ok(id) => self.subscription = Some(id),
            Err(e) => {
                self.fail_cycle(format!("subscribe to {} failed: {}", topic, e));
                return;
            }
        }

        let trigger = trigger_destination(&self.config);
        if let Err(e) = self.transport.publish(&trigger, "") {
            self.fail_cycle(format!("trigger {} failed: {}", trigger, e));
            return;
        }

        tracing::info!(
            provider = %self.provider_id(),
            topic = %topic,
            trigger = %trigger,
            "Connected, snapshot requested"
        );

        self.broadcast(BrokerEvent::Connected {
            provider_id: self.provider_id().to_string(),
            phase: SessionPhase::Snapshot,
        });
        self.push_status();
    }

    fn on_frame(&mut self, body: &[u8]) {
        self.counters.on_message(body.len(), Instant::now().into_std());

        let Ok(text) = std::str::from_utf8(body) else {
            tracing::debug!(provider = %self.provider_id(), "Dropping non-UTF-8 frame");
            return;
        };

        let phase = self.phase();
        let classified = if phase == SessionPhase::Snapshot {
            classify(&self.config, text)
        } else {
            parse_records(text)
        };
        match (phase, classified) {
            (SessionPhase::Snapshot, Classified::EndOfSnapshot) => self.complete_snapshot(false),
            (SessionPhase::Snapshot | SessionPhase::Realtime, Classified::Records(records)) => {
                let applied = self.cache.apply_batch(records);
                if applied.is_empty() {
                    return;
                }
                if phase == SessionPhase::Snapshot {
                    self.counters.on_snapshot_rows(applied.len());
                } else {
                    self.counters.on_realtime_rows(applied.len());
                }
                self.broadcast(BrokerEvent::Data {
                    provider_id: self.provider_id().to_string(),
                    phase,
                    records: applied,
                });
            }
            (_, Classified::Ignored) => {
                tracing::debug!(provider = %self.provider_id(), bytes = body.len(), "Dropping unparseable frame");
            }
            (phase, classified) => {
                tracing::trace!(
                    provider = %self.provider_id(),
                    phase = %phase,
                    records = classified.record_count(),
                    "Frame ignored in current phase"
                );
            }
        }
    }

    fn complete_snapshot(&mut self, timed_out: bool) {
        let input = if timed_out {
            PhaseInput::SnapshotTimeout
        } else {
            PhaseInput::EndOfSnapshot
        };
        if self.phases.apply(input).is_none() {
            return;
        }

        self.snapshot_deadline = None;
        let duration = self
            .snapshot_started
            .map(|start| start.elapsed())
            .unwrap_or(Duration::ZERO);
        self.counters.last_snapshot_duration = Some(duration);
        let row_count = self.counters.cycle_snapshot_rows;

        tracing::info!(
            provider = %self.provider_id(),
            rows = row_count,
            duration_ms = duration.as_millis() as u64,
            timed_out,
            "Snapshot complete"
        );

        self.broadcast(BrokerEvent::SnapshotComplete {
            provider_id: self.provider_id().to_string(),
            row_count,
            duration_ms: duration.as_millis() as u64,
            timed_out,
        });
        self.push_status();
    }

    fn on_snapshot_timeout(&mut self) {
        if self.phase() != SessionPhase::Snapshot {
            return;
        }
        tracing::warn!(
            provider = %self.provider_id(),
            timeout_ms = self.config.snapshot_timeout_ms,
            rows = self.counters.cycle_snapshot_rows,
            "End-of-snapshot sentinel not received in time"
        );
        self.complete_snapshot(true);
    }

    /// Subscribe/trigger failed after connecting
    fn fail_cycle(&mut self, message: String) {
        tracing::error!(provider = %self.provider_id(), error = %message, "Snapshot cycle failed");
        self.broadcast(BrokerEvent::Error {
            provider_id: self.provider_id().to_string(),
            message: message.clone(),
        });
        self.enter_disconnected(&message);
    }

    /// Move to `Disconnected`. The cache is kept for `get-snapshot`.
    fn enter_disconnected(&mut self, reason: &str) {
        self.snapshot_deadline = None;
        self.subscription = None;
        if self.phases.apply(PhaseInput::Disconnect).is_none() {
            return;
        }
        self.counters.disconnects += 1;

        self.broadcast(BrokerEvent::Disconnected {
            provider_id: self.provider_id().to_string(),
            reason: reason.to_string(),
        });
        self.push_status();
    }

    /// Disconnect now and reconnect after the settle delay
    fn refresh(&mut self) {
        tracing::info!(
            provider = %self.provider_id(),
            settle_ms = self.settings.refresh_settle_delay.as_millis() as u64,
            "Refreshing session"
        );
        self.close_transport();
        self.enter_disconnected("refresh");
        self.reconnect_at = Some(Instant::now() + self.settings.refresh_settle_delay);
    }

    fn close_transport(&mut self) {
        if let Some(sub) = self.subscription.take() {
            let _ = self.transport.unsubscribe(sub);
        }
        if self.events.take().is_some() {
            self.transport.deactivate();
        }
    }

    fn teardown(&mut self, reason: &str) {
        self.close_transport();
        self.reconnect_at = None;

        if self.phases.apply(PhaseInput::Disconnect).is_some() {
            self.counters.disconnects += 1;
        }
        if !self.consumers.is_empty() {
            self.broadcast(BrokerEvent::Disconnected {
                provider_id: self.provider_id().to_string(),
                reason: reason.to_string(),
            });
            self.consumers.clear();
        }

        tracing::info!(provider = %self.provider_id(), reason = %reason, "Provider session stopped");
    }

    fn status_report(&mut self) -> StatusReport {
        StatusReport {
            provider_id: self.provider_id().to_string(),
            phase: self.phase(),
            consumers: self.consumers.len(),
            statistics: self
                .counters
                .snapshot(Instant::now().into_std(), self.cache.len()),
        }
    }

    fn status_event(&mut self) -> BrokerEvent {
        let report = self.status_report();
        BrokerEvent::Status {
            provider_id: report.provider_id,
            phase: report.phase,
            statistics: report.statistics,
        }
    }

    fn push_status(&mut self) {
        if self.consumers.is_empty() {
            return;
        }
        let event = self.status_event();
        self.broadcast(event);
    }

    /// Send to every attached consumer without waiting. Consumers that are
    /// gone are dropped; consumers whose queue is full are evicted.
    fn broadcast(&mut self, event: BrokerEvent) {
        if self.consumers.is_empty() {
            return;
        }
        let envelope: Envelope = event.into_envelope();
        let provider = self.config.provider_id.as_str();

        self.consumers
            .retain(|id, consumer| match consumer.deliver(envelope.clone()) {
                Delivery::Delivered => true,
                Delivery::Lagging => {
                    tracing::warn!(provider = %provider, consumer = %id, "Consumer lagging, evicting");
                    consumer.evict();
                    false
                }
                Delivery::Closed => {
                    tracing::debug!(provider = %provider, consumer = %id, "Dropping closed consumer");
                    false
                }
            });
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
