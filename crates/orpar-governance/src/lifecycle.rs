use crate::engine::ParameterGovernanceEngine;
use crate::events::GovernanceEvent;
use crate::overrides::OverrideScope;
use chrono::{DateTime, Utc};
use orpar_core::{require_id, OrparError, OrparPhase, OrparResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A task finished; its task-scoped overrides and trackers are reclaimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompleted {
    /// The completed task.
    pub task_id: String,
}

/// An agent finished one phase of its cycle. Overrides scoped to
/// `current_phase` and granted in that phase are reclaimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCompleted {
    /// Agent that completed the phase.
    pub agent_id: String,
    /// Channel the agent ran the phase in.
    pub channel_id: String,
    /// The completed phase.
    pub phase: OrparPhase,
}

/// An agent left; its session overrides are reclaimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDisconnected {
    /// The disconnected agent.
    pub agent_id: String,
}

/// Lifecycle signals the engine reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// See [`TaskCompleted`].
    TaskCompleted(TaskCompleted),
    /// See [`PhaseCompleted`].
    PhaseCompleted(PhaseCompleted),
    /// See [`AgentDisconnected`].
    AgentDisconnected(AgentDisconnected),
}

impl LifecycleEvent {
    /// Builds a typed event from a loosely typed payload, e.g. one relayed
    /// from an external bus.
    pub fn from_payload(kind: &str, payload: &serde_json::Value) -> OrparResult<Self> {
        let event = match kind {
            "task_completed" => {
                LifecycleEvent::TaskCompleted(serde_json::from_value(payload.clone())?)
            }
            "phase_completed" => {
                LifecycleEvent::PhaseCompleted(serde_json::from_value(payload.clone())?)
            }
            "agent_disconnected" => {
                LifecycleEvent::AgentDisconnected(serde_json::from_value(payload.clone())?)
            }
            other => {
                return Err(OrparError::Lifecycle(format!(
                    "unknown lifecycle event kind '{other}'"
                )))
            }
        };
        event.validate()?;
        Ok(event)
    }

    /// Rejects events with missing identifiers.
    pub fn validate(&self) -> OrparResult<()> {
        let checked = match self {
            LifecycleEvent::TaskCompleted(e) => require_id("task_id", &e.task_id),
            LifecycleEvent::PhaseCompleted(e) => require_id("agent_id", &e.agent_id)
                .and_then(|()| require_id("channel_id", &e.channel_id)),
            LifecycleEvent::AgentDisconnected(e) => require_id("agent_id", &e.agent_id),
        };
        checked.map_err(|e| OrparError::Lifecycle(format!("malformed {} event: {e}", self.kind())))
    }

    /// Wire name of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::TaskCompleted(_) => "task_completed",
            LifecycleEvent::PhaseCompleted(_) => "phase_completed",
            LifecycleEvent::AgentDisconnected(_) => "agent_disconnected",
        }
    }
}

/// Broadcast channel carrying [`LifecycleEvent`]s to every subscriber.
#[derive(Debug, Clone)]
pub struct LifecycleBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleBus {
    /// Creates a bus that buffers up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event. Returns how many subscribers will see it.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Validates and publishes a raw payload. Malformed payloads are logged
    /// and dropped.
    pub fn publish_payload(&self, kind: &str, payload: &serde_json::Value) -> bool {
        match LifecycleEvent::from_payload(kind, payload) {
            Ok(event) => {
                self.publish(event);
                true
            }
            Err(e) => {
                warn!(kind, error = %e, "dropping malformed lifecycle payload");
                false
            }
        }
    }

    /// A new receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LifecycleBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Which overrides an explicit reset removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetScope {
    /// Every override of the agent/channel pair.
    All,
    /// Session overrides of the agent/channel pair.
    Session,
    /// Task-scoped overrides for one task id.
    Task,
}

impl std::str::FromStr for ResetScope {
    type Err = OrparError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(ResetScope::All),
            "session" => Ok(ResetScope::Session),
            "task" => Ok(ResetScope::Task),
            other => Err(OrparError::Validation(format!("unknown reset scope '{other}'"))),
        }
    }
}

/// Result of an explicit reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetOutcome {
    /// Number of overrides removed.
    pub reset_count: usize,
    /// Human-readable summary.
    pub message: String,
}

/// Counts from one periodic sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Overrides removed because their TTL passed.
    pub expired_overrides: usize,
    /// Spent `next_call` overrides removed.
    pub consumed_overrides: usize,
    /// Request trackers removed for idleness.
    pub idle_trackers: usize,
}

impl ParameterGovernanceEngine {
    /// Removes task-scoped overrides and request trackers for `task_id`.
    pub fn on_task_completed(&self, task_id: &str) -> usize {
        let removed = self.overrides.remove_where(|o| {
            o.scope == OverrideScope::Task && o.task_id.as_deref() == Some(task_id)
        });
        let trackers = self.trackers.remove_task(task_id);
        debug!(task_id, removed, trackers, "task completed, overrides reclaimed");
        removed
    }

    /// Removes `current_phase` overrides of `phase` for the agent/channel pair.
    ///
    /// Any phase may complete, not only the one closing a cycle: a
    /// `current_phase` override lives exactly as long as the phase it was
    /// granted in. Completing `Reflection` therefore also reclaims the
    /// overrides granted during Reflection at the end of a cycle. Overrides
    /// granted in other phases are untouched.
    pub fn on_phase_completed(
        &self,
        agent_id: &str,
        channel_id: &str,
        phase: OrparPhase,
    ) -> usize {
        let removed = self.overrides.remove_where(|o| {
            o.scope == OverrideScope::CurrentPhase
                && o.agent_id == agent_id
                && o.channel_id == channel_id
                && o.phase == phase
        });
        debug!(
            agent_id,
            channel_id,
            phase = %phase,
            removed,
            "phase completed, overrides reclaimed"
        );
        removed
    }

    /// Removes every session override of `agent_id`, across channels.
    pub fn on_agent_disconnected(&self, agent_id: &str) -> usize {
        let removed = self
            .overrides
            .remove_where(|o| o.scope == OverrideScope::Session && o.agent_id == agent_id);
        debug!(agent_id, removed, "agent disconnected, session overrides reclaimed");
        removed
    }

    /// Dispatches one lifecycle event. Malformed events are logged and ignored.
    pub fn handle_lifecycle_event(&self, event: &LifecycleEvent) {
        if let Err(e) = event.validate() {
            warn!(error = %e, "ignoring lifecycle event");
            return;
        }
        match event {
            LifecycleEvent::TaskCompleted(e) => {
                self.on_task_completed(&e.task_id);
            }
            LifecycleEvent::PhaseCompleted(e) => {
                self.on_phase_completed(&e.agent_id, &e.channel_id, e.phase);
            }
            LifecycleEvent::AgentDisconnected(e) => {
                self.on_agent_disconnected(&e.agent_id);
            }
        }
    }

    /// Drops expired or consumed overrides and idle request trackers.
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    /// [`sweep`](Self::sweep) evaluated at `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let overrides = self.overrides.sweep(now);
        let idle_trackers = self.trackers.sweep_idle(now, self.config.tracker_idle());
        SweepReport {
            expired_overrides: overrides.expired,
            consumed_overrides: overrides.consumed,
            idle_trackers,
        }
    }

    /// Explicitly removes overrides for an agent/channel pair.
    pub fn reset_overrides(
        &self,
        agent_id: &str,
        channel_id: &str,
        scope: ResetScope,
        task_id: Option<&str>,
    ) -> OrparResult<ResetOutcome> {
        require_id("agent_id", agent_id)?;
        require_id("channel_id", channel_id)?;
        let task_id = match (scope, task_id) {
            (ResetScope::Task, None) => {
                return Err(OrparError::Validation(
                    "a task reset requires a task_id".into(),
                ))
            }
            (_, Some(id)) => {
                require_id("task_id", id)?;
                Some(id)
            }
            (_, None) => None,
        };

        let reset_count = self.overrides.remove_where(|o| {
            o.agent_id == agent_id
                && o.channel_id == channel_id
                && match scope {
                    ResetScope::All => true,
                    ResetScope::Session => o.scope == OverrideScope::Session,
                    ResetScope::Task => {
                        o.scope == OverrideScope::Task && o.task_id.as_deref() == task_id
                    }
                }
        });

        let message = match (scope, task_id) {
            (ResetScope::Task, Some(task)) => {
                format!("Reset {reset_count} task override(s) for task {task}")
            }
            (ResetScope::Session, _) => format!("Reset {reset_count} session override(s)"),
            _ => format!("Reset {reset_count} override(s)"),
        };
        info!(agent_id, channel_id, scope = ?scope, reset_count, "overrides reset");
        self.events.publish(&GovernanceEvent::OverridesReset {
            agent_id: agent_id.to_string(),
            channel_id: channel_id.to_string(),
            scope,
            reset_count,
            task_id: task_id.map(String::from),
            timestamp: Utc::now(),
        });

        Ok(ResetOutcome {
            reset_count,
            message,
        })
    }
}

/// Background reclamation: a periodic sweep plus a lifecycle-event subscription.
///
/// Call [`shutdown`](LifecycleManager::shutdown) to stop both tasks, detach
/// the subscription, and clear the engine's state. Dropping the manager
/// without shutting down aborts the tasks but leaves state in place.
pub struct LifecycleManager {
    engine: Arc<ParameterGovernanceEngine>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl LifecycleManager {
    /// Starts reclamation using the engine's configured sweep interval.
    pub fn start(engine: Arc<ParameterGovernanceEngine>, bus: &LifecycleBus) -> Self {
        let interval = engine.config().sweep_interval();
        Self::start_with_interval(engine, bus, interval)
    }

    /// Starts reclamation with an explicit sweep interval.
    pub fn start_with_interval(
        engine: Arc<ParameterGovernanceEngine>,
        bus: &LifecycleBus,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = tokio::spawn(sweep_loop(Arc::clone(&engine), interval, shutdown_rx.clone()));
        let listener = tokio::spawn(event_loop(Arc::clone(&engine), bus.subscribe(), shutdown_rx));
        info!(interval_ms = interval.as_millis() as u64, "lifecycle manager started");
        Self {
            engine,
            shutdown_tx,
            handles: vec![sweeper, listener],
        }
    }

    /// Stops the sweep timer and event subscription, then clears all
    /// in-memory engine state.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in std::mem::take(&mut self.handles) {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "lifecycle task ended abnormally");
                }
            }
        }
        self.engine.clear_state();
        info!("lifecycle manager stopped");
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn sweep_loop(
    engine: Arc<ParameterGovernanceEngine>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = engine.sweep();
                if report != SweepReport::default() {
                    debug!(
                        expired = report.expired_overrides,
                        consumed = report.consumed_overrides,
                        idle_trackers = report.idle_trackers,
                        "governance sweep"
                    );
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn event_loop(
    engine: Arc<ParameterGovernanceEngine>,
    mut events: broadcast::Receiver<LifecycleEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => engine.handle_lifecycle_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "lifecycle subscription lagged; periodic sweep will catch up");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}
