use crate::admission::OverrideStatus;
use crate::lifecycle::ResetScope;
use crate::overrides::OverrideScope;
use chrono::{DateTime, Utc};
use orpar_core::{OrparPhase, PartialProfile, PhaseParameterProfile};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Audit record of one admission decision.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterDecisionRecord {
    /// Unique id of this record.
    pub id: Uuid,
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
    /// Requesting agent.
    pub agent_id: String,
    /// Channel the request came from.
    pub channel_id: String,
    /// Task the request was made for, if any.
    pub task_id: Option<String>,
    /// Phase the request was made in.
    pub phase: OrparPhase,
    /// Requested scope.
    pub scope: OverrideScope,
    /// Agent-supplied justification.
    pub reason: String,
    /// Fields the agent asked for.
    pub requested: PartialProfile,
    /// Parameters before the request.
    pub previous_params: PhaseParameterProfile,
    /// Parameters after the decision.
    pub active_params: PhaseParameterProfile,
    /// Outcome class.
    pub status: OverrideStatus,
    /// Explanation for a modification or denial.
    pub rationale: Option<String>,
    /// Zero when denied.
    pub cost_delta: f64,
    /// Stored override, if one was granted.
    pub override_id: Option<Uuid>,
}

/// Events published by the governance engine. Publication is fire-and-forget.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GovernanceEvent {
    /// Full audit record of an admission decision.
    ParameterDecision(ParameterDecisionRecord),
    /// Compact per-request analytics, emitted for every decision.
    GovernanceAnalytics {
        /// Requesting agent.
        agent_id: String,
        /// Channel the request came from.
        channel_id: String,
        /// Phase the request was made in.
        phase: OrparPhase,
        /// Outcome class.
        status: OverrideStatus,
        /// Admitted cost delta; zero when denied.
        cost_delta: f64,
        /// When the decision was made.
        timestamp: DateTime<Utc>,
    },
    /// An explicit reset finished.
    OverridesReset {
        /// Agent whose overrides were reset.
        agent_id: String,
        /// Channel whose overrides were reset.
        channel_id: String,
        /// Which overrides were targeted.
        scope: ResetScope,
        /// Number of overrides removed.
        reset_count: usize,
        /// Task targeted by a task-scoped reset.
        task_id: Option<String>,
        /// When the reset ran.
        timestamp: DateTime<Utc>,
    },
}

impl GovernanceEvent {
    /// Stable event name, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            GovernanceEvent::ParameterDecision(_) => "parameter_decision",
            GovernanceEvent::GovernanceAnalytics { .. } => "governance_analytics",
            GovernanceEvent::OverridesReset { .. } => "overrides_reset",
        }
    }
}

/// Receives governance events. Must not block.
pub trait EventSink: Send + Sync {
    /// Delivers one event. Delivery failures are swallowed by the sink.
    fn publish(&self, event: &GovernanceEvent);
}

/// Writes every event to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: &GovernanceEvent) {
        match event {
            GovernanceEvent::ParameterDecision(record) => info!(
                agent_id = %record.agent_id,
                channel_id = %record.channel_id,
                phase = %record.phase,
                scope = %record.scope,
                status = ?record.status,
                cost_delta = record.cost_delta,
                "parameter decision"
            ),
            GovernanceEvent::GovernanceAnalytics { .. } => {
                tracing::debug!(event = event.kind(), "governance analytics");
            }
            GovernanceEvent::OverridesReset {
                agent_id,
                channel_id,
                scope,
                reset_count,
                ..
            } => info!(
                agent_id = %agent_id,
                channel_id = %channel_id,
                scope = ?scope,
                reset_count,
                "parameter overrides reset"
            ),
        }
    }
}

/// Forwards events into an unbounded channel, e.g. towards an external bus.
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<GovernanceEvent>,
}

impl ChannelEventSink {
    /// Creates a sink together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<GovernanceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn publish(&self, event: &GovernanceEvent) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.tx.send(event.clone());
    }
}

/// Fans events out to several sinks in order.
#[derive(Default)]
pub struct EventSinkChain {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventSinkChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Appends a sink.
    pub fn add(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Builder form of [`add`](Self::add).
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.add(sink);
        self
    }

    /// Number of sinks in the chain.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

impl EventSink for EventSinkChain {
    fn publish(&self, event: &GovernanceEvent) {
        for sink in &self.sinks {
            sink.publish(event);
        }
    }
}
