use crate::engine::ParameterGovernanceEngine;
use crate::events::{GovernanceEvent, ParameterDecisionRecord};
use crate::overrides::{OverrideScope, ParameterOverrideState};
use crate::resolver::ParameterResolutionContext;
use crate::tracker::{Charge, RequestTracker, TrackerKey};
use crate::validator::{constrain, GovernanceConfig, ValidationOutcome};
use chrono::{DateTime, Utc};
use orpar_core::{
    require_id, OrparError, OrparPhase, OrparResult, PartialProfile, PhaseParameterProfile,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Absorbs float noise when comparing cost sums against limits.
const COST_EPSILON: f64 = 1e-9;

/// An agent's request to change its inference parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRequest {
    /// Fields to change; unset fields keep their resolved value.
    pub suggested: PartialProfile,
    /// Free-text justification, recorded with the decision.
    pub reason: String,
    /// How long the override applies.
    pub scope: OverrideScope,
}

impl OverrideRequest {
    /// Creates a request.
    pub fn new(suggested: PartialProfile, reason: impl Into<String>, scope: OverrideScope) -> Self {
        Self {
            suggested,
            reason: reason.into(),
            scope,
        }
    }
}

/// Outcome class of an admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideStatus {
    /// Granted as asked.
    Approved,
    /// Granted after being constrained to governance.
    Modified,
    /// Refused. No override was stored and nothing was charged.
    Denied,
}

impl OverrideStatus {
    /// True for [`Approved`](Self::Approved) and [`Modified`](Self::Modified).
    pub fn is_granted(&self) -> bool {
        !matches!(self, OverrideStatus::Denied)
    }
}

/// Result of [`ParameterGovernanceEngine::request_override`].
///
/// `active_params` is always usable: on denial it is the unchanged baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideDecision {
    /// Outcome class.
    pub status: OverrideStatus,
    /// Parameters the next matching resolution will use.
    pub active_params: PhaseParameterProfile,
    /// Parameters in effect before the request.
    pub previous_params: PhaseParameterProfile,
    /// Why the request was modified or denied.
    pub rationale: Option<String>,
    /// Zero when denied.
    pub cost_delta: f64,
    /// Id of the stored override, when one was granted.
    pub override_id: Option<Uuid>,
    /// When the granted override stops applying.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Auto-modification prepared before the tracker lock is taken.
struct Modification {
    profile: PhaseParameterProfile,
    revalidation: ValidationOutcome,
    cost_delta: f64,
}

enum Verdict {
    Approved { cost_delta: f64 },
    Modified { cost_delta: f64 },
    Denied { rationale: String },
}

impl ParameterGovernanceEngine {
    /// Runs one override request through rate, budget, and policy checks.
    ///
    /// Malformed input is an `Err`; policy denial is an `Ok` decision with
    /// [`OverrideStatus::Denied`]. A failing cost estimator or validator is
    /// surfaced as [`OrparError::Collaborator`] and nothing is admitted.
    pub fn request_override(
        &self,
        agent_id: &str,
        channel_id: &str,
        task_id: Option<&str>,
        phase: OrparPhase,
        request: OverrideRequest,
    ) -> OrparResult<OverrideDecision> {
        require_id("agent_id", agent_id)?;
        require_id("channel_id", channel_id)?;
        if let Some(task_id) = task_id {
            require_id("task_id", task_id)?;
        }
        request.suggested.check_well_formed()?;
        if request.scope == OverrideScope::Task && task_id.is_none() {
            return Err(OrparError::Validation(
                "task-scoped overrides require a task_id".into(),
            ));
        }

        let now = Utc::now();
        let governance = self.effective_governance(agent_id, channel_id);

        let mut context = ParameterResolutionContext::new(agent_id, channel_id, phase);
        context.task_id = task_id.map(String::from);
        // Asking for a change must not burn a pending next_call override.
        let current = self.resolve_inner(&context, now, false).profile;
        let suggested = current.overlaid(&request.suggested);

        let validation = self.validate(&suggested, &governance)?;
        let baseline_cost = self.profile_cost(&current)?;
        let suggested_delta = self.profile_cost(&suggested)? - baseline_cost;

        let modification = if validation.valid {
            None
        } else {
            let agent = self.agent_config(agent_id);
            let preferred = self
                .profiles
                .default_profile(self.provider_for(agent.as_ref()), phase)
                .model;
            let profile = constrain(&suggested, &governance, &preferred);
            let revalidation = self.validate(&profile, &governance)?;
            let cost_delta = self.profile_cost(&profile)? - baseline_cost;
            Some(Modification {
                profile,
                revalidation,
                cost_delta,
            })
        };

        let key = TrackerKey::new(agent_id, channel_id, task_id);
        let verdict = self.trackers.transact(&key, now, |tracker| {
            if let Some(rationale) = rate_limit_violation(tracker, phase, &governance) {
                return (Verdict::Denied { rationale }, None);
            }
            if let Some(rationale) = budget_violation(tracker, suggested_delta, &governance) {
                return (Verdict::Denied { rationale }, None);
            }
            let (verdict, cost_delta) = match &modification {
                None => (
                    Verdict::Approved {
                        cost_delta: suggested_delta,
                    },
                    suggested_delta,
                ),
                Some(m) if !m.revalidation.valid => {
                    let rationale = format!(
                        "Requested parameters violate governance and cannot be adjusted \
                         to comply: {}",
                        m.revalidation.violations.join("; ")
                    );
                    return (Verdict::Denied { rationale }, None);
                }
                Some(m) => {
                    if let Some(rationale) = budget_violation(tracker, m.cost_delta, &governance) {
                        return (Verdict::Denied { rationale }, None);
                    }
                    (
                        Verdict::Modified {
                            cost_delta: m.cost_delta,
                        },
                        m.cost_delta,
                    )
                }
            };
            let charge = Charge {
                phase,
                cost_delta,
                at: now,
            };
            (verdict, Some(charge))
        });

        let decision = match verdict {
            Verdict::Denied { rationale } => OverrideDecision {
                status: OverrideStatus::Denied,
                active_params: current.clone(),
                previous_params: current.clone(),
                rationale: Some(rationale),
                cost_delta: 0.0,
                override_id: None,
                expires_at: None,
            },
            Verdict::Approved { cost_delta } => {
                let params = request.suggested.clone();
                let state = self.create_override(
                    agent_id,
                    channel_id,
                    task_id,
                    phase,
                    &request,
                    params,
                    now,
                );
                OverrideDecision {
                    status: OverrideStatus::Approved,
                    active_params: suggested,
                    previous_params: current.clone(),
                    rationale: None,
                    cost_delta,
                    override_id: Some(state.id),
                    expires_at: state.expires_at,
                }
            }
            Verdict::Modified { cost_delta } => {
                let Some(modification) = modification else {
                    return Err(OrparError::Governance(
                        "modified verdict without a prepared modification".into(),
                    ));
                };
                let params = override_params(&request.suggested, &current, &modification.profile);
                let state = self.create_override(
                    agent_id,
                    channel_id,
                    task_id,
                    phase,
                    &request,
                    params,
                    now,
                );
                OverrideDecision {
                    status: OverrideStatus::Modified,
                    active_params: modification.profile,
                    previous_params: current.clone(),
                    rationale: Some(format!(
                        "Parameters adjusted to satisfy governance: {}",
                        validation.violations.join("; ")
                    )),
                    cost_delta,
                    override_id: Some(state.id),
                    expires_at: state.expires_at,
                }
            }
        };

        info!(
            agent_id,
            channel_id,
            phase = %phase,
            scope = %request.scope,
            status = ?decision.status,
            cost_delta = decision.cost_delta,
            "parameter override decided"
        );
        self.publish_decision(agent_id, channel_id, task_id, phase, &request, &decision, now);
        Ok(decision)
    }

    fn validate(
        &self,
        profile: &PhaseParameterProfile,
        governance: &GovernanceConfig,
    ) -> OrparResult<ValidationOutcome> {
        self.validator.validate(profile, governance).map_err(|e| {
            warn!(error = %e, "governance validator failed");
            match e {
                OrparError::Collaborator(msg) => OrparError::Collaborator(msg),
                other => OrparError::Collaborator(format!("governance validation failed: {other}")),
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn create_override(
        &self,
        agent_id: &str,
        channel_id: &str,
        task_id: Option<&str>,
        phase: OrparPhase,
        request: &OverrideRequest,
        params: PartialProfile,
        now: DateTime<Utc>,
    ) -> ParameterOverrideState {
        let state = ParameterOverrideState {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            channel_id: channel_id.to_string(),
            task_id: task_id.map(String::from),
            phase,
            scope: request.scope,
            params,
            reason: request.reason.clone(),
            created_at: now,
            expires_at: Some(now + self.config.ttl.for_scope(request.scope)),
            consumed: false,
        };
        self.overrides.insert(state.clone());
        state
    }

    #[allow(clippy::too_many_arguments)]
    fn publish_decision(
        &self,
        agent_id: &str,
        channel_id: &str,
        task_id: Option<&str>,
        phase: OrparPhase,
        request: &OverrideRequest,
        decision: &OverrideDecision,
        now: DateTime<Utc>,
    ) {
        self.events
            .publish(&GovernanceEvent::ParameterDecision(ParameterDecisionRecord {
                id: Uuid::new_v4(),
                timestamp: now,
                agent_id: agent_id.to_string(),
                channel_id: channel_id.to_string(),
                task_id: task_id.map(String::from),
                phase,
                scope: request.scope,
                reason: request.reason.clone(),
                requested: request.suggested.clone(),
                previous_params: decision.previous_params.clone(),
                active_params: decision.active_params.clone(),
                status: decision.status,
                rationale: decision.rationale.clone(),
                cost_delta: decision.cost_delta,
                override_id: decision.override_id,
            }));
        self.events.publish(&GovernanceEvent::GovernanceAnalytics {
            agent_id: agent_id.to_string(),
            channel_id: channel_id.to_string(),
            phase,
            status: decision.status,
            cost_delta: decision.cost_delta,
            timestamp: now,
        });
    }
}

fn rate_limit_violation(
    tracker: &RequestTracker,
    phase: OrparPhase,
    governance: &GovernanceConfig,
) -> Option<String> {
    if let Some(max) = governance.max_requests_per_phase {
        let made = tracker.requests_in(phase);
        if made >= max {
            return Some(format!(
                "Rate limit exceeded: {made} override requests already made in the \
                 {phase} phase (max {max} per phase)"
            ));
        }
    }
    if let Some(max) = governance.max_requests_per_task {
        if tracker.total_requests >= max {
            return Some(format!(
                "Rate limit exceeded: {} override requests already made for this task \
                 (max {max} per task)",
                tracker.total_requests
            ));
        }
    }
    None
}

fn budget_violation(
    tracker: &RequestTracker,
    cost_delta: f64,
    governance: &GovernanceConfig,
) -> Option<String> {
    if let Some(max) = governance.max_cost_per_call {
        if cost_delta > max + COST_EPSILON {
            return Some(format!(
                "Per-call cost limit exceeded: cost increase ${cost_delta:.4} exceeds \
                 maximum ${max:.4} per call"
            ));
        }
    }
    if let Some(max) = governance.max_cost_per_task {
        let projected = tracker.total_cost + cost_delta;
        if projected > max + COST_EPSILON {
            return Some(format!(
                "Per-task cost limit exceeded: accumulated ${:.4} plus ${cost_delta:.4} \
                 exceeds maximum ${max:.4} per task",
                tracker.total_cost
            ));
        }
    }
    None
}

/// Fields the override must pin: everything the agent asked for, plus
/// anything the governance adjustment changed relative to the baseline.
fn override_params(
    requested: &PartialProfile,
    baseline: &PhaseParameterProfile,
    active: &PhaseParameterProfile,
) -> PartialProfile {
    PartialProfile {
        model: (requested.model.is_some() || active.model != baseline.model)
            .then(|| active.model.clone()),
        temperature: (requested.temperature.is_some() || active.temperature != baseline.temperature)
            .then_some(active.temperature),
        max_output_tokens: (requested.max_output_tokens.is_some()
            || active.max_output_tokens != baseline.max_output_tokens)
            .then_some(active.max_output_tokens),
        reasoning_tokens: (requested.reasoning_tokens.is_some()
            || active.reasoning_tokens != baseline.reasoning_tokens)
            .then_some(active.reasoning_tokens),
    }
}
