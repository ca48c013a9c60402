//! Cross-module governance scenarios: resolution precedence, admission
//! limits, reset scoping, and lifecycle reclamation against one engine.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{Duration, Utc};
use orpar_core::{
    LlmProvider, OrparError, OrparPhase, OrparResult, PartialProfile, PhaseParameterProfile,
};
use orpar_governance::*;
use parking_lot::Mutex;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

/// Prices "pricey" at a flat $0.50 per call and everything else at zero.
struct FlatPriceEstimator;

impl CostEstimator for FlatPriceEstimator {
    fn estimate_cost(&self, model: &str, _: u32, _: u32, _: u32) -> OrparResult<f64> {
        Ok(if model == "pricey" { 0.50 } else { 0.0 })
    }
}

struct FailingEstimator;

impl CostEstimator for FailingEstimator {
    fn estimate_cost(&self, _: &str, _: u32, _: u32, _: u32) -> OrparResult<f64> {
        Err(OrparError::Collaborator("pricing service unavailable".into()))
    }
}

/// Rejects every profile, including the auto-constrained one.
struct AlwaysViolatingValidator;

impl GovernanceValidator for AlwaysViolatingValidator {
    fn validate(
        &self,
        _: &PhaseParameterProfile,
        _: &GovernanceConfig,
    ) -> OrparResult<ValidationOutcome> {
        Ok(ValidationOutcome::from_violations(vec![
            "model is under review".into(),
        ]))
    }
}

struct FailingValidator;

impl GovernanceValidator for FailingValidator {
    fn validate(
        &self,
        _: &PhaseParameterProfile,
        _: &GovernanceConfig,
    ) -> OrparResult<ValidationOutcome> {
        Err(OrparError::Collaborator("policy service unavailable".into()))
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<GovernanceEvent>>,
}

impl RecordingSink {
    fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(GovernanceEvent::kind).collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: &GovernanceEvent) {
        self.events.lock().push(event.clone());
    }
}

fn engine() -> ParameterGovernanceEngine {
    ParameterGovernanceEngine::default().with_cost_estimator(Arc::new(FlatPriceEstimator))
}

fn govern(engine: &ParameterGovernanceEngine, governance: GovernanceConfig) {
    engine
        .set_governance_config(GovernanceScope::System, governance)
        .unwrap();
}

fn ask(
    engine: &ParameterGovernanceEngine,
    task_id: Option<&str>,
    phase: OrparPhase,
    suggested: PartialProfile,
    scope: OverrideScope,
) -> OverrideDecision {
    engine
        .request_override(
            "agent-1",
            "chan-1",
            task_id,
            phase,
            OverrideRequest::new(suggested, "integration test", scope),
        )
        .unwrap()
}

fn temp(t: f32) -> PartialProfile {
    PartialProfile::default().with_temperature(t)
}

fn ctx(phase: OrparPhase) -> ParameterResolutionContext {
    ParameterResolutionContext::new("agent-1", "chan-1", phase)
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[test]
fn scenario_default_governance_resolves_builtin_profile() {
    let engine = engine();
    for (phase, expected) in default_profiles(LlmProvider::Claude) {
        assert_eq!(engine.resolve(&ctx(phase)), expected);
    }
}

#[test]
fn resolution_is_idempotent_without_next_call_overrides() {
    let engine = engine();
    ask(&engine, None, OrparPhase::Planning, temp(0.9), OverrideScope::Session);
    let first = engine.resolve(&ctx(OrparPhase::Planning));
    let second = engine.resolve(&ctx(OrparPhase::Planning));
    assert_eq!(first, second);
    assert_eq!(first.temperature, 0.9);
}

#[test]
fn next_call_override_applies_exactly_once() {
    let engine = engine();
    let baseline = engine.resolve(&ctx(OrparPhase::Action));
    ask(&engine, None, OrparPhase::Action, temp(0.05), OverrideScope::NextCall);

    // Previewing does not spend it.
    assert_eq!(engine.preview(&ctx(OrparPhase::Action)).profile.temperature, 0.05);
    assert_eq!(engine.resolve(&ctx(OrparPhase::Action)).temperature, 0.05);
    assert_eq!(engine.resolve(&ctx(OrparPhase::Action)), baseline);
    assert_eq!(engine.sweep().consumed_overrides, 1);
}

#[test]
fn override_precedence_is_phase_then_task_then_next_call_then_session() {
    let engine = engine();
    let phase = OrparPhase::Reasoning;
    ask(&engine, Some("t1"), phase, temp(0.1), OverrideScope::Session);
    ask(&engine, Some("t1"), phase, temp(0.2), OverrideScope::NextCall);
    ask(&engine, Some("t1"), phase, temp(0.3), OverrideScope::Task);
    ask(&engine, Some("t1"), phase, temp(0.4), OverrideScope::CurrentPhase);
    let context = ctx(phase).with_task("t1");

    assert_eq!(engine.resolve(&context).temperature, 0.4);
    engine.on_phase_completed("agent-1", "chan-1", phase);
    assert_eq!(engine.resolve(&context).temperature, 0.3);
    engine.on_task_completed("t1");
    assert_eq!(engine.resolve(&context).temperature, 0.2);
    assert_eq!(engine.resolve(&context).temperature, 0.1);
}

#[test]
fn newest_override_wins_within_a_scope() {
    let engine = engine();
    ask(&engine, None, OrparPhase::Action, temp(0.1), OverrideScope::Session);
    std::thread::sleep(std::time::Duration::from_millis(2));
    ask(&engine, None, OrparPhase::Action, temp(0.7), OverrideScope::Session);
    assert_eq!(engine.resolve(&ctx(OrparPhase::Action)).temperature, 0.7);
}

#[test]
fn configured_layers_stack_below_overrides() {
    let engine = engine();
    engine
        .set_channel_defaults(
            "chan-1",
            ChannelDefaults {
                phases: PhaseProfiles::default()
                    .with_phase(OrparPhase::Observation, temp(0.15).with_max_output_tokens(900)),
            },
        )
        .unwrap();
    engine
        .set_agent_config(
            "agent-1",
            AgentParameterConfig {
                provider: Some(LlmProvider::OpenAi),
                phases: PhaseProfiles::default().with_phase(OrparPhase::Observation, temp(0.25)),
            },
        )
        .unwrap();

    let resolved = engine.resolve(&ctx(OrparPhase::Observation));
    assert_eq!(resolved.model, "gpt-4o-mini");
    assert_eq!(resolved.temperature, 0.25);
    assert_eq!(resolved.max_output_tokens, 900);

    let with_task = ctx(OrparPhase::Observation)
        .with_task("t9")
        .with_task_overrides(PartialProfile::default().with_max_output_tokens(1200));
    assert_eq!(engine.resolve(&with_task).max_output_tokens, 1200);
}

#[test]
fn expired_override_is_never_applied() {
    let engine = engine();
    let baseline = engine.resolve(&ctx(OrparPhase::Action));
    ask(&engine, None, OrparPhase::Action, temp(0.05), OverrideScope::NextCall);

    let later = Utc::now() + Duration::minutes(6);
    let resolution = engine.resolve_at(&ctx(OrparPhase::Action), later);
    assert_eq!(resolution.profile, baseline);
    assert!(resolution.applied_override.is_none());
    assert_eq!(engine.sweep_at(later).expired_overrides, 1);
}

#[test]
fn task_override_only_applies_to_its_task() {
    let engine = engine();
    ask(&engine, Some("t1"), OrparPhase::Action, temp(0.05), OverrideScope::Task);
    assert_eq!(engine.resolve(&ctx(OrparPhase::Action).with_task("t1")).temperature, 0.05);
    assert_ne!(engine.resolve(&ctx(OrparPhase::Action).with_task("t2")).temperature, 0.05);
    assert_ne!(engine.resolve(&ctx(OrparPhase::Action)).temperature, 0.05);
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

#[test]
fn scenario_temperature_is_clamped_to_governance() {
    let engine = engine();
    govern(
        &engine,
        GovernanceConfig {
            max_temperature: Some(1.0),
            ..Default::default()
        },
    );
    let decision = ask(&engine, None, OrparPhase::Reasoning, temp(2.5), OverrideScope::Session);
    assert_eq!(decision.status, OverrideStatus::Modified);
    assert_eq!(decision.active_params.temperature, 1.0);
    assert_eq!(engine.resolve(&ctx(OrparPhase::Reasoning)).temperature, 1.0);
}

#[test]
fn scenario_second_request_exceeds_task_budget() {
    let engine = engine();
    govern(
        &engine,
        GovernanceConfig {
            max_cost_per_task: Some(0.75),
            ..Default::default()
        },
    );
    let pricey = || PartialProfile::default().with_model("pricey");

    let first = ask(
        &engine,
        Some("t1"),
        OrparPhase::Reasoning,
        pricey(),
        OverrideScope::CurrentPhase,
    );
    assert_eq!(first.status, OverrideStatus::Approved);
    assert!((first.cost_delta - 0.50).abs() < 1e-9);

    let second = ask(
        &engine,
        Some("t1"),
        OrparPhase::Planning,
        pricey(),
        OverrideScope::CurrentPhase,
    );
    assert_eq!(second.status, OverrideStatus::Denied);
    assert!(second.rationale.unwrap().contains("Per-task"));
    assert_eq!(second.cost_delta, 0.0);

    let tracker = engine.request_tracker("agent-1", "chan-1", Some("t1")).unwrap();
    assert_eq!(tracker.total_requests, 1);
    assert!((tracker.total_cost - 0.50).abs() < 1e-9);
}

#[test]
fn rate_limit_admits_exactly_the_maximum() {
    let engine = engine();
    govern(
        &engine,
        GovernanceConfig {
            max_requests_per_phase: Some(2),
            ..Default::default()
        },
    );
    for _ in 0..2 {
        let d = ask(&engine, Some("t1"), OrparPhase::Action, temp(0.1), OverrideScope::Task);
        assert_eq!(d.status, OverrideStatus::Approved);
    }
    let third = ask(&engine, Some("t1"), OrparPhase::Action, temp(0.1), OverrideScope::Task);
    assert_eq!(third.status, OverrideStatus::Denied);
    assert!(third.rationale.unwrap().starts_with("Rate limit exceeded"));

    // Another phase has its own counter.
    let other = ask(&engine, Some("t1"), OrparPhase::Planning, temp(0.1), OverrideScope::Task);
    assert_eq!(other.status, OverrideStatus::Approved);
}

#[test]
fn task_rate_limit_counts_across_phases() {
    let engine = engine();
    govern(
        &engine,
        GovernanceConfig {
            max_requests_per_task: Some(2),
            ..Default::default()
        },
    );
    for phase in [OrparPhase::Observation, OrparPhase::Reasoning] {
        let d = ask(&engine, Some("t1"), phase, temp(0.1), OverrideScope::Task);
        assert_eq!(d.status, OverrideStatus::Approved);
    }
    let third = ask(&engine, Some("t1"), OrparPhase::Planning, temp(0.1), OverrideScope::Task);
    assert_eq!(third.status, OverrideStatus::Denied);
    assert!(third.rationale.unwrap().contains("per task"));
    assert_eq!(third.cost_delta, 0.0);

    // A different task is tracked separately.
    let other = ask(&engine, Some("t2"), OrparPhase::Planning, temp(0.1), OverrideScope::Task);
    assert_eq!(other.status, OverrideStatus::Approved);
}

#[test]
fn per_call_limit_is_inclusive() {
    let pricey = PartialProfile::default().with_model("pricey");
    let at_limit = engine();
    govern(
        &at_limit,
        GovernanceConfig {
            max_cost_per_call: Some(0.50),
            ..Default::default()
        },
    );
    let decision = ask(
        &at_limit,
        None,
        OrparPhase::Action,
        pricey.clone(),
        OverrideScope::NextCall,
    );
    assert_eq!(decision.status, OverrideStatus::Approved);

    let below = engine();
    govern(
        &below,
        GovernanceConfig {
            max_cost_per_call: Some(0.49),
            ..Default::default()
        },
    );
    let decision = ask(&below, None, OrparPhase::Action, pricey, OverrideScope::NextCall);
    assert_eq!(decision.status, OverrideStatus::Denied);
    assert!(decision.rationale.unwrap().starts_with("Per-call cost limit exceeded"));
}

#[test]
fn disallowed_model_is_replaced_by_an_allowed_one() {
    let engine = engine();
    govern(
        &engine,
        GovernanceConfig {
            allowed_models: Some(vec!["claude-3-5-haiku-20241022".into()]),
            ..Default::default()
        },
    );
    let decision = ask(
        &engine,
        None,
        OrparPhase::Action,
        PartialProfile::default().with_model("pricey"),
        OverrideScope::Session,
    );
    assert_eq!(decision.status, OverrideStatus::Modified);
    assert_eq!(decision.active_params.model, "claude-3-5-haiku-20241022");
    assert!(decision.rationale.unwrap().contains("pricey"));
}

#[test]
fn unfixable_request_is_denied_without_state() {
    let engine = engine().with_validator(Arc::new(AlwaysViolatingValidator));
    let baseline = engine.resolve(&ctx(OrparPhase::Action));
    let decision = ask(
        &engine,
        Some("t1"),
        OrparPhase::Action,
        PartialProfile::default().with_model("pricey"),
        OverrideScope::Task,
    );

    assert_eq!(decision.status, OverrideStatus::Denied);
    let rationale = decision.rationale.unwrap();
    assert!(rationale.contains("cannot be adjusted to comply"));
    assert!(rationale.contains("model is under review"));
    assert_eq!(decision.cost_delta, 0.0);
    assert_eq!(decision.active_params, baseline);
    assert!(decision.override_id.is_none());

    let stats = engine.stats();
    assert_eq!(stats.request_trackers, 0);
    assert_eq!(stats.stored_overrides, 0);
    assert!(engine.active_overrides("agent-1", "chan-1").is_empty());
}

#[test]
fn budget_is_rechecked_after_modification() {
    let engine = engine();
    govern(
        &engine,
        GovernanceConfig {
            allowed_models: Some(vec!["pricey".into()]),
            max_cost_per_call: Some(0.40),
            ..Default::default()
        },
    );
    // "cheap" costs nothing, but the only allowed substitute costs $0.50.
    let decision = ask(
        &engine,
        Some("t1"),
        OrparPhase::Action,
        PartialProfile::default().with_model("cheap"),
        OverrideScope::Task,
    );

    assert_eq!(decision.status, OverrideStatus::Denied);
    assert!(decision
        .rationale
        .unwrap()
        .starts_with("Per-call cost limit exceeded"));
    assert_eq!(decision.cost_delta, 0.0);
    assert_eq!(engine.stats().request_trackers, 0);
    assert!(engine.active_overrides("agent-1", "chan-1").is_empty());
}

#[test]
fn agent_governance_takes_priority_over_system() {
    let engine = engine();
    govern(
        &engine,
        GovernanceConfig {
            max_temperature: Some(0.5),
            ..Default::default()
        },
    );
    engine
        .set_governance_config(
            GovernanceScope::Agent("agent-1".into()),
            GovernanceConfig {
                max_temperature: Some(1.5),
                ..Default::default()
            },
        )
        .unwrap();
    let decision = ask(&engine, None, OrparPhase::Action, temp(1.2), OverrideScope::Session);
    assert_eq!(decision.status, OverrideStatus::Approved);
}

#[test]
fn failing_estimator_is_an_error_and_leaves_no_state() {
    let engine =
        ParameterGovernanceEngine::default().with_cost_estimator(Arc::new(FailingEstimator));
    let result = engine.request_override(
        "agent-1",
        "chan-1",
        None,
        OrparPhase::Action,
        OverrideRequest::new(temp(0.1), "x", OverrideScope::Session),
    );
    assert!(matches!(result, Err(OrparError::Collaborator(_))));
    let stats = engine.stats();
    assert_eq!(stats.active_overrides, 0);
    assert_eq!(stats.request_trackers, 0);
}

#[test]
fn failing_validator_is_an_error_and_leaves_no_state() {
    let engine = engine().with_validator(Arc::new(FailingValidator));
    let result = engine.request_override(
        "agent-1",
        "chan-1",
        Some("t1"),
        OrparPhase::Reasoning,
        OverrideRequest::new(temp(0.2), "x", OverrideScope::Task),
    );
    assert!(matches!(result, Err(OrparError::Collaborator(_))));
    let stats = engine.stats();
    assert_eq!(stats.stored_overrides, 0);
    assert_eq!(stats.request_trackers, 0);
}

#[test]
fn decisions_and_resets_are_published() {
    let sink = Arc::new(RecordingSink::default());
    let engine = engine().with_event_sink(sink.clone());
    ask(&engine, None, OrparPhase::Action, temp(0.1), OverrideScope::Session);
    engine
        .reset_overrides("agent-1", "chan-1", ResetScope::All, None)
        .unwrap();
    assert_eq!(
        sink.kinds(),
        vec!["parameter_decision", "governance_analytics", "overrides_reset"]
    );
}

// ---------------------------------------------------------------------------
// Reset and lifecycle
// ---------------------------------------------------------------------------

#[test]
fn reset_scopes_are_filtered() {
    let engine = engine();
    ask(&engine, Some("t1"), OrparPhase::Action, temp(0.1), OverrideScope::Session);
    ask(&engine, Some("t1"), OrparPhase::Action, temp(0.2), OverrideScope::Task);
    ask(&engine, Some("t2"), OrparPhase::Action, temp(0.3), OverrideScope::Task);
    ask(&engine, None, OrparPhase::Action, temp(0.4), OverrideScope::CurrentPhase);

    let task = engine
        .reset_overrides("agent-1", "chan-1", ResetScope::Task, Some("t1"))
        .unwrap();
    assert_eq!(task.reset_count, 1);
    let session = engine
        .reset_overrides("agent-1", "chan-1", ResetScope::Session, None)
        .unwrap();
    assert_eq!(session.reset_count, 1);
    // Other pairs are untouched.
    let other = engine
        .reset_overrides("agent-2", "chan-1", ResetScope::All, None)
        .unwrap();
    assert_eq!(other.reset_count, 0);
    let rest = engine
        .reset_overrides("agent-1", "chan-1", ResetScope::All, None)
        .unwrap();
    assert_eq!(rest.reset_count, 2);
    assert!(engine.active_overrides("agent-1", "chan-1").is_empty());
}

#[test]
fn task_completion_reclaims_overrides_and_trackers() {
    let engine = engine();
    ask(&engine, Some("t1"), OrparPhase::Action, temp(0.1), OverrideScope::Task);
    ask(&engine, Some("t1"), OrparPhase::Action, temp(0.2), OverrideScope::Session);
    assert!(engine.request_tracker("agent-1", "chan-1", Some("t1")).is_some());

    assert_eq!(engine.on_task_completed("t1"), 1);
    assert!(engine.request_tracker("agent-1", "chan-1", Some("t1")).is_none());
    assert_eq!(engine.active_overrides("agent-1", "chan-1").len(), 1);
    // A second delivery is a no-op.
    assert_eq!(engine.on_task_completed("t1"), 0);
}

#[test]
fn agent_disconnect_reclaims_session_overrides() {
    let engine = engine();
    ask(&engine, None, OrparPhase::Action, temp(0.1), OverrideScope::Session);
    ask(&engine, None, OrparPhase::Action, temp(0.2), OverrideScope::CurrentPhase);
    assert_eq!(engine.on_agent_disconnected("agent-1"), 1);
    assert_eq!(engine.on_agent_disconnected("agent-1"), 0);
    assert_eq!(engine.active_overrides("agent-1", "chan-1").len(), 1);
}

#[test]
fn idle_trackers_are_swept() {
    let engine = engine();
    ask(&engine, None, OrparPhase::Action, temp(0.1), OverrideScope::Session);
    let report = engine.sweep_at(Utc::now() + Duration::hours(2));
    assert_eq!(report.idle_trackers, 1);
    assert_eq!(engine.stats().request_trackers, 0);
}

#[test]
fn usage_metrics_are_recorded_and_summarised() {
    let engine = engine();
    for (latency, success) in [(100, true), (300, false)] {
        engine
            .record_usage_metrics(UsageMetric {
                agent_id: "agent-1".into(),
                channel_id: "chan-1".into(),
                task_id: None,
                phase: OrparPhase::Reasoning,
                model: "claude-sonnet-4-20250514".into(),
                input_tokens: 1000,
                output_tokens: 500,
                reasoning_tokens: 0,
                latency_ms: latency,
                success,
                actual_cost: 0.01,
                timestamp: Utc::now(),
            })
            .unwrap();
    }
    let summary = engine.stats().usage_metrics;
    assert_eq!(summary.total_calls, 2);
    assert_eq!(summary.successful_calls, 1);
    assert_eq!(summary.total_tokens, 3000);
    assert!((summary.average_latency_ms - 200.0).abs() < 1e-9);
}
