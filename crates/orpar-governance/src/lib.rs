//! Inference parameter resolution and governance for ORPAR agents.
//!
//! Resolves the parameter profile an agent uses for each model call by
//! layering system defaults, channel and agent configuration, task
//! overrides, and agent-requested overrides. Override requests pass through
//! rate limits, cost budgets, and governance bounds before they are admitted,
//! and lifecycle events reclaim overrides when their scope ends.
//!
//! # Main types
//!
//! - [`ParameterGovernanceEngine`] — Owns override and tracker state; resolves and admits.
//! - [`ParameterResolutionContext`] — Inputs for one resolution.
//! - [`OverrideRequest`] / [`OverrideDecision`] — Admission request and outcome.
//! - [`GovernanceConfig`] — Bounds, allow-lists, rate limits, and budgets.
//! - [`LifecycleManager`] — Periodic sweep plus lifecycle-event subscription.
//! - [`GovernanceTools`] — Agent-facing tool handlers.

/// Override admission: rate, budget, and policy checks.
pub mod admission;
/// Engine configuration loaded from TOML.
pub mod config;
/// Cost estimation for parameter profiles.
pub mod cost;
/// The governance engine and its state.
pub mod engine;
/// Decision and analytics events and their sinks.
pub mod events;
/// Lifecycle events, reset, sweep, and the background manager.
pub mod lifecycle;
/// Usage metrics ledger.
pub mod metrics;
/// Override records and the override store.
pub mod overrides;
/// Built-in per-phase default profiles.
pub mod profiles;
/// Layered parameter resolution.
pub mod resolver;
/// Agent-facing governance tools.
pub mod tools;
/// Per agent/channel/task request counters.
pub mod tracker;
/// Governance bounds and profile validation.
pub mod validator;

pub use admission::{OverrideDecision, OverrideRequest, OverrideStatus};
pub use config::{
    AgentParameterConfig, ChannelDefaults, GovernanceEngineConfig, GovernanceScope, PhaseProfiles,
    TtlConfig,
};
pub use cost::{CostEstimator, ModelPricing, PricingTable};
pub use engine::{EngineStats, ParameterGovernanceEngine};
pub use events::{
    ChannelEventSink, EventSink, EventSinkChain, GovernanceEvent, ParameterDecisionRecord,
    TracingEventSink,
};
pub use lifecycle::{
    AgentDisconnected, LifecycleBus, LifecycleEvent, LifecycleManager, PhaseCompleted,
    ResetOutcome, ResetScope, SweepReport, TaskCompleted,
};
pub use metrics::{UsageMetric, UsageMetricFilter, UsageSummary};
pub use overrides::{OverrideScope, ParameterOverrideState};
pub use profiles::{default_profiles, BuiltinProfiles, ProfileProvider};
pub use resolver::{ParameterResolutionContext, Resolution};
pub use tools::{GovernanceTools, ToolContext, ToolDescriptor};
pub use tracker::{RequestTracker, TrackerKey};
pub use validator::{BoundsValidator, GovernanceConfig, GovernanceValidator, ValidationOutcome};
