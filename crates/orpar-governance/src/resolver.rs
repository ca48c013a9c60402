use crate::config::{AgentParameterConfig, ChannelDefaults};
use crate::engine::ParameterGovernanceEngine;
use crate::overrides::{OverrideScope, ParameterOverrideState};
use chrono::{DateTime, Utc};
use orpar_core::{OrparPhase, PartialProfile, PhaseParameterProfile};
use serde::{Deserialize, Serialize};

/// Input to a resolution.
///
/// `task_overrides`, `agent_config`, and `channel_defaults` may be supplied
/// by a caller that already holds them; otherwise the engine's caches are
/// consulted by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterResolutionContext {
    /// Agent the call is made for.
    pub agent_id: String,
    /// Channel the call is made in.
    pub channel_id: String,
    /// Phase being executed.
    pub phase: OrparPhase,
    /// Current task, if any.
    #[serde(default)]
    pub task_id: Option<String>,
    /// Task-level layer, applied above the agent config.
    #[serde(default)]
    pub task_overrides: Option<PartialProfile>,
    /// Used instead of the cached agent config.
    #[serde(default)]
    pub agent_config: Option<AgentParameterConfig>,
    /// Used instead of the cached channel defaults.
    #[serde(default)]
    pub channel_defaults: Option<ChannelDefaults>,
}

impl ParameterResolutionContext {
    /// A context with no task and no caller-supplied layers.
    pub fn new(
        agent_id: impl Into<String>,
        channel_id: impl Into<String>,
        phase: OrparPhase,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            channel_id: channel_id.into(),
            phase,
            task_id: None,
            task_overrides: None,
            agent_config: None,
            channel_defaults: None,
        }
    }

    /// Sets the task id.
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Sets the task-level layer.
    pub fn with_task_overrides(mut self, overrides: PartialProfile) -> Self {
        self.task_overrides = Some(overrides);
        self
    }

    /// Supplies the agent config directly.
    pub fn with_agent_config(mut self, config: AgentParameterConfig) -> Self {
        self.agent_config = Some(config);
        self
    }

    /// Supplies the channel defaults directly.
    pub fn with_channel_defaults(mut self, defaults: ChannelDefaults) -> Self {
        self.channel_defaults = Some(defaults);
        self
    }
}

/// A resolved profile plus the override that shaped it, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    /// The effective parameters.
    pub profile: PhaseParameterProfile,
    /// The override layered on top, if one applied.
    pub applied_override: Option<ParameterOverrideState>,
}

impl ParameterGovernanceEngine {
    /// Effective parameters for the next model call in `context`.
    ///
    /// A matching `next_call` override is consumed by this call.
    pub fn resolve(&self, context: &ParameterResolutionContext) -> PhaseParameterProfile {
        self.resolve_at(context, Utc::now()).profile
    }

    /// [`resolve`](Self::resolve) evaluated at `now`.
    pub fn resolve_at(
        &self,
        context: &ParameterResolutionContext,
        now: DateTime<Utc>,
    ) -> Resolution {
        self.resolve_inner(context, now, true)
    }

    /// Resolves without consuming a pending `next_call` override.
    pub fn preview(&self, context: &ParameterResolutionContext) -> Resolution {
        self.resolve_inner(context, Utc::now(), false)
    }

    pub(crate) fn resolve_inner(
        &self,
        context: &ParameterResolutionContext,
        now: DateTime<Utc>,
        consume: bool,
    ) -> Resolution {
        let phase = context.phase;

        let cached_agent;
        let agent = match &context.agent_config {
            Some(config) => Some(config),
            None => {
                cached_agent = self.agent_config(&context.agent_id);
                cached_agent.as_ref()
            }
        };
        let cached_channel;
        let channel = match &context.channel_defaults {
            Some(defaults) => Some(defaults),
            None => {
                cached_channel = self.channel_defaults(&context.channel_id);
                cached_channel.as_ref()
            }
        };

        // Lowest to highest precedence; each layer only sets the fields it defines.
        let mut profile = self
            .profiles
            .default_profile(self.provider_for(agent), phase);
        if let Some(partial) = channel.and_then(|c| c.phases.get(phase)) {
            profile.apply(partial);
        }
        if let Some(partial) = agent.and_then(|a| a.phases.get(phase)) {
            profile.apply(partial);
        }
        if let Some(partial) = &context.task_overrides {
            profile.apply(partial);
        }

        let applied_override = self.overrides.best_match(
            &context.agent_id,
            &context.channel_id,
            phase,
            context.task_id.as_deref(),
            now,
            consume,
        );
        if let Some(applied) = &applied_override {
            profile.apply(&applied.params);
            if consume && applied.scope == OverrideScope::NextCall {
                tracing::debug!(
                    override_id = %applied.id,
                    agent_id = %context.agent_id,
                    "next_call override consumed"
                );
            }
        }

        Resolution {
            profile,
            applied_override,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{GovernanceEngineConfig, PhaseProfiles};
    use crate::profiles::{BuiltinProfiles, ProfileProvider};
    use orpar_core::LlmProvider;

    fn default_reasoning() -> PhaseParameterProfile {
        BuiltinProfiles.default_profile(LlmProvider::Claude, OrparPhase::Reasoning)
    }

    #[test]
    fn test_no_layers_yields_provider_default() {
        let engine = ParameterGovernanceEngine::default();
        let ctx = ParameterResolutionContext::new("a", "c", OrparPhase::Reasoning);
        assert_eq!(engine.resolve(&ctx), default_reasoning());
    }

    #[test]
    fn test_layers_apply_in_precedence_order() {
        let engine = ParameterGovernanceEngine::default();
        engine
            .set_channel_defaults(
                "c",
                ChannelDefaults {
                    phases: PhaseProfiles::default().with_phase(
                        OrparPhase::Reasoning,
                        PartialProfile::default()
                            .with_temperature(0.1)
                            .with_max_output_tokens(1111)
                            .with_reasoning_tokens(100),
                    ),
                },
            )
            .unwrap();
        engine
            .set_agent_config(
                "a",
                AgentParameterConfig {
                    provider: None,
                    phases: PhaseProfiles::default().with_phase(
                        OrparPhase::Reasoning,
                        PartialProfile::default()
                            .with_temperature(0.2)
                            .with_max_output_tokens(2222),
                    ),
                },
            )
            .unwrap();

        let ctx = ParameterResolutionContext::new("a", "c", OrparPhase::Reasoning)
            .with_task_overrides(PartialProfile::default().with_temperature(0.3));
        let profile = engine.resolve(&ctx);

        assert_eq!(profile.temperature, 0.3); // task
        assert_eq!(profile.max_output_tokens, 2222); // agent
        assert_eq!(profile.reasoning_tokens, 100); // channel
        assert_eq!(profile.model, default_reasoning().model); // default
    }

    #[test]
    fn test_agent_provider_selects_default_table() {
        let engine = ParameterGovernanceEngine::default();
        let ctx = ParameterResolutionContext::new("a", "c", OrparPhase::Action).with_agent_config(
            AgentParameterConfig {
                provider: Some(LlmProvider::Groq),
                phases: PhaseProfiles::default(),
            },
        );
        let expected = BuiltinProfiles.default_profile(LlmProvider::Groq, OrparPhase::Action);
        assert_eq!(engine.resolve(&ctx), expected);
    }

    #[test]
    fn test_config_default_provider_used_without_agent_config() {
        let config = GovernanceEngineConfig {
            default_provider: LlmProvider::OpenAi,
            ..Default::default()
        };
        let engine = ParameterGovernanceEngine::new(config);
        let ctx = ParameterResolutionContext::new("a", "c", OrparPhase::Planning);
        assert_eq!(engine.resolve(&ctx).model, "gpt-4o");
    }

    #[test]
    fn test_explicit_context_config_bypasses_cache() {
        let engine = ParameterGovernanceEngine::default();
        engine
            .set_agent_config(
                "a",
                AgentParameterConfig {
                    provider: None,
                    phases: PhaseProfiles::default().with_phase(
                        OrparPhase::Action,
                        PartialProfile::default().with_temperature(0.9),
                    ),
                },
            )
            .unwrap();
        let ctx = ParameterResolutionContext::new("a", "c", OrparPhase::Action)
            .with_agent_config(AgentParameterConfig::default());
        let expected = BuiltinProfiles.default_profile(LlmProvider::Claude, OrparPhase::Action);
        assert_eq!(engine.resolve(&ctx).temperature, expected.temperature);
    }
}
