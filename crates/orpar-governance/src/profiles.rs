use orpar_core::{LlmProvider, OrparPhase, PhaseParameterProfile};

/// Source of the system default profile for a provider and phase.
///
/// The lowest layer of every resolution. Implementations must be total: every
/// `(provider, phase)` pair yields a profile.
pub trait ProfileProvider: Send + Sync {
    /// The default profile for `phase` under `provider`.
    fn default_profile(&self, provider: LlmProvider, phase: OrparPhase) -> PhaseParameterProfile;
}

/// The built-in per-provider, per-phase profile table.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinProfiles;

impl ProfileProvider for BuiltinProfiles {
    fn default_profile(&self, provider: LlmProvider, phase: OrparPhase) -> PhaseParameterProfile {
        let models = ModelTiers::for_provider(provider);
        match phase {
            OrparPhase::Observation => observation_profile(&models),
            OrparPhase::Reasoning => reasoning_profile(&models),
            OrparPhase::Planning => planning_profile(&models),
            OrparPhase::Action => action_profile(&models),
            OrparPhase::Reflection => reflection_profile(&models),
        }
    }
}

/// Every phase profile for one provider, in cycle order.
pub fn default_profiles(provider: LlmProvider) -> Vec<(OrparPhase, PhaseParameterProfile)> {
    OrparPhase::ALL
        .into_iter()
        .map(|phase| (phase, BuiltinProfiles.default_profile(provider, phase)))
        .collect()
}

struct ModelTiers {
    fast: &'static str,
    strong: &'static str,
}

impl ModelTiers {
    fn for_provider(provider: LlmProvider) -> Self {
        match provider {
            LlmProvider::Claude => Self {
                fast: "claude-3-5-haiku-20241022",
                strong: "claude-sonnet-4-20250514",
            },
            LlmProvider::OpenAi => Self {
                fast: "gpt-4o-mini",
                strong: "gpt-4o",
            },
            LlmProvider::OpenRouter => Self {
                fast: "meta-llama/llama-3.1-8b-instruct",
                strong: "anthropic/claude-sonnet-4",
            },
            LlmProvider::Groq => Self {
                fast: "llama-3.1-8b-instant",
                strong: "llama-3.3-70b-versatile",
            },
        }
    }
}

// Observation and Action run on the fast tier.
fn observation_profile(models: &ModelTiers) -> PhaseParameterProfile {
    PhaseParameterProfile::new(models.fast, 0.3, 2000, 0)
}

fn reasoning_profile(models: &ModelTiers) -> PhaseParameterProfile {
    PhaseParameterProfile::new(models.strong, 0.5, 4000, 8000)
}

fn planning_profile(models: &ModelTiers) -> PhaseParameterProfile {
    PhaseParameterProfile::new(models.strong, 0.4, 4000, 4000)
}

fn action_profile(models: &ModelTiers) -> PhaseParameterProfile {
    PhaseParameterProfile::new(models.fast, 0.2, 2000, 0)
}

fn reflection_profile(models: &ModelTiers) -> PhaseParameterProfile {
    PhaseParameterProfile::new(models.strong, 0.6, 3000, 2000)
}
