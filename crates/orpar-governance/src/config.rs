use crate::overrides::OverrideScope;
use crate::validator::GovernanceConfig;
use orpar_core::{LlmProvider, OrparError, OrparPhase, OrparResult, PartialProfile};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Per-phase partial profiles. Unset phases contribute nothing to resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseProfiles {
    /// Observation phase profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<PartialProfile>,
    /// Reasoning phase profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<PartialProfile>,
    /// Planning phase profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planning: Option<PartialProfile>,
    /// Action phase profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<PartialProfile>,
    /// Reflection phase profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection: Option<PartialProfile>,
}

impl PhaseProfiles {
    /// The partial profile configured for `phase`, if any.
    pub fn get(&self, phase: OrparPhase) -> Option<&PartialProfile> {
        match phase {
            OrparPhase::Observation => self.observation.as_ref(),
            OrparPhase::Reasoning => self.reasoning.as_ref(),
            OrparPhase::Planning => self.planning.as_ref(),
            OrparPhase::Action => self.action.as_ref(),
            OrparPhase::Reflection => self.reflection.as_ref(),
        }
    }

    /// Replaces the partial profile for `phase`.
    pub fn set(&mut self, phase: OrparPhase, partial: PartialProfile) {
        let slot = match phase {
            OrparPhase::Observation => &mut self.observation,
            OrparPhase::Reasoning => &mut self.reasoning,
            OrparPhase::Planning => &mut self.planning,
            OrparPhase::Action => &mut self.action,
            OrparPhase::Reflection => &mut self.reflection,
        };
        *slot = Some(partial);
    }

    /// Builder form of [`set`](Self::set).
    pub fn with_phase(mut self, phase: OrparPhase, partial: PartialProfile) -> Self {
        self.set(phase, partial);
        self
    }

    fn check(&self) -> OrparResult<()> {
        for phase in OrparPhase::ALL {
            if let Some(partial) = self.get(phase) {
                partial.check_well_formed().map_err(|e| {
                    OrparError::Config(format!("invalid {phase} profile: {e}"))
                })?;
            }
        }
        Ok(())
    }
}

/// Agent-level parameter configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentParameterConfig {
    /// Provider whose default table this agent resolves against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<LlmProvider>,
    /// Per-phase layers applied above the channel defaults.
    #[serde(default)]
    pub phases: PhaseProfiles,
}

/// Channel-level parameter defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelDefaults {
    /// Per-phase layers applied above the built-in defaults.
    #[serde(default)]
    pub phases: PhaseProfiles,
}

/// Where a [`GovernanceConfig`] is attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "lowercase")]
pub enum GovernanceScope {
    /// Applies when neither the agent nor the channel has an entry.
    System,
    /// Applies to one agent id.
    Agent(String),
    /// Applies to one channel id.
    Channel(String),
}

/// Governance tables: one system default plus per-agent and per-channel entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernanceTables {
    /// Fallback governance.
    #[serde(default)]
    pub system: GovernanceConfig,
    /// Keyed by agent id.
    #[serde(default)]
    pub agents: HashMap<String, GovernanceConfig>,
    /// Keyed by channel id.
    #[serde(default)]
    pub channels: HashMap<String, GovernanceConfig>,
}

/// Override lifetimes in seconds, per scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlConfig {
    /// Lifetime of a `next_call` override that is never used.
    #[serde(default = "default_next_call_ttl")]
    pub next_call_secs: u64,
    /// Lifetime of a `current_phase` override.
    #[serde(default = "default_current_phase_ttl")]
    pub current_phase_secs: u64,
    /// Lifetime of a `task` override.
    #[serde(default = "default_task_ttl")]
    pub task_secs: u64,
    /// Ceiling only; sessions normally end with the disconnect event.
    #[serde(default = "default_session_ttl")]
    pub session_secs: u64,
}

impl TtlConfig {
    /// Lifetime of an override granted at `scope`.
    pub fn for_scope(&self, scope: OverrideScope) -> chrono::Duration {
        let secs = match scope {
            OverrideScope::NextCall => self.next_call_secs,
            OverrideScope::CurrentPhase => self.current_phase_secs,
            OverrideScope::Task => self.task_secs,
            OverrideScope::Session => self.session_secs,
        };
        seconds(secs)
    }
}

/// Upper bound for any configured duration: ten years.
const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            next_call_secs: default_next_call_ttl(),
            current_phase_secs: default_current_phase_ttl(),
            task_secs: default_task_ttl(),
            session_secs: default_session_ttl(),
        }
    }
}

fn default_next_call_ttl() -> u64 {
    5 * 60
}

fn default_current_phase_ttl() -> u64 {
    30 * 60
}

fn default_task_ttl() -> u64 {
    60 * 60
}

fn default_session_ttl() -> u64 {
    24 * 60 * 60
}

/// Top-level engine configuration, typically loaded from `orpar.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceEngineConfig {
    /// Provider used when an agent does not name one.
    #[serde(default)]
    pub default_provider: LlmProvider,
    /// Period of the background sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Trackers idle for longer than this are reclaimed.
    #[serde(default = "default_tracker_idle_secs")]
    pub tracker_idle_secs: u64,
    /// Maximum number of usage metrics retained.
    #[serde(default = "default_usage_history_limit")]
    pub usage_history_limit: usize,
    /// Prompt size assumed when estimating the cost of a profile.
    #[serde(default = "default_assumed_input_tokens")]
    pub assumed_input_tokens: u32,
    /// Override lifetimes.
    #[serde(default)]
    pub ttl: TtlConfig,
    /// Governance tables loaded at startup.
    #[serde(default)]
    pub governance: GovernanceTables,
    /// Agent configurations, keyed by agent id.
    #[serde(default)]
    pub agents: HashMap<String, AgentParameterConfig>,
    /// Channel defaults, keyed by channel id.
    #[serde(default)]
    pub channels: HashMap<String, ChannelDefaults>,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_tracker_idle_secs() -> u64 {
    60 * 60
}

fn default_usage_history_limit() -> usize {
    10_000
}

fn default_assumed_input_tokens() -> u32 {
    2000
}

impl Default for GovernanceEngineConfig {
    fn default() -> Self {
        Self {
            default_provider: LlmProvider::default(),
            sweep_interval_secs: default_sweep_interval_secs(),
            tracker_idle_secs: default_tracker_idle_secs(),
            usage_history_limit: default_usage_history_limit(),
            assumed_input_tokens: default_assumed_input_tokens(),
            ttl: TtlConfig::default(),
            governance: GovernanceTables::default(),
            agents: HashMap::new(),
            channels: HashMap::new(),
        }
    }
}

impl GovernanceEngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> OrparResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> OrparResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            OrparError::Config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Rejects zero or out-of-range durations and inconsistent governance or
    /// profiles.
    pub fn validate(&self) -> OrparResult<()> {
        if self.sweep_interval_secs == 0 {
            return Err(OrparError::Config("sweep_interval_secs must be positive".into()));
        }
        if self.tracker_idle_secs == 0 {
            return Err(OrparError::Config("tracker_idle_secs must be positive".into()));
        }
        if self.usage_history_limit == 0 {
            return Err(OrparError::Config("usage_history_limit must be positive".into()));
        }
        let ttl = &self.ttl;
        if [ttl.next_call_secs, ttl.current_phase_secs, ttl.task_secs, ttl.session_secs]
            .contains(&0)
        {
            return Err(OrparError::Config("every ttl must be positive".into()));
        }
        if [
            ttl.next_call_secs,
            ttl.current_phase_secs,
            ttl.task_secs,
            ttl.session_secs,
            self.tracker_idle_secs,
            self.sweep_interval_secs,
        ]
        .iter()
        .any(|secs| *secs > MAX_DURATION_SECS)
        {
            return Err(OrparError::Config(format!(
                "durations must not exceed {MAX_DURATION_SECS} seconds"
            )));
        }

        self.governance.system.check()?;
        for (id, governance) in &self.governance.agents {
            governance
                .check()
                .map_err(|e| OrparError::Config(format!("agent '{id}' governance: {e}")))?;
        }
        for (id, governance) in &self.governance.channels {
            governance
                .check()
                .map_err(|e| OrparError::Config(format!("channel '{id}' governance: {e}")))?;
        }
        for (id, agent) in &self.agents {
            agent
                .phases
                .check()
                .map_err(|e| OrparError::Config(format!("agent '{id}': {e}")))?;
        }
        for (id, channel) in &self.channels {
            channel
                .phases
                .check()
                .map_err(|e| OrparError::Config(format!("channel '{id}': {e}")))?;
        }
        Ok(())
    }

    /// [`tracker_idle_secs`](Self::tracker_idle_secs) as a duration.
    pub fn tracker_idle(&self) -> chrono::Duration {
        seconds(self.tracker_idle_secs)
    }

    /// [`sweep_interval_secs`](Self::sweep_interval_secs) as a duration.
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}
