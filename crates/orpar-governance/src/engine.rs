use crate::config::{
    AgentParameterConfig, ChannelDefaults, GovernanceEngineConfig, GovernanceScope,
};
use crate::cost::{estimate_profile_cost, CostEstimator, PricingTable};
use crate::events::{EventSink, TracingEventSink};
use crate::metrics::{UsageLedger, UsageMetric, UsageMetricFilter, UsageSummary};
use crate::overrides::{OverrideStore, ParameterOverrideState};
use crate::profiles::{BuiltinProfiles, ProfileProvider};
use crate::tracker::{RequestTracker, RequestTrackerStore, TrackerKey};
use crate::validator::{BoundsValidator, GovernanceConfig, GovernanceValidator};
use chrono::Utc;
use orpar_core::{require_id, LlmProvider, OrparResult, PhaseParameterProfile};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Operational snapshot returned by [`ParameterGovernanceEngine::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    /// Overrides that would still apply to a resolution.
    pub active_overrides: usize,
    /// Includes expired and consumed overrides not yet swept.
    pub stored_overrides: usize,
    /// Live request trackers, one per agent/channel/task key.
    pub request_trackers: usize,
    /// Cached agent configurations.
    pub agent_configs: usize,
    /// Cached channel defaults.
    pub channel_defaults: usize,
    /// Summary over the retained usage history.
    pub usage_metrics: UsageSummary,
}

#[derive(Debug, Default)]
struct GovernanceCache {
    system: GovernanceConfig,
    agents: HashMap<String, GovernanceConfig>,
    channels: HashMap<String, GovernanceConfig>,
}

impl GovernanceCache {
    fn seeded(config: &GovernanceEngineConfig) -> Self {
        Self {
            system: config.governance.system.clone(),
            agents: config.governance.agents.clone(),
            channels: config.governance.channels.clone(),
        }
    }
}

/// Resolves effective inference parameters and governs runtime overrides.
///
/// One instance owns its override store, request trackers, configuration
/// caches, and usage history. Construct it explicitly and share it behind an
/// `Arc`; there is no global instance.
pub struct ParameterGovernanceEngine {
    pub(crate) config: GovernanceEngineConfig,
    pub(crate) profiles: Arc<dyn ProfileProvider>,
    pub(crate) cost: Arc<dyn CostEstimator>,
    pub(crate) validator: Arc<dyn GovernanceValidator>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) overrides: OverrideStore,
    pub(crate) trackers: RequestTrackerStore,
    agent_configs: RwLock<HashMap<String, AgentParameterConfig>>,
    channel_defaults: RwLock<HashMap<String, ChannelDefaults>>,
    governance: RwLock<GovernanceCache>,
    usage: UsageLedger,
}

impl ParameterGovernanceEngine {
    /// Creates an engine with the built-in profile table, pricing table,
    /// bounds validator, and a tracing event sink. Caches are seeded from
    /// `config`.
    pub fn new(config: GovernanceEngineConfig) -> Self {
        Self {
            profiles: Arc::new(BuiltinProfiles),
            cost: Arc::new(PricingTable::default()),
            validator: Arc::new(BoundsValidator),
            events: Arc::new(TracingEventSink),
            overrides: OverrideStore::new(),
            trackers: RequestTrackerStore::new(),
            agent_configs: RwLock::new(config.agents.clone()),
            channel_defaults: RwLock::new(config.channels.clone()),
            governance: RwLock::new(GovernanceCache::seeded(&config)),
            usage: UsageLedger::new(config.usage_history_limit),
            config,
        }
    }

    /// Replaces the default-profile table.
    pub fn with_profile_provider(mut self, profiles: Arc<dyn ProfileProvider>) -> Self {
        self.profiles = profiles;
        self
    }

    /// Replaces the pricing table used for cost deltas.
    pub fn with_cost_estimator(mut self, cost: Arc<dyn CostEstimator>) -> Self {
        self.cost = cost;
        self
    }

    /// Replaces the governance validator.
    pub fn with_validator(mut self, validator: Arc<dyn GovernanceValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Replaces the sink that receives decision, analytics and reset events.
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The configuration this engine was built from.
    pub fn config(&self) -> &GovernanceEngineConfig {
        &self.config
    }

    // --- Configuration caches ---

    /// Cached configuration for `agent_id`, if any.
    pub fn agent_config(&self, agent_id: &str) -> Option<AgentParameterConfig> {
        self.agent_configs.read().get(agent_id).cloned()
    }

    /// Inserts or replaces the cached configuration for `agent_id`.
    pub fn set_agent_config(
        &self,
        agent_id: &str,
        config: AgentParameterConfig,
    ) -> OrparResult<()> {
        require_id("agent_id", agent_id)?;
        self.agent_configs.write().insert(agent_id.to_string(), config);
        Ok(())
    }

    /// Cached defaults for `channel_id`, if any.
    pub fn channel_defaults(&self, channel_id: &str) -> Option<ChannelDefaults> {
        self.channel_defaults.read().get(channel_id).cloned()
    }

    /// Inserts or replaces the cached defaults for `channel_id`.
    pub fn set_channel_defaults(
        &self,
        channel_id: &str,
        defaults: ChannelDefaults,
    ) -> OrparResult<()> {
        require_id("channel_id", channel_id)?;
        self.channel_defaults
            .write()
            .insert(channel_id.to_string(), defaults);
        Ok(())
    }

    /// The governance entry attached at exactly `scope`, if any.
    pub fn governance_config(&self, scope: &GovernanceScope) -> Option<GovernanceConfig> {
        let cache = self.governance.read();
        match scope {
            GovernanceScope::System => Some(cache.system.clone()),
            GovernanceScope::Agent(id) => cache.agents.get(id).cloned(),
            GovernanceScope::Channel(id) => cache.channels.get(id).cloned(),
        }
    }

    /// Checks and stores a governance entry at `scope`.
    pub fn set_governance_config(
        &self,
        scope: GovernanceScope,
        governance: GovernanceConfig,
    ) -> OrparResult<()> {
        governance.check()?;
        let mut cache = self.governance.write();
        match scope {
            GovernanceScope::System => cache.system = governance,
            GovernanceScope::Agent(id) => {
                require_id("agent_id", &id)?;
                cache.agents.insert(id, governance);
            }
            GovernanceScope::Channel(id) => {
                require_id("channel_id", &id)?;
                cache.channels.insert(id, governance);
            }
        }
        Ok(())
    }

    /// Agent-specific governance, else channel-specific, else the system default.
    pub fn effective_governance(&self, agent_id: &str, channel_id: &str) -> GovernanceConfig {
        let cache = self.governance.read();
        cache
            .agents
            .get(agent_id)
            .or_else(|| cache.channels.get(channel_id))
            .unwrap_or(&cache.system)
            .clone()
    }

    pub(crate) fn provider_for(&self, agent: Option<&AgentParameterConfig>) -> LlmProvider {
        agent
            .and_then(|a| a.provider)
            .unwrap_or(self.config.default_provider)
    }

    pub(crate) fn profile_cost(&self, profile: &PhaseParameterProfile) -> OrparResult<f64> {
        estimate_profile_cost(self.cost.as_ref(), profile, self.config.assumed_input_tokens)
    }

    // --- Introspection ---

    /// Live overrides for one agent/channel pair, oldest first.
    pub fn active_overrides(
        &self,
        agent_id: &str,
        channel_id: &str,
    ) -> Vec<ParameterOverrideState> {
        self.overrides.list_active(agent_id, channel_id, Utc::now())
    }

    /// Snapshot of the request tracker for one key, if it exists.
    pub fn request_tracker(
        &self,
        agent_id: &str,
        channel_id: &str,
        task_id: Option<&str>,
    ) -> Option<RequestTracker> {
        self.trackers
            .get(&TrackerKey::new(agent_id, channel_id, task_id))
    }

    /// Counts of live state plus the usage summary.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            active_overrides: self.overrides.count_active(Utc::now()),
            stored_overrides: self.overrides.len(),
            request_trackers: self.trackers.len(),
            agent_configs: self.agent_configs.read().len(),
            channel_defaults: self.channel_defaults.read().len(),
            usage_metrics: self.usage.summary(),
        }
    }

    /// Records the outcome of a completed model call.
    pub fn record_usage_metrics(&self, metric: UsageMetric) -> OrparResult<()> {
        require_id("agent_id", &metric.agent_id)?;
        require_id("channel_id", &metric.channel_id)?;
        self.usage.record(metric);
        Ok(())
    }

    /// Retained usage metrics matching `filter`, oldest first.
    pub fn usage_metrics(&self, filter: &UsageMetricFilter) -> Vec<UsageMetric> {
        self.usage.query(filter)
    }

    /// Drops overrides, trackers and usage history, and reseeds the
    /// configuration caches from [`config`](Self::config).
    ///
    /// Entries added at runtime through the `set_*` methods are discarded;
    /// everything loaded from the engine configuration is restored.
    pub fn clear_state(&self) {
        self.overrides.clear();
        self.trackers.clear();
        self.usage.clear();
        *self.agent_configs.write() = self.config.agents.clone();
        *self.channel_defaults.write() = self.config.channels.clone();
        *self.governance.write() = GovernanceCache::seeded(&self.config);
    }
}

impl Default for ParameterGovernanceEngine {
    fn default() -> Self {
        Self::new(GovernanceEngineConfig::default())
    }
}
