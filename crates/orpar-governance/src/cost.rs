use orpar_core::{OrparError, OrparResult, PhaseParameterProfile};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Prices one model call. Implementations are expected to be local and fast.
pub trait CostEstimator: Send + Sync {
    /// Estimated USD cost of a call with the given token usage.
    fn estimate_cost(
        &self,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        reasoning_tokens: u32,
    ) -> OrparResult<f64>;
}

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price of one million prompt tokens.
    pub input_per_mtok: f64,
    /// Price of one million generated tokens.
    pub output_per_mtok: f64,
}

impl ModelPricing {
    /// Creates a price pair.
    pub const fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }
}

/// Per-model pricing table. Reasoning tokens are billed at the output rate.
///
/// Unknown models are priced with the fallback rate unless the table is
/// [`strict`](PricingTable::strict), in which case they are an error.
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<String, ModelPricing>,
    fallback: ModelPricing,
    strict: bool,
}

impl PricingTable {
    /// An empty table that prices every model at `fallback`.
    pub fn new(fallback: ModelPricing) -> Self {
        Self {
            prices: HashMap::new(),
            fallback,
            strict: false,
        }
    }

    /// Adds or replaces the price of `model`.
    pub fn with_price(mut self, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.prices.insert(model.into(), pricing);
        self
    }

    /// Fail on models missing from the table instead of using the fallback.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// The configured price of `model`. Names are matched exactly.
    pub fn pricing_for(&self, model: &str) -> Option<&ModelPricing> {
        self.prices.get(model)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new(ModelPricing::new(3.0, 15.0))
            .with_price("claude-3-5-haiku-20241022", ModelPricing::new(0.8, 4.0))
            .with_price("claude-sonnet-4-20250514", ModelPricing::new(3.0, 15.0))
            .with_price("claude-opus-4-20250514", ModelPricing::new(15.0, 75.0))
            .with_price("gpt-4o-mini", ModelPricing::new(0.15, 0.6))
            .with_price("gpt-4o", ModelPricing::new(2.5, 10.0))
            .with_price("meta-llama/llama-3.1-8b-instruct", ModelPricing::new(0.02, 0.05))
            .with_price("anthropic/claude-sonnet-4", ModelPricing::new(3.0, 15.0))
            .with_price("llama-3.1-8b-instant", ModelPricing::new(0.05, 0.08))
            .with_price("llama-3.3-70b-versatile", ModelPricing::new(0.59, 0.79))
    }
}

impl CostEstimator for PricingTable {
    fn estimate_cost(
        &self,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        reasoning_tokens: u32,
    ) -> OrparResult<f64> {
        let pricing = match self.pricing_for(model) {
            Some(p) => *p,
            None if self.strict => {
                return Err(OrparError::Collaborator(format!(
                    "no pricing configured for model '{model}'"
                )))
            }
            None => {
                tracing::debug!(model, "no pricing entry, using fallback rate");
                self.fallback
            }
        };
        let billed_output = f64::from(output_tokens) + f64::from(reasoning_tokens);
        Ok((f64::from(input_tokens) * pricing.input_per_mtok
            + billed_output * pricing.output_per_mtok)
            / 1_000_000.0)
    }
}

/// Cost of one call made with `profile`, assuming `assumed_input_tokens` of
/// prompt and half of the output budget actually used.
pub fn estimate_profile_cost(
    estimator: &dyn CostEstimator,
    profile: &PhaseParameterProfile,
    assumed_input_tokens: u32,
) -> OrparResult<f64> {
    let cost = estimator
        .estimate_cost(
            &profile.model,
            assumed_input_tokens,
            profile.max_output_tokens / 2,
            profile.reasoning_tokens,
        )
        .map_err(|e| match e {
            OrparError::Collaborator(msg) => OrparError::Collaborator(msg),
            other => OrparError::Collaborator(format!("cost estimation failed: {other}")),
        })?;
    if !cost.is_finite() || cost < 0.0 {
        return Err(OrparError::Collaborator(format!(
            "cost estimator returned invalid cost {cost} for model '{}'",
            profile.model
        )));
    }
    Ok(cost)
}
