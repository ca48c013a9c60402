use orpar_core::{OrparError, OrparResult, PhaseParameterProfile};
use serde::{Deserialize, Serialize};

/// Bounds and allow-lists constraining the parameters an agent may run with.
///
/// Every bound is optional; an absent bound is unconstrained. An empty
/// `allowed_models` list is treated the same as an absent one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Lowest allowed temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_temperature: Option<f32>,
    /// Highest allowed temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_temperature: Option<f32>,
    /// Largest allowed reasoning budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reasoning_tokens: Option<u32>,
    /// Largest allowed output token cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Models an override may select.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_models: Option<Vec<String>>,
    /// Requests admitted per phase, per tracker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests_per_phase: Option<u32>,
    /// Requests admitted per tracker across phases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests_per_task: Option<u32>,
    /// Largest cost increase one override may introduce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_per_call: Option<f64>,
    /// Largest accumulated cost increase per tracker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_per_task: Option<f64>,
}

impl GovernanceConfig {
    /// The allow-list, if one is in force.
    pub fn allow_list(&self) -> Option<&[String]> {
        self.allowed_models
            .as_deref()
            .filter(|models| !models.is_empty())
    }

    /// True when no allow-list is in force or `model` is on it.
    pub fn allows_model(&self, model: &str) -> bool {
        self.allow_list()
            .map_or(true, |models| models.iter().any(|m| m == model))
    }

    /// Rejects internally inconsistent bounds.
    pub fn check(&self) -> OrparResult<()> {
        for (name, value) in [
            ("min_temperature", self.min_temperature),
            ("max_temperature", self.max_temperature),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(OrparError::Config(format!(
                        "{name} must be a finite non-negative number, got {v}"
                    )));
                }
            }
        }
        if let (Some(min), Some(max)) = (self.min_temperature, self.max_temperature) {
            if min > max {
                return Err(OrparError::Config(format!(
                    "min_temperature {min} exceeds max_temperature {max}"
                )));
            }
        }
        for (name, value) in [
            ("max_cost_per_call", self.max_cost_per_call),
            ("max_cost_per_task", self.max_cost_per_task),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(OrparError::Config(format!(
                        "{name} must be a finite non-negative number, got {v}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Result of checking a profile against a [`GovernanceConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// True when there are no violations.
    pub valid: bool,
    /// One message per violated bound.
    pub violations: Vec<String>,
}

impl ValidationOutcome {
    /// Builds an outcome; valid exactly when `violations` is empty.
    pub fn from_violations(violations: Vec<String>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
        }
    }
}

/// Checks a resolved profile against governance bounds.
pub trait GovernanceValidator: Send + Sync {
    /// Lists every bound `profile` violates. An `Err` means the check itself
    /// could not run.
    fn validate(
        &self,
        profile: &PhaseParameterProfile,
        governance: &GovernanceConfig,
    ) -> OrparResult<ValidationOutcome>;
}

/// Validator for the numeric bounds and model allow-list of [`GovernanceConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundsValidator;

impl GovernanceValidator for BoundsValidator {
    fn validate(
        &self,
        profile: &PhaseParameterProfile,
        governance: &GovernanceConfig,
    ) -> OrparResult<ValidationOutcome> {
        let mut violations = Vec::new();

        if let Some(min) = governance.min_temperature {
            if profile.temperature < min {
                violations.push(format!(
                    "temperature {} is below minimum {min}",
                    profile.temperature
                ));
            }
        }
        if let Some(max) = governance.max_temperature {
            if profile.temperature > max {
                violations.push(format!(
                    "temperature {} exceeds maximum {max}",
                    profile.temperature
                ));
            }
        }
        if let Some(max) = governance.max_reasoning_tokens {
            if profile.reasoning_tokens > max {
                violations.push(format!(
                    "reasoning tokens {} exceed maximum {max}",
                    profile.reasoning_tokens
                ));
            }
        }
        if let Some(max) = governance.max_output_tokens {
            if profile.max_output_tokens > max {
                violations.push(format!(
                    "max output tokens {} exceed maximum {max}",
                    profile.max_output_tokens
                ));
            }
        }
        if !governance.allows_model(&profile.model) {
            violations.push(format!("model '{}' is not in the allowed list", profile.model));
        }

        Ok(ValidationOutcome::from_violations(violations))
    }
}

/// Pulls `profile` into the governance bounds.
///
/// Numeric fields are clamped. A disallowed model is replaced with
/// `preferred_model` when the allow-list contains it, otherwise with the first
/// allowed model. Inconsistent bounds (min above max) leave the temperature at
/// the max bound; re-validation reports what is still wrong.
pub fn constrain(
    profile: &PhaseParameterProfile,
    governance: &GovernanceConfig,
    preferred_model: &str,
) -> PhaseParameterProfile {
    let mut constrained = profile.clone();

    if let Some(min) = governance.min_temperature {
        constrained.temperature = constrained.temperature.max(min);
    }
    if let Some(max) = governance.max_temperature {
        constrained.temperature = constrained.temperature.min(max);
    }
    if let Some(max) = governance.max_reasoning_tokens {
        constrained.reasoning_tokens = constrained.reasoning_tokens.min(max);
    }
    if let Some(max) = governance.max_output_tokens {
        constrained.max_output_tokens = constrained.max_output_tokens.min(max);
    }
    if let Some(allowed) = governance.allow_list() {
        if !allowed.iter().any(|m| *m == constrained.model) {
            let substitute = if allowed.iter().any(|m| m == preferred_model) {
                preferred_model
            } else {
                allowed[0].as_str()
            };
            constrained.model = substitute.to_string();
        }
    }

    constrained
}
