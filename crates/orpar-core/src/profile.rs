use crate::OrparError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Model provider family. Selects which built-in phase profile table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Anthropic models.
    #[default]
    Claude,
    /// OpenAI models.
    OpenAi,
    /// OpenRouter, addressed with `vendor/model` names.
    OpenRouter,
    /// Groq cloud inference (OpenAI-compatible API).
    Groq,
}

impl LlmProvider {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Claude => "claude",
            LlmProvider::OpenAi => "openai",
            LlmProvider::OpenRouter => "openrouter",
            LlmProvider::Groq => "groq",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = OrparError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(LlmProvider::Claude),
            "openai" => Ok(LlmProvider::OpenAi),
            "openrouter" => Ok(LlmProvider::OpenRouter),
            "groq" => Ok(LlmProvider::Groq),
            other => Err(OrparError::Validation(format!("unknown provider '{other}'"))),
        }
    }
}

/// The resolved inference parameters for one model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseParameterProfile {
    /// Provider model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Cap on generated tokens.
    pub max_output_tokens: u32,
    /// Extended thinking budget; zero disables it.
    pub reasoning_tokens: u32,
}

impl PhaseParameterProfile {
    /// Creates a fully specified profile.
    pub fn new(
        model: impl Into<String>,
        temperature: f32,
        max_output_tokens: u32,
        reasoning_tokens: u32,
    ) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_output_tokens,
            reasoning_tokens,
        }
    }

    /// Returns a copy of `self` with every field defined in `partial` replaced.
    pub fn overlaid(&self, partial: &PartialProfile) -> Self {
        overlay(partial, self)
    }

    /// In-place variant of [`PhaseParameterProfile::overlaid`].
    pub fn apply(&mut self, partial: &PartialProfile) {
        if let Some(model) = &partial.model {
            self.model.clone_from(model);
        }
        if let Some(temperature) = partial.temperature {
            self.temperature = temperature;
        }
        if let Some(max_output_tokens) = partial.max_output_tokens {
            self.max_output_tokens = max_output_tokens;
        }
        if let Some(reasoning_tokens) = partial.reasoning_tokens {
            self.reasoning_tokens = reasoning_tokens;
        }
    }
}

/// A sparse profile. Undefined fields fall through to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialProfile {
    /// Model override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Temperature override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Output token cap override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Reasoning budget override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
}

impl PartialProfile {
    /// Sets the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the output token cap.
    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    /// Sets the reasoning token budget.
    pub fn with_reasoning_tokens(mut self, tokens: u32) -> Self {
        self.reasoning_tokens = Some(tokens);
        self
    }

    /// True when no field is defined.
    pub fn is_empty(&self) -> bool {
        self.model.is_none()
            && self.temperature.is_none()
            && self.max_output_tokens.is_none()
            && self.reasoning_tokens.is_none()
    }

    /// Rejects values no governance policy could make sense of.
    pub fn check_well_formed(&self) -> Result<(), OrparError> {
        if let Some(t) = self.temperature {
            if !t.is_finite() || t < 0.0 {
                return Err(OrparError::Validation(format!(
                    "temperature must be a finite non-negative number, got {t}"
                )));
            }
        }
        if let Some(model) = &self.model {
            if model.trim().is_empty() {
                return Err(OrparError::Validation("model must not be empty".into()));
            }
        }
        Ok(())
    }
}

impl From<&PhaseParameterProfile> for PartialProfile {
    fn from(profile: &PhaseParameterProfile) -> Self {
        Self {
            model: Some(profile.model.clone()),
            temperature: Some(profile.temperature),
            max_output_tokens: Some(profile.max_output_tokens),
            reasoning_tokens: Some(profile.reasoning_tokens),
        }
    }
}

/// Overlays `partial` onto `base`: defined fields win, undefined fields fall through.
pub fn overlay(partial: &PartialProfile, base: &PhaseParameterProfile) -> PhaseParameterProfile {
    let mut merged = base.clone();
    merged.apply(partial);
    merged
}
