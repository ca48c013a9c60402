use crate::OrparError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One step of the Observation → Reasoning → Planning → Action → Reflection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrparPhase {
    /// Gathering context from the environment.
    Observation,
    /// Interpreting what was observed.
    Reasoning,
    /// Deciding what to do next.
    Planning,
    /// Executing tools or producing output.
    Action,
    /// Evaluating the outcome; closes one cycle.
    Reflection,
}

impl OrparPhase {
    /// All phases in cycle order.
    pub const ALL: [OrparPhase; 5] = [
        OrparPhase::Observation,
        OrparPhase::Reasoning,
        OrparPhase::Planning,
        OrparPhase::Action,
        OrparPhase::Reflection,
    ];

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrparPhase::Observation => "observation",
            OrparPhase::Reasoning => "reasoning",
            OrparPhase::Planning => "planning",
            OrparPhase::Action => "action",
            OrparPhase::Reflection => "reflection",
        }
    }
}

impl fmt::Display for OrparPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrparPhase {
    type Err = OrparError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrparPhase::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| OrparError::Validation(format!("unknown ORPAR phase '{s}'")))
    }
}
