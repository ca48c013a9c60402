//! Core types and error definitions for the ORPAR agent runtime.
//!
//! This crate provides the vocabulary shared by every ORPAR crate: the
//! five-phase reasoning cycle, inference parameter profiles, the provider
//! enumeration, tool-call envelopes, and the unified error type.
//!
//! # Main types
//!
//! - [`OrparError`] — Unified error enum for all ORPAR subsystems.
//! - [`OrparResult`] — Convenience alias for `Result<T, OrparError>`.
//! - [`OrparPhase`] — Observation, Reasoning, Planning, Action, Reflection.
//! - [`PhaseParameterProfile`] — Fully resolved parameters for one inference call.
//! - [`PartialProfile`] — A sparse profile used for layered overlays.
//! - [`LlmProvider`] — Model provider family used to pick default profiles.
//! - [`ToolCall`] / [`ToolResult`] — Agent tool invocation envelopes.

/// The ORPAR phase enumeration.
pub mod phase;
/// Inference parameter profiles and the overlay primitive.
pub mod profile;
/// Tool invocation envelopes.
pub mod tool;

pub use phase::OrparPhase;
pub use profile::{overlay, LlmProvider, PartialProfile, PhaseParameterProfile};
pub use tool::{ToolCall, ToolResult};

// --- Error types ---

/// Top-level error type for the ORPAR runtime.
///
/// Each variant corresponds to a subsystem that can produce errors. Policy
/// denials are not errors and never appear here.
#[derive(Debug, thiserror::Error)]
pub enum OrparError {
    /// Malformed caller input, rejected before any state is touched.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Governance configuration could not be evaluated.
    #[error("Governance error: {0}")]
    Governance(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A collaborator (cost estimator, validator) failed.
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// A lifecycle event or subscription could not be processed.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// An agent-facing tool call was malformed or unknown.
    #[error("Tool error: {0}")]
    Tool(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`OrparError`].
pub type OrparResult<T> = Result<T, OrparError>;

/// Rejects an empty or whitespace-only identifier.
pub fn require_id(field: &str, value: &str) -> OrparResult<()> {
    if value.trim().is_empty() {
        return Err(OrparError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}
