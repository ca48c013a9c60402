use crate::admission::{OverrideRequest, OverrideStatus};
use crate::engine::ParameterGovernanceEngine;
use crate::lifecycle::ResetScope;
use crate::overrides::OverrideScope;
use crate::resolver::ParameterResolutionContext;
use orpar_core::{OrparError, OrparPhase, OrparResult, PartialProfile, ToolCall, ToolResult};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

/// Tool name for requesting a parameter override.
pub const REQUEST_OVERRIDE_TOOL: &str = "request_parameter_override";
/// Tool name for resetting overrides.
pub const RESET_OVERRIDES_TOOL: &str = "reset_parameter_overrides";
/// Tool name for inspecting the currently resolved parameters.
pub const CURRENT_PARAMETERS_TOOL: &str = "get_current_parameters";

/// Name, description, and JSON schema of one agent-facing tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    /// Tool name as the agent calls it.
    pub name: String,
    /// Human-readable purpose.
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters_schema: Value,
}

/// Who is calling: the agent, channel, task, and phase the call runs in.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Calling agent.
    pub agent_id: String,
    /// Channel the agent runs in.
    pub channel_id: String,
    /// Current task, if any.
    pub task_id: Option<String>,
    /// Phase the call is made from.
    pub phase: OrparPhase,
}

impl ToolContext {
    /// A context outside of any task.
    pub fn new(
        agent_id: impl Into<String>,
        channel_id: impl Into<String>,
        phase: OrparPhase,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            channel_id: channel_id.into(),
            task_id: None,
            phase,
        }
    }

    /// Sets the task id.
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// Exposes governance operations as tools an agent can call.
#[derive(Clone)]
pub struct GovernanceTools {
    engine: Arc<ParameterGovernanceEngine>,
}

impl GovernanceTools {
    /// Wraps a shared engine.
    pub fn new(engine: Arc<ParameterGovernanceEngine>) -> Self {
        Self { engine }
    }

    /// Descriptors for every tool, in a stable order.
    pub fn descriptors() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                name: REQUEST_OVERRIDE_TOOL.to_string(),
                description: "Request different inference parameters for upcoming model calls. \
                    The request is checked against rate limits, cost budgets, and governance \
                    bounds and may be approved, adjusted, or denied."
                    .to_string(),
                parameters_schema: json!({
                    "type": "object",
                    "properties": {
                        "model": { "type": "string", "description": "Model identifier" },
                        "temperature": { "type": "number", "minimum": 0 },
                        "max_output_tokens": { "type": "integer", "minimum": 0 },
                        "reasoning_tokens": { "type": "integer", "minimum": 0 },
                        "reason": {
                            "type": "string",
                            "description": "Why the change is needed"
                        },
                        "scope": {
                            "type": "string",
                            "enum": ["next_call", "current_phase", "task", "session"],
                            "description": "How long the override lasts (default: next_call)"
                        }
                    },
                    "required": ["reason"]
                }),
            },
            ToolDescriptor {
                name: RESET_OVERRIDES_TOOL.to_string(),
                description: "Remove previously granted parameter overrides.".to_string(),
                parameters_schema: json!({
                    "type": "object",
                    "properties": {
                        "scope": {
                            "type": "string",
                            "enum": ["all", "session", "task"],
                            "description": "Which overrides to remove (default: all)"
                        }
                    }
                }),
            },
            ToolDescriptor {
                name: CURRENT_PARAMETERS_TOOL.to_string(),
                description: "Show the parameters the next model call in this phase would use."
                    .to_string(),
                parameters_schema: json!({ "type": "object", "properties": {} }),
            },
        ]
    }

    /// Runs one tool call. Governance denials are successful results; malformed
    /// arguments and unknown tools are error results.
    pub fn execute(&self, call: &ToolCall, context: &ToolContext) -> OrparResult<ToolResult> {
        let outcome = match call.name.as_str() {
            REQUEST_OVERRIDE_TOOL => self.request_override(&call.arguments, context),
            RESET_OVERRIDES_TOOL => self.reset(&call.arguments, context),
            CURRENT_PARAMETERS_TOOL => self.current_parameters(context),
            other => Err(OrparError::Tool(format!("unknown tool '{other}'"))),
        };
        match outcome {
            Ok(content) => Ok(ToolResult::success(&call.id, content.to_string())),
            Err(e @ (OrparError::Validation(_) | OrparError::Tool(_))) => {
                warn!(tool = %call.name, error = %e, "rejected tool call");
                Ok(ToolResult::error(&call.id, e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn request_override(&self, args: &Value, context: &ToolContext) -> OrparResult<Value> {
        let reason = args["reason"]
            .as_str()
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| OrparError::Validation("'reason' is required".into()))?;
        let scope = match args["scope"].as_str() {
            Some(s) => s.parse::<OverrideScope>()?,
            None => OverrideScope::NextCall,
        };
        let suggested = suggested_params(args)?;
        if suggested.is_empty() {
            return Err(OrparError::Validation(
                "at least one parameter must be suggested".into(),
            ));
        }

        let decision = self.engine.request_override(
            &context.agent_id,
            &context.channel_id,
            context.task_id.as_deref(),
            context.phase,
            OverrideRequest::new(suggested, reason, scope),
        )?;

        let message = match decision.status {
            OverrideStatus::Approved => "Override approved".to_string(),
            OverrideStatus::Modified | OverrideStatus::Denied => {
                decision.rationale.clone().unwrap_or_default()
            }
        };
        let mut body = serde_json::to_value(&decision)?;
        body["granted"] = Value::Bool(decision.status.is_granted());
        body["message"] = Value::String(message);
        Ok(body)
    }

    fn reset(&self, args: &Value, context: &ToolContext) -> OrparResult<Value> {
        let scope = match args["scope"].as_str() {
            Some(s) => s.parse::<ResetScope>()?,
            None => ResetScope::All,
        };
        let outcome = self.engine.reset_overrides(
            &context.agent_id,
            &context.channel_id,
            scope,
            context.task_id.as_deref(),
        )?;
        Ok(serde_json::to_value(outcome)?)
    }

    fn current_parameters(&self, context: &ToolContext) -> OrparResult<Value> {
        let mut ctx = ParameterResolutionContext::new(
            context.agent_id.clone(),
            context.channel_id.clone(),
            context.phase,
        );
        if let Some(task_id) = &context.task_id {
            ctx = ctx.with_task(task_id.clone());
        }
        let resolution = self.engine.preview(&ctx);
        Ok(json!({
            "phase": context.phase,
            "params": resolution.profile,
            "override_id": resolution.applied_override.map(|o| o.id),
        }))
    }
}

fn suggested_params(args: &Value) -> OrparResult<PartialProfile> {
    let mut partial = PartialProfile::default();
    if let Some(model) = optional(args, "model", Value::as_str)? {
        partial = partial.with_model(model);
    }
    if let Some(temperature) = optional(args, "temperature", Value::as_f64)? {
        partial = partial.with_temperature(temperature as f32);
    }
    if let Some(tokens) = optional(args, "max_output_tokens", Value::as_u64)? {
        partial = partial.with_max_output_tokens(token_count("max_output_tokens", tokens)?);
    }
    if let Some(tokens) = optional(args, "reasoning_tokens", Value::as_u64)? {
        partial = partial.with_reasoning_tokens(token_count("reasoning_tokens", tokens)?);
    }
    Ok(partial)
}

fn optional<'a, T>(
    args: &'a Value,
    field: &str,
    read: impl Fn(&'a Value) -> Option<T>,
) -> OrparResult<Option<T>> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => read(value)
            .map(Some)
            .ok_or_else(|| OrparError::Validation(format!("'{field}' has the wrong type"))),
    }
}

fn token_count(field: &str, value: u64) -> OrparResult<u32> {
    u32::try_from(value).map_err(|_| OrparError::Validation(format!("'{field}' is too large")))
}
