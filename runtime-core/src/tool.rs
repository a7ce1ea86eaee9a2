//! Tool trait and supporting types (spec §3 "ToolDefinition", §4.3 "ToolRouter").
//!
//! Grounded on the teacher's `tools::Tool` trait (name/spec/call) and
//! `tool_source::ToolCallContext`, generalized from a single agent's tool
//! surface into the router's registry entry shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;
use crate::message::Message;

/// Risk tier used by [`crate::tool_policy::ToolPolicy`] (spec §4.3).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolRisk {
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    Builtin,
    External,
}

/// Name, description, JSON-schema parameters, and scheduling/policy metadata
/// (spec §3 "ToolDefinition").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub risk_level: ToolRisk,
    pub mutating: bool,
    pub supports_parallel: bool,
    pub source: ToolSource,
}

/// Context passed to a tool call: recent conversation, the calling run's
/// agent context (for policy), identity for scoping, and the id of the LLM
/// tool call in progress (routing tools need this to tag the [`Dependency`]
/// rows they create so [`crate::swarm::SwarmCoordinator`] can later group
/// fan-in results back to the call that spawned them).
///
/// [`Dependency`]: crate::run::Dependency
#[derive(Clone, Debug, Default)]
pub struct ToolCallContext {
    pub recent_messages: Vec<Message>,
    pub agent_context: Option<crate::run::AgentContext>,
    pub run_id: Option<String>,
    pub session_key: Option<String>,
    pub tool_call_id: Option<String>,
}

impl ToolCallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent_context(mut self, ctx: crate::run::AgentContext) -> Self {
        self.agent_context = Some(ctx);
        self
    }
}

/// What a tool handler returns before [`crate::tool_router::ToolRouter`] wraps
/// it into a [`ToolResult`]. A handler signals suspension (fan-out / human
/// approval, spec §4.7) by returning the corresponding variant instead of
/// plain content.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolCallOutcome {
    Content(Value),
    RequiresSuspension {
        requires_suspension: bool,
        child_run_ids: Vec<String>,
    },
    RequiresApproval {
        requires_approval: bool,
        tool_call_id: String,
    },
}

/// Result of one `callTool` invocation (spec §4.3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub human_intervention_note: Option<String>,
}

impl ToolResult {
    pub fn ok(result: Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            duration_ms,
            human_intervention_note: None,
        }
    }

    pub fn err(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            duration_ms,
            human_intervention_note: None,
        }
    }

    /// Rendered as the content of the tool-role message sent back to the LLM.
    pub fn to_message_content(&self) -> String {
        if self.success {
            self.result
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default()
        } else {
            serde_json::json!({ "success": false, "error": self.error }).to_string()
        }
    }
}

/// A callable tool: builtin or a proxy for an out-of-process (MCP-style)
/// tool server.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn definition(&self) -> ToolDefinition;
    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<ToolCallOutcome, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_result_serializes_without_raw_content() {
        let r = ToolResult::err("boom", 5);
        let content = r.to_message_content();
        assert!(content.contains("\"success\":false"));
        assert!(content.contains("boom"));
    }

    #[test]
    fn ok_result_message_content_is_the_raw_result() {
        let r = ToolResult::ok(serde_json::json!({"x": 1}), 3);
        assert_eq!(r.to_message_content(), "{\"x\":1}");
    }
}
