//! Error taxonomy (spec §7). Kinds, not class names: each maps to a surfaced
//! HTTP status where relevant and to a retryable/fatal classification via
//! [`crate::retry::ErrorClassifier`].

use thiserror::Error;

/// Generic runtime failure. Fatal to the run unless otherwise noted; the
/// runner catches this at the step boundary and emits `run.failed`.
#[derive(Debug, Error, Clone)]
pub enum AgentError {
    /// Malformed input. Never retried. Surfaced as 400.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced entity absent or outside the caller's scope. Surfaced as 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Tool-level failure with a tool name. Not fatal to the run: surfaced to
    /// the LLM as `success=false` inside a tool-result message.
    #[error("tool error in `{tool}`: {message}")]
    Tool { tool: String, message: String },

    /// Transport or provider error from the LLM client; carries an optional
    /// HTTP status for [`crate::retry::ErrorClassifier`].
    #[error("llm error: {message}")]
    Llm {
        message: String,
        status: Option<u16>,
    },

    /// Path-jail or type-guard violation. Fatal, reported to the caller.
    #[error("sandbox violation: {0}")]
    Sandbox(String),

    /// Event log storage failure. Fatal to the current step.
    #[error("event store error: {0}")]
    EventStore(String),

    /// Checkpoint storage failure. Fatal to the current step.
    #[error("checkpoint store error: {0}")]
    CheckpointStore(String),

    /// The run's abort signal was observed mid-operation.
    #[error("run cancelled")]
    Cancelled,

    /// Generic runtime failure not covered by the above kinds.
    #[error("agent error: {0}")]
    Other(String),
}

impl AgentError {
    /// `{code, message}` pair as surfaced to callers (spec §7: never a raw
    /// stack trace).
    pub fn code_message(&self) -> (&'static str, String) {
        match self {
            AgentError::Validation(m) => ("VALIDATION_ERROR", m.clone()),
            AgentError::NotFound(m) => ("NOT_FOUND", m.clone()),
            AgentError::Tool { tool, message } => {
                ("TOOL_ERROR", format!("{tool}: {message}"))
            }
            AgentError::Llm { message, .. } => ("LLM_ERROR", message.clone()),
            AgentError::Sandbox(m) => ("SANDBOX_ERROR", m.clone()),
            AgentError::EventStore(m) => ("EVENT_STORE_ERROR", m.clone()),
            AgentError::CheckpointStore(m) => ("CHECKPOINT_STORE_ERROR", m.clone()),
            AgentError::Cancelled => ("CANCELLED", "run cancelled".to_string()),
            AgentError::Other(m) => ("AGENT_ERROR", m.clone()),
        }
    }
}
