//! Wire shape of one run event (spec §3 "Event", §6 "Event JSON").
//!
//! `RunEvent` is schema-versioned (`v: 1`) and carries a discriminated `payload`.
//! The discriminator lives on `payload.type`; `EventPayload`'s variants are the
//! canonical seed set and are deliberately extensible via `Custom`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event in a run's append-only log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunEvent {
    pub v: u32,
    pub ts: String,
    pub session_key: String,
    pub run_id: String,
    pub agent_id: String,
    pub step_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub redaction: Redaction,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Redaction {
    pub contains_secrets: bool,
}

impl RunEvent {
    pub fn event_type(&self) -> &'static str {
        self.payload.type_name()
    }
}

/// Canonical event payload union (spec §3). `type` is the serde tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    RunEnqueued {
        queue_position: usize,
    },
    RunStarted {
        input: String,
    },
    RunResumed {
        step_number: u32,
    },
    RunCancelled {
        reason: Option<String>,
    },
    RunWaiting {
        reason: String,
    },
    RunSuspended {
        reason: String,
        tool_call_id: Option<String>,
    },
    RunCompleted {
        result: Value,
    },
    RunFailed {
        code: String,
        message: String,
    },
    StepStarted {
        step_number: u32,
    },
    StepCompleted {
        step_number: u32,
        final_answer: bool,
    },
    StepRetried {
        attempt: u32,
        reason: String,
    },
    LlmCalled {
        prompt_tokens: u32,
        completion_tokens: u32,
        total_tokens: u32,
    },
    LlmToken {
        delta: String,
    },
    ToolCalled {
        tool_call_id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        tool_call_id: String,
        success: bool,
        duration_ms: u64,
    },
    MessageDecision {
        summary: String,
    },
    Custom {
        kind: String,
        value: Value,
    },
}

impl EventPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::RunEnqueued { .. } => "run.enqueued",
            EventPayload::RunStarted { .. } => "run.started",
            EventPayload::RunResumed { .. } => "run.resumed",
            EventPayload::RunSuspended { .. } => "run.suspended",
            EventPayload::RunCancelled { .. } => "run.cancelled",
            EventPayload::RunWaiting { .. } => "run.waiting",
            EventPayload::RunCompleted { .. } => "run.completed",
            EventPayload::RunFailed { .. } => "run.failed",
            EventPayload::StepStarted { .. } => "step.started",
            EventPayload::StepCompleted { .. } => "step.completed",
            EventPayload::StepRetried { .. } => "step.retried",
            EventPayload::LlmCalled { .. } => "llm.called",
            EventPayload::LlmToken { .. } => "llm.token",
            EventPayload::ToolCalled { .. } => "tool.called",
            EventPayload::ToolResult { .. } => "tool.result",
            EventPayload::MessageDecision { .. } => "message.decision",
            EventPayload::Custom { .. } => "custom",
        }
    }

    pub fn is_llm_token(&self) -> bool {
        matches!(self, EventPayload::LlmToken { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::RunCompleted { .. } | EventPayload::RunFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let ev = RunEvent {
            v: 1,
            ts: "2026-01-01T00:00:00Z".to_string(),
            session_key: "sess".to_string(),
            run_id: "run_1".to_string(),
            agent_id: "agent_1".to_string(),
            step_id: "step_0000".to_string(),
            span_id: "span_1".to_string(),
            parent_span_id: None,
            redaction: Redaction::default(),
            payload: EventPayload::RunStarted {
                input: "hello".to_string(),
            },
        };
        let s = serde_json::to_string(&ev).unwrap();
        let back: RunEvent = serde_json::from_str(&s).unwrap();
        assert_eq!(back.event_type(), "run.started");
        assert_eq!(back.run_id, "run_1");
    }

    #[test]
    fn llm_token_is_filterable() {
        let p = EventPayload::LlmToken {
            delta: "hi".to_string(),
        };
        assert!(p.is_llm_token());
        assert_eq!(p.type_name(), "llm.token");
    }
}
