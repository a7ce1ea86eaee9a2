//! Conversation message shape (spec §3 "Message").
//!
//! Every assistant message with tool calls must eventually (possibly after a
//! suspension) be followed by one tool-role message per tool-call id; see
//! [`crate::checkpoint::CheckpointStore::append_tool_results`] and the orphan
//! repair in [`crate::agent_runner::AgentRunner`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One call the assistant asked the runtime to make.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub parameters: Value,
}

/// A single turn in the conversation passed to / returned from the LLM.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn is_assistant_with_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    /// Approximate length in characters, used by [`crate::context::Compactor`]
    /// truncation before a real tokenizer is wired in.
    pub fn content_len(&self) -> usize {
        match self {
            Message::System { content } => content.len(),
            Message::User { content } => content.len(),
            Message::Assistant { content, .. } => content.len(),
            Message::Tool { content, .. } => content.len(),
        }
    }
}

/// Finds assistant tool-calls in `messages` with no matching tool-role
/// follow-up, in order. Used both by the resumption orphan-repair (spec
/// §4.7) and by invariant E2's test helper.
pub fn orphan_tool_call_ids(messages: &[Message]) -> Vec<String> {
    let mut answered = std::collections::HashSet::new();
    for m in messages {
        if let Message::Tool { tool_call_id, .. } = m {
            answered.insert(tool_call_id.clone());
        }
    }
    let mut orphans = Vec::new();
    for m in messages {
        for call in m.tool_calls() {
            if !answered.contains(&call.id) {
                orphans.push(call.id.clone());
            }
        }
    }
    orphans
}
