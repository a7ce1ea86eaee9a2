//! ContextBuilder.compose (spec §4.6).

use crate::memory_service::MemoryHit;
use crate::message::Message;

/// Inputs to one `compose` call. Every field is optional except the base
/// prompt and history; absent sections are simply omitted from the preamble.
pub struct ContextInputs<'a> {
    pub base_system_prompt: &'a str,
    pub provider_hints: Option<&'a str>,
    pub allowed_tools: &'a [String],
    pub denied_tools: &'a [String],
    pub cwd: &'a str,
    pub date: &'a str,
    pub available_tool_names: &'a [String],
    pub available_groups: &'a [String],
    pub skill_fragments: &'a [String],
    pub memory_hits: &'a [MemoryHit],
    pub budget_warning: Option<&'a str>,
    pub history: &'a [Message],
}

pub struct ContextBuilder {
    /// Trailing messages of history appended after the system preamble.
    pub trailing_history: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self { trailing_history: 12 }
    }
}

impl ContextBuilder {
    pub fn new(trailing_history: usize) -> Self {
        Self { trailing_history }
    }

    /// Assembles the system-role preamble by layering, in fixed order,
    /// separated by blank lines: base prompt, provider hints, tool policy,
    /// environment, available-groups catalog, skill catalog, memory summary,
    /// budget warning — then appends the trailing N history messages.
    pub fn compose(&self, inputs: &ContextInputs) -> Vec<Message> {
        let mut sections = Vec::new();

        sections.push(inputs.base_system_prompt.to_string());

        if let Some(hints) = inputs.provider_hints {
            sections.push(hints.to_string());
        }

        sections.push(format!(
            "allowed: {}, denied: {}",
            if inputs.allowed_tools.is_empty() {
                "*".to_string()
            } else {
                inputs.allowed_tools.join(", ")
            },
            if inputs.denied_tools.is_empty() {
                "none".to_string()
            } else {
                inputs.denied_tools.join(", ")
            }
        ));

        sections.push(format!(
            "cwd: {}\ndate: {}\ntools: {}",
            inputs.cwd,
            inputs.date,
            inputs.available_tool_names.join(", ")
        ));

        if !inputs.available_groups.is_empty() {
            let shown: Vec<&String> = inputs.available_groups.iter().take(5).collect();
            let mut line = format!(
                "available groups: {}",
                shown.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            );
            if inputs.available_groups.len() > 5 {
                line.push_str(&format!(" (+{} more, list to see all)", inputs.available_groups.len() - 5));
            }
            sections.push(line);
        }

        if !inputs.skill_fragments.is_empty() {
            sections.push(inputs.skill_fragments.join("\n\n"));
        }

        if !inputs.memory_hits.is_empty() {
            let summary = inputs
                .memory_hits
                .iter()
                .map(|h| format!("- {}", h.content))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("memory:\n{summary}"));
        }

        if let Some(warning) = inputs.budget_warning {
            sections.push(warning.to_string());
        }

        let preamble = sections.join("\n\n");
        let mut messages = vec![Message::system(preamble)];

        let start = inputs.history.len().saturating_sub(self.trailing_history);
        messages.extend(inputs.history[start..].iter().cloned());
        messages
    }
}
