//! Compactor.compactMessages (spec §4.6, invariant E6).

use crate::message::Message;

const DEFAULT_MAX_TOOL_OUTPUT_CHARS: usize = 8000;

pub struct Compactor {
    pub preserve_turns: usize,
    pub max_tool_output_chars: usize,
}

impl Default for Compactor {
    fn default() -> Self {
        Self {
            preserve_turns: 20,
            max_tool_output_chars: DEFAULT_MAX_TOOL_OUTPUT_CHARS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactionReport {
    pub messages_before: usize,
    pub messages_after: usize,
    pub estimated_tokens_saved: usize,
}

fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.content_len() / 4).sum()
}

impl Compactor {
    pub fn new(preserve_turns: usize, max_tool_output_chars: usize) -> Self {
        Self {
            preserve_turns,
            max_tool_output_chars,
        }
    }

    /// Returns `(compacted_messages, report)`. Unchanged when
    /// `history.len() <= preserve_turns + 1`.
    pub fn compact_messages(&self, history: &[Message]) -> (Vec<Message>, CompactionReport) {
        let messages_before = history.len();
        if history.len() <= self.preserve_turns + 1 {
            return (
                history.to_vec(),
                CompactionReport {
                    messages_before,
                    messages_after: messages_before,
                    estimated_tokens_saved: 0,
                },
            );
        }

        let split_at = history.len() - self.preserve_turns;
        let (older, preserved) = history.split_at(split_at);

        let tool_names: Vec<&str> = older
            .iter()
            .flat_map(|m| m.tool_calls().iter().map(|c| c.name.as_str()))
            .collect();
        let summary_body = if tool_names.is_empty() {
            format!("Summary of {} earlier turns.", older.len())
        } else {
            format!(
                "Summary of {} earlier turns. Tools called: {}.",
                older.len(),
                tool_names.join(", ")
            )
        };

        let mut compacted = vec![Message::system(summary_body)];
        compacted.extend(preserved.iter().cloned().map(|m| self.truncate_tool_output(m)));

        let tokens_before = estimate_tokens(history);
        let tokens_after = estimate_tokens(&compacted);

        (
            compacted.clone(),
            CompactionReport {
                messages_before,
                messages_after: compacted.len(),
                estimated_tokens_saved: tokens_before.saturating_sub(tokens_after),
            },
        )
    }

    fn truncate_tool_output(&self, message: Message) -> Message {
        match message {
            Message::Tool { tool_call_id, content } if content.len() > self.max_tool_output_chars => {
                let omitted = content.len() - self.max_tool_output_chars;
                let truncated = &content[..self.max_tool_output_chars];
                Message::Tool {
                    tool_call_id,
                    content: format!("{truncated}\n...[{omitted} characters omitted]"),
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_short_history_unchanged() {
        let compactor = Compactor::new(20, 8000);
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let (compacted, report) = compactor.compact_messages(&history);
        assert_eq!(compacted, history);
        assert_eq!(report.estimated_tokens_saved, 0);
    }

    #[test]
    fn preserves_trailing_messages_verbatim() {
        let compactor = Compactor::new(2, 8000);
        let history: Vec<Message> = (0..10).map(|i| Message::user(format!("m{i}"))).collect();
        let (compacted, _) = compactor.compact_messages(&history);
        assert_eq!(compacted[compacted.len() - 2..], history[history.len() - 2..]);
    }

    #[test]
    fn truncates_oversized_tool_output_with_annotation() {
        let compactor = Compactor::new(1, 10);
        let long = "x".repeat(100);
        let history = vec![
            Message::user("a"),
            Message::user("b"),
            Message::tool("c1", long.clone()),
        ];
        let (compacted, _) = compactor.compact_messages(&history);
        let Message::Tool { content, .. } = compacted.last().unwrap() else { panic!() };
        assert!(content.starts_with(&long[..10]));
        assert!(content.contains("characters omitted"));
    }

    #[test]
    fn never_increases_estimated_token_count() {
        let compactor = Compactor::default();
        let history: Vec<Message> = (0..50).map(|i| Message::user(format!("message number {i}"))).collect();
        let tokens_before = estimate_tokens(&history);
        let (compacted, _) = compactor.compact_messages(&history);
        assert!(estimate_tokens(&compacted) <= tokens_before);
    }
}
