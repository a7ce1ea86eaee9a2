//! SSE wire framing for a `RunEvent` (spec §4.11, §6).
//!
//! `broadcastToRun` serializes as `id: <span_id>\nevent: run.event\ndata: <json>\n\n`.
//! `ping` and `done` frames carry no span id since they are not log events.

use crate::event::RunEvent;

/// One SSE frame, already newline-terminated per the `text/event-stream` grammar.
pub fn run_event_frame(event: &RunEvent) -> Result<String, serde_json::Error> {
    let data = serde_json::to_string(event)?;
    Ok(format!(
        "id: {}\nevent: run.event\ndata: {}\n\n",
        event.span_id, data
    ))
}

/// Heartbeat frame sent every `heartbeatIntervalMs`.
pub fn ping_frame(ts: &str) -> String {
    format!("event: ping\ndata: {{\"ts\":\"{}\"}}\n\n", ts)
}

/// Sent once a run reaches a terminal state, after its last `run.event` frame.
pub fn done_frame() -> &'static str {
    "event: done\ndata: {}\n\n"
}

/// Sent immediately after a subscriber is accepted by `addClient`.
pub fn connected_frame(run_id: &str) -> String {
    format!(
        "event: connected\ndata: {{\"run_id\":\"{}\"}}\n\n",
        run_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventPayload, Redaction};

    fn sample() -> RunEvent {
        RunEvent {
            v: 1,
            ts: "2026-01-01T00:00:00Z".to_string(),
            session_key: "sess".to_string(),
            run_id: "run_1".to_string(),
            agent_id: "agent_1".to_string(),
            step_id: "step_0000".to_string(),
            span_id: "span_7".to_string(),
            parent_span_id: None,
            redaction: Redaction::default(),
            payload: EventPayload::RunStarted {
                input: "hi".to_string(),
            },
        }
    }

    #[test]
    fn frame_uses_span_id_and_run_event_name() {
        let frame = run_event_frame(&sample()).unwrap();
        assert!(frame.starts_with("id: span_7\n"));
        assert!(frame.contains("event: run.event\n"));
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn ping_and_done_are_well_formed() {
        assert!(ping_frame("t").starts_with("event: ping\n"));
        assert!(done_frame().starts_with("event: done\n"));
    }
}
