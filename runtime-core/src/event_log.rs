//! EventLog: append-only JSONL event stream per run (spec §4.1).
//!
//! Grounded on the teacher's `SqliteSaver::put` pattern — async wrapper
//! around a blocking filesystem operation, serialized per key — adapted from
//! SQLite rows to JSONL lines. A per-stream `tokio::sync::Mutex` gives FIFO
//! ordering for concurrent appends to the same `(session_key, run_id)`
//! stream without blocking appends to other streams.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use runtime_stream::RunEvent;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::AgentError;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct StreamKey {
    session_key: String,
    run_id: String,
}

/// One page of `readPage` (spec §4.1).
#[derive(Clone, Debug)]
pub struct Page {
    pub events: Vec<RunEvent>,
    pub next_cursor: Option<String>,
}

const MAX_PAGE_SIZE: usize = 500;

#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, event: RunEvent) -> Result<(), AgentError>;
    async fn append_batch(&self, events: Vec<RunEvent>) -> Result<(), AgentError>;
    async fn read_stream(&self, session_key: &str, run_id: &str) -> Result<Vec<RunEvent>, AgentError>;
    async fn read_page(
        &self,
        session_key: &str,
        run_id: &str,
        cursor: Option<String>,
        limit: usize,
        include_tokens: bool,
    ) -> Result<Page, AgentError>;
    async fn build_index(&self, session_key: &str, run_id: &str, every_n: usize) -> Result<(), AgentError>;
    async fn count(&self, session_key: &str, run_id: &str) -> Result<usize, AgentError>;
    async fn exists(&self, session_key: &str, run_id: &str) -> bool;
}

/// Filesystem-backed [`EventLog`] (spec §6 "Persisted state layout"):
/// `sessions/<session_key>/runs/<run_id>/events.jsonl` plus a companion
/// `events.idx.jsonl`.
pub struct FsEventLog {
    root: PathBuf,
    locks: DashMap<StreamKey, Arc<Mutex<()>>>,
}

impl FsEventLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    fn stream_dir(&self, session_key: &str, run_id: &str) -> PathBuf {
        self.root
            .join("sessions")
            .join(session_key)
            .join("runs")
            .join(run_id)
    }

    fn events_path(&self, session_key: &str, run_id: &str) -> PathBuf {
        self.stream_dir(session_key, run_id).join("events.jsonl")
    }

    fn index_path(&self, session_key: &str, run_id: &str) -> PathBuf {
        self.stream_dir(session_key, run_id).join("events.idx.jsonl")
    }

    fn lock_for(&self, session_key: &str, run_id: &str) -> Arc<Mutex<()>> {
        let key = StreamKey {
            session_key: session_key.to_string(),
            run_id: run_id.to_string(),
        };
        self.locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn append_lines(&self, path: &Path, lines: &[String]) -> Result<(), AgentError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::EventStore(e.to_string()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await
            .map_err(|e| AgentError::EventStore(e.to_string()))?;
        let mut buf = String::new();
        for line in lines {
            buf.push_str(line);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| AgentError::EventStore(e.to_string()))?;
        file.flush().await.map_err(|e| AgentError::EventStore(e.to_string()))?;
        Ok(())
    }

    async fn read_all_lines(&self, path: &Path) -> Result<Vec<String>, AgentError> {
        match tokio::fs::File::open(path).await {
            Ok(file) => {
                let reader = tokio::io::BufReader::new(file);
                let mut lines = reader.lines();
                let mut out = Vec::new();
                while let Some(line) = lines
                    .next_line()
                    .await
                    .map_err(|e| AgentError::EventStore(e.to_string()))?
                {
                    out.push(line);
                }
                Ok(out)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(AgentError::EventStore(e.to_string())),
        }
    }
}

#[async_trait]
impl EventLog for FsEventLog {
    async fn append(&self, event: RunEvent) -> Result<(), AgentError> {
        self.append_batch(vec![event]).await
    }

    async fn append_batch(&self, events: Vec<RunEvent>) -> Result<(), AgentError> {
        if events.is_empty() {
            return Ok(());
        }
        // Validate all events before the first write (spec §4.1).
        let mut by_stream: HashMap<StreamKey, Vec<String>> = HashMap::new();
        for event in &events {
            let line = serde_json::to_string(event)
                .map_err(|e| AgentError::Validation(format!("invalid event: {e}")))?;
            by_stream
                .entry(StreamKey {
                    session_key: event.session_key.clone(),
                    run_id: event.run_id.clone(),
                })
                .or_default()
                .push(line);
        }
        for (key, lines) in by_stream {
            let lock = self.lock_for(&key.session_key, &key.run_id);
            let _guard = lock.lock().await;
            let path = self.events_path(&key.session_key, &key.run_id);
            self.append_lines(&path, &lines).await?;
        }
        Ok(())
    }

    async fn read_stream(&self, session_key: &str, run_id: &str) -> Result<Vec<RunEvent>, AgentError> {
        let path = self.events_path(session_key, run_id);
        let lines = self.read_all_lines(&path).await?;
        let mut events = Vec::with_capacity(lines.len());
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!("skipping malformed event line in {:?}: {e}", path),
            }
        }
        Ok(events)
    }

    async fn read_page(
        &self,
        session_key: &str,
        run_id: &str,
        cursor: Option<String>,
        limit: usize,
        include_tokens: bool,
    ) -> Result<Page, AgentError> {
        let limit = limit.min(MAX_PAGE_SIZE).max(1);
        let all = self.read_stream(session_key, run_id).await?;
        let start = match cursor {
            Some(c) => c.parse::<usize>().map_err(|_| AgentError::Validation("invalid cursor".to_string()))?,
            None => 0,
        };
        let mut events: Vec<RunEvent> = Vec::new();
        let mut idx = start;
        while idx < all.len() && events.len() < limit {
            let event = &all[idx];
            idx += 1;
            if !include_tokens && event.payload.is_llm_token() {
                continue;
            }
            events.push(event.clone());
        }
        let next_cursor = if idx < all.len() { Some(idx.to_string()) } else { None };
        Ok(Page { events, next_cursor })
    }

    async fn build_index(&self, session_key: &str, run_id: &str, every_n: usize) -> Result<(), AgentError> {
        let every_n = every_n.max(1);
        let all = self.read_stream(session_key, run_id).await?;
        let mut lines = Vec::new();
        for (line_number, event) in all.iter().enumerate() {
            if line_number % every_n == 0 {
                let entry = serde_json::json!({
                    "byte_offset": line_number, // approximate: line offset, not a true byte offset
                    "line_number": line_number,
                    "ts": event.ts,
                });
                lines.push(entry.to_string());
            }
        }
        let path = self.index_path(session_key, run_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| AgentError::EventStore(e.to_string()))?;
        }
        let tmp = path.with_extension("idx.jsonl.tmp");
        tokio::fs::write(&tmp, lines.join("\n")).await.map_err(|e| AgentError::EventStore(e.to_string()))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| AgentError::EventStore(e.to_string()))?;
        Ok(())
    }

    async fn count(&self, session_key: &str, run_id: &str) -> Result<usize, AgentError> {
        Ok(self.read_stream(session_key, run_id).await?.len())
    }

    async fn exists(&self, session_key: &str, run_id: &str) -> bool {
        self.events_path(session_key, run_id).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_stream::{EventPayload, Redaction};

    fn event(run_id: &str, n: u32, payload: EventPayload) -> RunEvent {
        RunEvent {
            v: 1,
            ts: format!("2026-01-01T00:00:{:02}Z", n),
            session_key: "sess".to_string(),
            run_id: run_id.to_string(),
            agent_id: "agent".to_string(),
            step_id: format!("step_{:04}", n),
            span_id: format!("span_{n}"),
            parent_span_id: None,
            redaction: Redaction::default(),
            payload,
        }
    }

    #[tokio::test]
    async fn append_then_read_stream_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = FsEventLog::new(dir.path());
        for n in 0..5 {
            log.append(event("run_1", n, EventPayload::StepStarted { step_number: n })).await.unwrap();
        }
        let events = log.read_stream("sess", "run_1").await.unwrap();
        assert_eq!(events.len(), 5);
        for (i, e) in events.iter().enumerate() {
            assert_eq!(e.step_id, format!("step_{:04}", i));
        }
    }

    #[tokio::test]
    async fn pagination_covers_whole_stream_with_no_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let log = FsEventLog::new(dir.path());
        for n in 0..7 {
            log.append(event("run_1", n, EventPayload::StepStarted { step_number: n })).await.unwrap();
        }
        let mut seen = std::collections::HashSet::new();
        let mut cursor = None;
        loop {
            let page = log.read_page("sess", "run_1", cursor.clone(), 2, true).await.unwrap();
            for e in &page.events {
                assert!(seen.insert(e.span_id.clone()), "duplicate span in page");
            }
            if page.next_cursor.is_none() {
                break;
            }
            cursor = page.next_cursor;
        }
        assert_eq!(seen.len(), 7);
    }

    #[tokio::test]
    async fn include_tokens_false_filters_llm_token_events() {
        let dir = tempfile::tempdir().unwrap();
        let log = FsEventLog::new(dir.path());
        log.append(event("run_1", 0, EventPayload::LlmToken { delta: "a".to_string() })).await.unwrap();
        log.append(event("run_1", 1, EventPayload::StepStarted { step_number: 1 })).await.unwrap();
        let page = log.read_page("sess", "run_1", None, 10, false).await.unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].event_type(), "step.started");
    }

    #[tokio::test]
    async fn malformed_tail_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let log = FsEventLog::new(dir.path());
        log.append(event("run_1", 0, EventPayload::StepStarted { step_number: 0 })).await.unwrap();
        let path = log.events_path("sess", "run_1");
        let mut file = tokio::fs::OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(b"{not json\n").await.unwrap();
        let events = log.read_stream("sess", "run_1").await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_to_same_stream_are_all_visible() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(FsEventLog::new(dir.path()));
        let mut handles = Vec::new();
        for n in 0..20 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.append(event("run_1", n, EventPayload::StepStarted { step_number: n })).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(log.count("sess", "run_1").await.unwrap(), 20);
    }

    #[tokio::test]
    async fn exists_false_for_unknown_run() {
        let dir = tempfile::tempdir().unwrap();
        let log = FsEventLog::new(dir.path());
        assert!(!log.exists("sess", "run_missing").await);
    }
}
