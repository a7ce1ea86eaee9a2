//! RunQueue: single-worker FIFO admission + execution (spec §4.8, §4.9).
//!
//! Grounded on the teacher's `NodeMiddleware::around_run` wrapping shape for
//! the executor slot, and on `stream::StreamWriter`'s channel-based delivery
//! for the abort-signal plumbing (`tokio::sync::watch`, matching the
//! teacher's channel-heavy concurrency style).

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, warn};

use crate::error::AgentError;
use crate::event_log::EventLog;
use crate::run::Run;
use crate::sse::SSEBroadcaster;
use runtime_stream::{EventPayload, Redaction, RunEvent};

/// What an executor invocation resolved to. `Suspended` means the run
/// stopped itself (fan-out / human approval) and will be re-enqueued later
/// by [`crate::swarm::SwarmCoordinator`] or an approval endpoint; it is not
/// a terminal outcome for the queue's bookkeeping purposes.
pub enum RunOutcome {
    Completed(Value),
    Suspended,
    Failed(AgentError),
}

pub type Executor =
    Arc<dyn Fn(Run, watch::Receiver<bool>) -> BoxFuture<'static, RunOutcome> + Send + Sync>;

struct RunningSlot {
    run_id: String,
    abort_tx: watch::Sender<bool>,
}

struct State {
    pending: VecDeque<Run>,
    waiting: HashSet<String>,
    running: Option<RunningSlot>,
}

pub struct RunQueue {
    max_size: usize,
    timeout: Option<Duration>,
    persist_dir: Option<PathBuf>,
    event_log: Arc<dyn EventLog>,
    executor: Mutex<Option<Executor>>,
    state: Mutex<State>,
    pump_lock: tokio::sync::Mutex<()>,
    broadcaster: Option<Arc<SSEBroadcaster>>,
}

fn now_iso() -> String {
    // Timestamps come from the caller's clock abstraction at call sites that
    // need determinism; here we fall back to a monotonic-ish placeholder
    // only when no caller-supplied time is available.
    chrono::Utc::now().to_rfc3339()
}

impl RunQueue {
    pub fn new(max_size: usize, timeout: Option<Duration>, persist_dir: Option<PathBuf>, event_log: Arc<dyn EventLog>) -> Self {
        Self {
            max_size,
            timeout,
            persist_dir,
            event_log,
            executor: Mutex::new(None),
            state: Mutex::new(State { pending: VecDeque::new(), waiting: HashSet::new(), running: None }),
            pump_lock: tokio::sync::Mutex::new(()),
            broadcaster: None,
        }
    }

    /// Fans every queue-owned event (`run.enqueued`, `run.started`, and the
    /// timeout-induced `run.failed`) out to live SSE subscribers, and sends
    /// the `done` frame when a run reaches a terminal outcome (spec §4.11).
    pub fn with_broadcaster(mut self, broadcaster: Arc<SSEBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn set_executor(&self, executor: Executor) {
        *self.executor.lock().unwrap() = Some(executor);
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.pending.is_empty() && state.waiting.is_empty() && state.running.is_none()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    fn queue_file(&self) -> Option<PathBuf> {
        self.persist_dir.as_ref().map(|d| d.join("queue.jsonl"))
    }

    async fn persist(&self) {
        let Some(path) = self.queue_file() else { return };
        let pending: Vec<Run> = self.state.lock().unwrap().pending.iter().cloned().collect();
        let body = pending
            .iter()
            .filter_map(|r| serde_json::to_string(r).ok())
            .collect::<Vec<_>>()
            .join("\n");
        if let Some(parent) = path.parent() {
            if tokio::fs::create_dir_all(parent).await.is_err() {
                warn!("failed to create queue persist dir");
                return;
            }
        }
        let tmp = path.with_extension("jsonl.tmp");
        if tokio::fs::write(&tmp, body).await.is_ok() {
            let _ = tokio::fs::rename(&tmp, &path).await;
        }
    }

    /// Restores pending records from the queue file. Non-pending records
    /// (left over from a crash mid-execution) are discarded.
    pub async fn restore(&self) -> Result<usize, AgentError> {
        let Some(path) = self.queue_file() else { return Ok(0) };
        let body = match tokio::fs::read_to_string(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AgentError::Other(e.to_string())),
        };
        let mut restored = 0;
        let mut state = self.state.lock().unwrap();
        for line in body.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Run>(line) {
                Ok(run) if run.status == crate::run::RunStatus::Pending => {
                    state.pending.push_back(run);
                    restored += 1;
                }
                Ok(_) => {}
                Err(e) => warn!("skipping malformed queued run record: {e}"),
            }
        }
        Ok(restored)
    }

    async fn emit(&self, run: &Run, payload: EventPayload) {
        let event = RunEvent {
            v: 1,
            ts: now_iso(),
            session_key: run.session_key.clone(),
            run_id: run.id.clone(),
            agent_id: run.agent_id.clone(),
            step_id: "step_0000".to_string(),
            span_id: uuid::Uuid::new_v4().to_string(),
            parent_span_id: None,
            redaction: Redaction::default(),
            payload,
        };
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast_to_run(&run.id, &event);
        }
        if let Err(e) = self.event_log.append(event).await {
            error!("failed to append queue event for run {}: {e}", run.id);
        }
    }

    /// `enqueue` (spec §4.8): rejects when the pending queue is already at
    /// `max_size`.
    pub async fn enqueue(&self, run: Run) -> Result<(), AgentError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.pending.len() >= self.max_size {
                return Err(AgentError::Validation("Queue is full".to_string()));
            }
            state.waiting.remove(&run.id);
            state.pending.push_back(run.clone());
        }
        self.emit(&run, EventPayload::RunEnqueued { queue_position: self.len() }).await;
        self.persist().await;
        Ok(())
    }

    pub fn notify_run_waiting(&self, run_id: &str) {
        self.state.lock().unwrap().waiting.insert(run_id.to_string());
    }

    pub fn notify_run_resumed(&self, run_id: &str) {
        self.state.lock().unwrap().waiting.remove(run_id);
    }

    /// Sets the current run's abort signal if `run_id` is currently running.
    /// Otherwise, if it is pending, removes it from the queue. Returns
    /// whether any action was taken (spec §4.8 `cancel`).
    pub async fn cancel(&self, run_id: &str) -> bool {
        let removed = {
            let mut state = self.state.lock().unwrap();
            if let Some(slot) = &state.running {
                if slot.run_id == run_id {
                    let _ = slot.abort_tx.send(true);
                    return true;
                }
            }
            let before = state.pending.len();
            state.pending.retain(|r| r.id != run_id);
            state.pending.len() != before
        };
        if removed {
            self.persist().await;
        }
        removed
    }

    /// Idempotent pump (spec §4.8 `processQueue`): drains pending runs one
    /// at a time while the worker slot is free.
    pub async fn process_queue(&self) -> Result<(), AgentError> {
        let _pump_guard = self.pump_lock.lock().await;
        loop {
            let already_running = self.state.lock().unwrap().running.is_some();
            if already_running {
                break;
            }
            let next = self.state.lock().unwrap().pending.pop_front();
            let Some(run) = next else { break };
            self.persist().await;

            let Some(executor) = self.executor.lock().unwrap().clone() else {
                return Err(AgentError::Other("RunQueue has no executor set".to_string()));
            };

            let (abort_tx, abort_rx) = watch::channel(false);
            {
                let mut state = self.state.lock().unwrap();
                state.running = Some(RunningSlot { run_id: run.id.clone(), abort_tx: abort_tx.clone() });
            }

            self.emit(&run, EventPayload::RunStarted { input: run.input.clone() }).await;

            let fut = executor(run.clone(), abort_rx);
            // Whether the inner future itself produced `outcome`, or the
            // queue's own timeout cut it off. The executor (AgentRunner) owns
            // terminal-event emission for every outcome it returns (spec
            // invariant E1: exactly one `run.completed`/`run.failed`); the
            // queue only has to emit one itself when ITS timeout fires,
            // since nothing else will.
            let (outcome, timed_out) = match self.timeout {
                Some(d) => match tokio::time::timeout(d, fut).await {
                    Ok(o) => (o, false),
                    Err(_) => (RunOutcome::Failed(AgentError::Other("run timed out".to_string())), true),
                },
                None => (fut.await, false),
            };

            match outcome {
                RunOutcome::Completed(_) => {
                    if let Some(broadcaster) = &self.broadcaster {
                        broadcaster.send_done(&run.id);
                    }
                }
                RunOutcome::Suspended => {
                    self.notify_run_waiting(&run.id);
                }
                RunOutcome::Failed(e) if timed_out => {
                    let (code, message) = e.code_message();
                    self.emit(&run, EventPayload::RunFailed { code: code.to_string(), message }).await;
                    if let Some(broadcaster) = &self.broadcaster {
                        broadcaster.send_done(&run.id);
                    }
                }
                RunOutcome::Failed(_) => {
                    if let Some(broadcaster) = &self.broadcaster {
                        broadcaster.send_done(&run.id);
                    }
                }
            }

            self.state.lock().unwrap().running = None;
            self.persist().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::FsEventLog;
    use crate::run::RunnableScope;

    fn run(id: &str) -> Run {
        Run::new(id, RunnableScope::new("o", "u"), "sess", "hi", "agent", "2026-01-01T00:00:00Z")
    }

    fn queue(max_size: usize) -> RunQueue {
        let dir = tempfile::tempdir().unwrap();
        RunQueue::new(max_size, None, None, Arc::new(FsEventLog::new(dir.path())))
    }

    #[tokio::test]
    async fn enqueue_rejects_when_full() {
        let q = queue(1);
        q.enqueue(run("a")).await.unwrap();
        let result = q.enqueue(run("b")).await;
        assert!(matches!(result, Err(AgentError::Validation(_))));
    }

    #[tokio::test]
    async fn process_queue_runs_each_pending_entry_to_completion() {
        let q = Arc::new(queue(10));
        q.set_executor(Arc::new(|_run, _abort| {
            Box::pin(async { RunOutcome::Completed(serde_json::json!("done")) })
        }));
        q.enqueue(run("a")).await.unwrap();
        q.enqueue(run("b")).await.unwrap();
        q.process_queue().await.unwrap();
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn cancel_pending_removes_it_before_it_runs() {
        let q = Arc::new(queue(10));
        let ran = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let ran2 = ran.clone();
        q.set_executor(Arc::new(move |_run, _abort| {
            let ran = ran2.clone();
            Box::pin(async move {
                ran.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                RunOutcome::Completed(Value::Null)
            })
        }));
        q.enqueue(run("a")).await.unwrap();
        q.enqueue(run("b")).await.unwrap();
        assert!(q.cancel("b").await);
        q.process_queue().await.unwrap();
        assert_eq!(ran.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn suspended_run_frees_worker_without_emitting_terminal_event() {
        let q = Arc::new(queue(10));
        q.set_executor(Arc::new(|_run, _abort| Box::pin(async { RunOutcome::Suspended })));
        q.enqueue(run("a")).await.unwrap();
        q.process_queue().await.unwrap();
        assert!(!q.is_empty()); // still counted via the waiting set
    }
}
