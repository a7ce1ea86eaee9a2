//! SwarmCoordinator: bridges child-run terminal events to parent wake-up
//! (spec §4.10, invariant E3).
//!
//! Grounded on the teacher's Graph-of-Thought module
//! (`agent::got::state::{TaskGraph, TaskNode, TaskNodeState, TaskStatus}`):
//! the same "DAG of sub-tasks with per-node status, wake the consumer once
//! all deps settle" shape, retargeted from in-run task nodes to cross-run
//! parent/child dependency rows.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::error::AgentError;
use crate::message::Message;
use crate::repository::RunRepository;
use crate::run::DependencyStatus;
use crate::run_queue::{RunOutcome, RunQueue};

pub struct SwarmCoordinator {
    repository: Arc<dyn RunRepository>,
    checkpoints: Arc<dyn CheckpointStore>,
    queue: Arc<RunQueue>,
}

impl SwarmCoordinator {
    pub fn new(repository: Arc<dyn RunRepository>, checkpoints: Arc<dyn CheckpointStore>, queue: Arc<RunQueue>) -> Self {
        Self { repository, checkpoints, queue }
    }

    /// `onChildTerminal` (spec §4.10 steps 1-6). Returns `true` if this call
    /// was the one that woke the parent (pendingCount reached zero),
    /// `false` if siblings are still pending or `child_run_id` is not a
    /// managed dependency.
    pub async fn on_child_terminal(
        &self,
        child_run_id: &str,
        status: DependencyStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<bool, AgentError> {
        // Step 1: atomically close the dependency.
        let outcome = match self
            .repository
            .complete_dependency_atomic(child_run_id, status, result, error)
            .await?
        {
            Some(o) => o,
            None => return Ok(false),
        };

        // Step 2: siblings still running.
        if outcome.pending_count > 0 {
            return Ok(false);
        }

        let parent_run_id = outcome.dependency.parent_run_id.clone();

        // Step 3: group all of the parent's dependencies by originating tool-call id.
        let all_deps = self.repository.list_dependencies_of_parent(&parent_run_id).await?;
        let mut by_call: std::collections::BTreeMap<String, Vec<_>> = std::collections::BTreeMap::new();
        for dep in all_deps {
            by_call.entry(dep.tool_call_id.clone()).or_default().push(dep);
        }

        let mut synthetic_messages = Vec::new();
        for (tool_call_id, deps) in by_call {
            let entries: Vec<Value> = deps
                .iter()
                .map(|d| {
                    let status_str = match d.status {
                        DependencyStatus::Pending => "pending",
                        DependencyStatus::Completed => "completed",
                        DependencyStatus::Failed => "failed",
                    };
                    serde_json::json!({
                        "child_run_id": d.child_run_id,
                        "role": d.role,
                        "goal": d.goal,
                        "status": status_str,
                        "result_or_error": d.result.clone().unwrap_or_else(|| Value::String(d.error.clone().unwrap_or_default())),
                    })
                })
                .collect();
            let content = serde_json::json!({ "child_results": entries }).to_string();
            synthetic_messages.push(Message::tool(tool_call_id, content));
        }

        let parent = self
            .repository
            .get_run_unscoped(&parent_run_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("parent run {parent_run_id} not found")))?;

        // Step 4.
        self.checkpoints
            .append_tool_results(&parent.session_key, &parent_run_id, synthetic_messages)
            .await?;

        // Step 5.
        self.repository.set_run_resumed_from_suspension(&parent_run_id).await?;

        // Step 6.
        let mut resumed = parent;
        resumed.status = crate::run::RunStatus::Pending;
        resumed.suspended_at = None;
        self.queue.notify_run_resumed(&parent_run_id);
        self.queue.enqueue(resumed).await?;

        // Kick the pump in the background; `process_queue` is idempotent and
        // a no-op if the worker slot is already busy (mirrors the HTTP
        // layer's own `spawn_pump` after a manual resume/approve).
        let queue = self.queue.clone();
        let woken_run_id = parent_run_id.clone();
        tokio::spawn(async move {
            if let Err(e) = queue.process_queue().await {
                tracing::error!("queue pump failed after waking run {woken_run_id}: {e}");
            }
        });

        info!("woke parent run {parent_run_id} after fan-in");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::FsCheckpointStore;
    use crate::event_log::FsEventLog;
    use crate::repository::InMemoryRunRepository;
    use crate::run::{Dependency, Run, RunStatus, RunnableScope};
    use std::sync::Arc;

    fn setup() -> (Arc<InMemoryRunRepository>, Arc<FsCheckpointStore>, Arc<RunQueue>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(InMemoryRunRepository::new());
        let checkpoints = Arc::new(FsCheckpointStore::new(dir.path()));
        let event_log = Arc::new(FsEventLog::new(dir.path()));
        let queue = Arc::new(RunQueue::new(100, None, None, event_log));
        (repo, checkpoints, queue, dir)
    }

    #[tokio::test]
    async fn wakes_parent_exactly_once_under_concurrent_sibling_completion() {
        let (repo, checkpoints, queue, _dir) = setup();
        let scope = RunnableScope::new("*", "*");

        let mut parent = Run::new("parent", scope.clone(), "sess", "dispatch", "agent", "2026-01-01T00:00:00Z");
        parent.status = RunStatus::Suspended;
        repo.create_run(parent).await.unwrap();
        checkpoints
            .save_latest("sess", "parent", &crate::checkpoint::Checkpoint::new(1, vec![], serde_json::json!({})))
            .await
            .unwrap();

        repo.create_dependency(Dependency::new("parent", "child_a", "call_1", "role_a", "goal a")).await.unwrap();
        repo.create_dependency(Dependency::new("parent", "child_b", "call_1", "role_b", "goal b")).await.unwrap();

        let coordinator = Arc::new(SwarmCoordinator::new(repo.clone(), checkpoints.clone(), queue.clone()));

        let c1 = coordinator.clone();
        let c2 = coordinator.clone();
        let (r1, r2) = tokio::join!(
            c1.on_child_terminal("child_a", DependencyStatus::Completed, Some(serde_json::json!("a done")), None),
            c2.on_child_terminal("child_b", DependencyStatus::Completed, Some(serde_json::json!("b done")), None),
        );
        let wakes = [r1.unwrap(), r2.unwrap()].iter().filter(|w| **w).count();
        assert_eq!(wakes, 1);

        let checkpoint = checkpoints.load_latest("sess", "parent").await.unwrap().unwrap();
        assert_eq!(checkpoint.messages.len(), 1);
        let Message::Tool { tool_call_id, content } = &checkpoint.messages[0] else { panic!() };
        assert_eq!(tool_call_id, "call_1");
        assert!(content.contains("child_a") && content.contains("child_b"));
    }

    #[tokio::test]
    async fn single_pending_sibling_does_not_wake_parent() {
        let (repo, checkpoints, queue, _dir) = setup();
        let scope = RunnableScope::new("*", "*");
        let mut parent = Run::new("parent", scope, "sess", "dispatch", "agent", "2026-01-01T00:00:00Z");
        parent.status = RunStatus::Suspended;
        repo.create_run(parent).await.unwrap();
        repo.create_dependency(Dependency::new("parent", "child_a", "call_1", "role_a", "goal a")).await.unwrap();
        repo.create_dependency(Dependency::new("parent", "child_b", "call_1", "role_b", "goal b")).await.unwrap();

        let coordinator = SwarmCoordinator::new(repo, checkpoints, queue);
        let woke = coordinator
            .on_child_terminal("child_a", DependencyStatus::Completed, Some(serde_json::json!("a")), None)
            .await
            .unwrap();
        assert!(!woke);
    }

    #[tokio::test]
    async fn unmanaged_child_is_a_no_op() {
        let (repo, checkpoints, queue, _dir) = setup();
        let coordinator = SwarmCoordinator::new(repo, checkpoints, queue);
        let woke = coordinator
            .on_child_terminal("not_tracked", DependencyStatus::Completed, None, None)
            .await
            .unwrap();
        assert!(!woke);
    }
}
