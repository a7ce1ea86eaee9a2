//! RunRepository: external interface for scoped persistence (spec §2, §4.10).
//!
//! Grounded on the teacher's `loom-workspace::Store` trait/impl split: the
//! core only depends on this trait, concrete storage (SQLite, filesystem,
//! in-memory) is pluggable. `complete_dependency_atomic` is the one
//! operation the concurrency model (invariant E3) requires to be truly
//! atomic under a single process-wide lock.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AgentError;
use crate::run::{Dependency, DependencyStatus, Run, RunnableScope};

/// Outcome of `complete_dependency_atomic` (spec §4.10 step 1).
#[derive(Clone, Debug)]
pub struct CompleteDependencyOutcome {
    pub dependency: Dependency,
    pub pending_count: usize,
}

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn create_run(&self, run: Run) -> Result<Run, AgentError>;
    async fn get_run(&self, scope: &RunnableScope, run_id: &str) -> Result<Option<Run>, AgentError>;
    /// Scope-unchecked read for system components acting with process
    /// authority (e.g. [`crate::swarm::SwarmCoordinator`] resolving a parent
    /// run it already knows by id from a dependency row).
    async fn get_run_unscoped(&self, run_id: &str) -> Result<Option<Run>, AgentError>;
    async fn update_run(&self, run: Run) -> Result<(), AgentError>;
    async fn list_runs_in_session(
        &self,
        scope: &RunnableScope,
        session_key: &str,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<Run>, usize), AgentError>;

    async fn create_dependency(&self, dependency: Dependency) -> Result<(), AgentError>;
    async fn list_dependencies_of_parent(&self, parent_run_id: &str) -> Result<Vec<Dependency>, AgentError>;

    /// Atomically marks the dependency for `child_run_id` closed and returns
    /// the updated row plus the parent's remaining pending-sibling count.
    /// Returns `None` if `child_run_id` is not a managed dependency.
    async fn complete_dependency_atomic(
        &self,
        child_run_id: &str,
        status: DependencyStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<Option<CompleteDependencyOutcome>, AgentError>;

    async fn set_run_resumed_from_suspension(&self, run_id: &str) -> Result<(), AgentError>;
}

#[derive(Default)]
struct Inner {
    runs: std::collections::HashMap<String, Run>,
    dependencies: Vec<Dependency>,
}

/// Single-process, lock-guarded reference implementation. A SQLite-backed
/// equivalent lives in the `runtime-repository` crate and implements the
/// same trait with the same atomicity contract on `complete_dependency_atomic`.
pub struct InMemoryRunRepository {
    inner: std::sync::Mutex<Inner>,
}

impl Default for InMemoryRunRepository {
    fn default() -> Self {
        Self { inner: std::sync::Mutex::new(Inner::default()) }
    }
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn create_run(&self, run: Run) -> Result<Run, AgentError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.runs.contains_key(&run.id) {
            return Err(AgentError::Validation(format!("run {} already exists", run.id)));
        }
        inner.runs.insert(run.id.clone(), run.clone());
        Ok(run)
    }

    async fn get_run(&self, scope: &RunnableScope, run_id: &str) -> Result<Option<Run>, AgentError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .runs
            .get(run_id)
            .filter(|r| scope.permits(&r.scope))
            .cloned())
    }

    async fn get_run_unscoped(&self, run_id: &str) -> Result<Option<Run>, AgentError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.runs.get(run_id).cloned())
    }

    async fn update_run(&self, run: Run) -> Result<(), AgentError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .runs
            .get(&run.id)
            .ok_or_else(|| AgentError::NotFound(format!("run {} not found", run.id)))?;
        inner.runs.insert(run.id.clone(), run);
        Ok(())
    }

    async fn list_runs_in_session(
        &self,
        scope: &RunnableScope,
        session_key: &str,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<Run>, usize), AgentError> {
        let inner = self.inner.lock().unwrap();
        let mut matching: Vec<Run> = inner
            .runs
            .values()
            .filter(|r| scope.permits(&r.scope) && r.session_key == session_key)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let total = matching.len();
        let start = page.saturating_sub(1) * limit;
        let page_items = matching.into_iter().skip(start).take(limit).collect();
        Ok((page_items, total))
    }

    async fn create_dependency(&self, dependency: Dependency) -> Result<(), AgentError> {
        let mut inner = self.inner.lock().unwrap();
        let duplicate = inner.dependencies.iter().any(|d| {
            d.parent_run_id == dependency.parent_run_id && d.child_run_id == dependency.child_run_id
        });
        if duplicate {
            return Err(AgentError::Validation(format!(
                "dependency ({}, {}) already exists",
                dependency.parent_run_id, dependency.child_run_id
            )));
        }
        inner.dependencies.push(dependency);
        Ok(())
    }

    async fn list_dependencies_of_parent(&self, parent_run_id: &str) -> Result<Vec<Dependency>, AgentError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .dependencies
            .iter()
            .filter(|d| d.parent_run_id == parent_run_id)
            .cloned()
            .collect())
    }

    async fn complete_dependency_atomic(
        &self,
        child_run_id: &str,
        status: DependencyStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<Option<CompleteDependencyOutcome>, AgentError> {
        let mut inner = self.inner.lock().unwrap();
        let parent_run_id = match inner.dependencies.iter().find(|d| d.child_run_id == child_run_id) {
            Some(d) => d.parent_run_id.clone(),
            None => return Ok(None),
        };
        {
            let dep = inner
                .dependencies
                .iter_mut()
                .find(|d| d.child_run_id == child_run_id)
                .expect("looked up above");
            dep.status = status;
            dep.result = result;
            dep.error = error;
        }
        let pending_count = inner
            .dependencies
            .iter()
            .filter(|d| d.parent_run_id == parent_run_id && d.status == DependencyStatus::Pending)
            .count();
        let dependency = inner
            .dependencies
            .iter()
            .find(|d| d.child_run_id == child_run_id)
            .cloned()
            .expect("looked up above");
        Ok(Some(CompleteDependencyOutcome { dependency, pending_count }))
    }

    async fn set_run_resumed_from_suspension(&self, run_id: &str) -> Result<(), AgentError> {
        let mut inner = self.inner.lock().unwrap();
        let run = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| AgentError::NotFound(format!("run {run_id} not found")))?;
        run.transition_to(crate::run::RunStatus::Pending)
            .map_err(AgentError::Validation)?;
        run.suspended_at = None;
        Ok(())
    }
}
