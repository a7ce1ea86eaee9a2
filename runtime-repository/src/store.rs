//! SQLite-backed [`RunRepository`]: runs and parent/child dependency rows.
//!
//! Grounded on the teacher's `Store` (`Arc<Mutex<rusqlite::Connection>>` plus
//! `tokio::task::block_in_place` around synchronous queries); the workspace/
//! thread schema is replaced with the run/dependency schema `RunRepository`
//! needs, keeping the same locking and error-mapping idiom.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use runtime_core::{
    AgentError, CompleteDependencyOutcome, Dependency, DependencyStatus, Run, RunRepository,
    RunStatus, RunnableScope,
};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage: {0}")]
    Storage(String),
}

impl From<StoreError> for AgentError {
    fn from(e: StoreError) -> Self {
        AgentError::Other(e.to_string())
    }
}

/// SQLite-backed [`RunRepository`] implementation.
pub struct SqliteRunRepository {
    db: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteRunRepository {
    /// Opens or creates the database and tables.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open(path.as_ref()).map_err(|e| StoreError::Storage(e.to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                project_id TEXT,
                session_key TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_runs_session ON runs(session_key);
            CREATE TABLE IF NOT EXISTS dependencies (
                child_run_id TEXT PRIMARY KEY,
                parent_run_id TEXT NOT NULL,
                tool_call_id TEXT NOT NULL,
                status TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_dependencies_parent ON dependencies(parent_run_id);
            "#,
        )
        .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(Self { db: Arc::new(Mutex::new(conn)) })
    }

    fn status_str(status: RunStatus) -> &'static str {
        match status {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Suspended => "suspended",
            RunStatus::Waiting => "waiting",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    fn dependency_status_str(status: DependencyStatus) -> &'static str {
        match status {
            DependencyStatus::Pending => "pending",
            DependencyStatus::Completed => "completed",
            DependencyStatus::Failed => "failed",
        }
    }

    fn row_to_run(data: String) -> Result<Run, AgentError> {
        serde_json::from_str(&data).map_err(|e| AgentError::Other(format!("corrupt run row: {e}")))
    }

    fn row_to_dependency(data: String) -> Result<Dependency, AgentError> {
        serde_json::from_str(&data).map_err(|e| AgentError::Other(format!("corrupt dependency row: {e}")))
    }
}

#[async_trait]
impl RunRepository for SqliteRunRepository {
    async fn create_run(&self, run: Run) -> Result<Run, AgentError> {
        let db = self.db.clone();
        let data = serde_json::to_string(&run).map_err(|e| AgentError::Validation(e.to_string()))?;
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| AgentError::Other("run store lock poisoned".to_string()))?;
            let existing: i64 = conn
                .query_row("SELECT COUNT(*) FROM runs WHERE id = ?1", [&run.id], |row| row.get(0))
                .map_err(|e| AgentError::Other(e.to_string()))?;
            if existing > 0 {
                return Err(AgentError::Validation(format!("run {} already exists", run.id)));
            }
            conn.execute(
                "INSERT INTO runs (id, org_id, user_id, project_id, session_key, status, created_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    run.id,
                    run.scope.org_id,
                    run.scope.user_id,
                    run.scope.project_id,
                    run.session_key,
                    Self::status_str(run.status),
                    run.created_at,
                    data,
                ],
            )
            .map_err(|e| AgentError::Other(e.to_string()))?;
            Ok(run)
        })
    }

    async fn get_run(&self, scope: &RunnableScope, run_id: &str) -> Result<Option<Run>, AgentError> {
        let db = self.db.clone();
        let run_id = run_id.to_string();
        let scope = scope.clone();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| AgentError::Other("run store lock poisoned".to_string()))?;
            let data: Option<String> = conn
                .query_row("SELECT data FROM runs WHERE id = ?1", [&run_id], |row| row.get(0))
                .ok();
            match data {
                Some(d) => {
                    let run = Self::row_to_run(d)?;
                    Ok(if scope.permits(&run.scope) { Some(run) } else { None })
                }
                None => Ok(None),
            }
        })
    }

    async fn get_run_unscoped(&self, run_id: &str) -> Result<Option<Run>, AgentError> {
        let db = self.db.clone();
        let run_id = run_id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| AgentError::Other("run store lock poisoned".to_string()))?;
            let data: Option<String> = conn
                .query_row("SELECT data FROM runs WHERE id = ?1", [&run_id], |row| row.get(0))
                .ok();
            data.map(Self::row_to_run).transpose()
        })
    }

    async fn update_run(&self, run: Run) -> Result<(), AgentError> {
        let db = self.db.clone();
        let data = serde_json::to_string(&run).map_err(|e| AgentError::Validation(e.to_string()))?;
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| AgentError::Other("run store lock poisoned".to_string()))?;
            let changed = conn
                .execute(
                    "UPDATE runs SET org_id = ?2, user_id = ?3, project_id = ?4, session_key = ?5, status = ?6, data = ?7
                     WHERE id = ?1",
                    rusqlite::params![
                        run.id,
                        run.scope.org_id,
                        run.scope.user_id,
                        run.scope.project_id,
                        run.session_key,
                        Self::status_str(run.status),
                        data,
                    ],
                )
                .map_err(|e| AgentError::Other(e.to_string()))?;
            if changed == 0 {
                return Err(AgentError::NotFound(format!("run {} not found", run.id)));
            }
            Ok(())
        })
    }

    async fn list_runs_in_session(
        &self,
        scope: &RunnableScope,
        session_key: &str,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<Run>, usize), AgentError> {
        let db = self.db.clone();
        let session_key = session_key.to_string();
        let scope = scope.clone();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| AgentError::Other("run store lock poisoned".to_string()))?;
            let mut stmt = conn
                .prepare("SELECT data FROM runs WHERE session_key = ?1 ORDER BY created_at ASC")
                .map_err(|e| AgentError::Other(e.to_string()))?;
            let rows = stmt
                .query_map([&session_key], |row| row.get::<_, String>(0))
                .map_err(|e| AgentError::Other(e.to_string()))?;
            let mut matching = Vec::new();
            for row in rows {
                let run = Self::row_to_run(row.map_err(|e| AgentError::Other(e.to_string()))?)?;
                if scope.permits(&run.scope) {
                    matching.push(run);
                }
            }
            let total = matching.len();
            let start = page.saturating_sub(1) * limit;
            let page_items = matching.into_iter().skip(start).take(limit).collect();
            Ok((page_items, total))
        })
    }

    async fn create_dependency(&self, dependency: Dependency) -> Result<(), AgentError> {
        let db = self.db.clone();
        let data = serde_json::to_string(&dependency).map_err(|e| AgentError::Validation(e.to_string()))?;
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| AgentError::Other("run store lock poisoned".to_string()))?;
            conn.execute(
                "INSERT INTO dependencies (child_run_id, parent_run_id, tool_call_id, status, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    dependency.child_run_id,
                    dependency.parent_run_id,
                    dependency.tool_call_id,
                    Self::dependency_status_str(dependency.status),
                    data,
                ],
            )
            .map_err(|e| {
                if e.to_string().contains("UNIQUE") {
                    AgentError::Validation(format!(
                        "dependency ({}, {}) already exists",
                        dependency.parent_run_id, dependency.child_run_id
                    ))
                } else {
                    AgentError::Other(e.to_string())
                }
            })?;
            Ok(())
        })
    }

    async fn list_dependencies_of_parent(&self, parent_run_id: &str) -> Result<Vec<Dependency>, AgentError> {
        let db = self.db.clone();
        let parent_run_id = parent_run_id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| AgentError::Other("run store lock poisoned".to_string()))?;
            let mut stmt = conn
                .prepare("SELECT data FROM dependencies WHERE parent_run_id = ?1")
                .map_err(|e| AgentError::Other(e.to_string()))?;
            let rows = stmt
                .query_map([&parent_run_id], |row| row.get::<_, String>(0))
                .map_err(|e| AgentError::Other(e.to_string()))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(Self::row_to_dependency(row.map_err(|e| AgentError::Other(e.to_string()))?)?);
            }
            Ok(out)
        })
    }

    async fn complete_dependency_atomic(
        &self,
        child_run_id: &str,
        status: DependencyStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<Option<CompleteDependencyOutcome>, AgentError> {
        let db = self.db.clone();
        let child_run_id = child_run_id.to_string();
        tokio::task::block_in_place(move || {
            let mut conn = db.lock().map_err(|_| AgentError::Other("run store lock poisoned".to_string()))?;
            let tx = conn.transaction().map_err(|e| AgentError::Other(e.to_string()))?;

            let data: Option<String> = tx
                .query_row("SELECT data FROM dependencies WHERE child_run_id = ?1", [&child_run_id], |row| row.get(0))
                .ok();
            let Some(data) = data else { return Ok(None) };
            let mut dependency = Self::row_to_dependency(data)?;
            dependency.status = status;
            dependency.result = result;
            dependency.error = error;
            let updated_data = serde_json::to_string(&dependency).map_err(|e| AgentError::Validation(e.to_string()))?;

            tx.execute(
                "UPDATE dependencies SET status = ?2, data = ?3 WHERE child_run_id = ?1",
                rusqlite::params![child_run_id, Self::dependency_status_str(status), updated_data],
            )
            .map_err(|e| AgentError::Other(e.to_string()))?;

            let pending_count: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM dependencies WHERE parent_run_id = ?1 AND status = 'pending'",
                    [&dependency.parent_run_id],
                    |row| row.get(0),
                )
                .map_err(|e| AgentError::Other(e.to_string()))?;

            tx.commit().map_err(|e| AgentError::Other(e.to_string()))?;
            Ok(Some(CompleteDependencyOutcome { dependency, pending_count: pending_count as usize }))
        })
    }

    async fn set_run_resumed_from_suspension(&self, run_id: &str) -> Result<(), AgentError> {
        let db = self.db.clone();
        let run_id = run_id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| AgentError::Other("run store lock poisoned".to_string()))?;
            let data: Option<String> = conn
                .query_row("SELECT data FROM runs WHERE id = ?1", [&run_id], |row| row.get(0))
                .ok();
            let data = data.ok_or_else(|| AgentError::NotFound(format!("run {run_id} not found")))?;
            let mut run = Self::row_to_run(data)?;
            run.transition_to(RunStatus::Pending).map_err(AgentError::Validation)?;
            run.suspended_at = None;
            let updated = serde_json::to_string(&run).map_err(|e| AgentError::Validation(e.to_string()))?;
            conn.execute(
                "UPDATE runs SET status = ?2, data = ?3 WHERE id = ?1",
                rusqlite::params![run_id, Self::status_str(run.status), updated],
            )
            .map_err(|e| AgentError::Other(e.to_string()))?;
            Ok(())
        })
    }
}
