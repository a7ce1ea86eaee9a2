//! Run and Dependency data model (spec §3, §4.9).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// (org, user, optional project) triple isolating all reads and writes
/// (spec §3 "Ownership", §6 "Scope headers").
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RunnableScope {
    pub org_id: String,
    pub user_id: String,
    pub project_id: Option<String>,
}

impl RunnableScope {
    pub fn new(org_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            user_id: user_id.into(),
            project_id: None,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Whether `other` may read/write records under this scope. A project id
    /// on the record narrows visibility further when the caller supplies one.
    pub fn permits(&self, other: &RunnableScope) -> bool {
        self.org_id == other.org_id
            && self.user_id == other.user_id
            && match (&self.project_id, &other.project_id) {
                (Some(a), Some(b)) => a == b,
                (None, _) => true,
                (Some(_), None) => false,
            }
    }
}

/// Run status state machine (spec §4.9). Transitions enforced by
/// [`Run::transition_to`]: no transition out of a terminal state.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Suspended,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Delegated tool-permission record inherited from a parent run, or attached
/// directly to a run's [`AgentContext`].
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct DelegatedPermissions {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

/// Scope, agent id, and tool allow/deny lists a run executes under (spec §3
/// "AgentContext"). Consumed by [`crate::tool_policy::ToolPolicy`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AgentContext {
    pub scope: RunnableScope,
    pub agent_id: String,
    pub allowed_tools: Vec<String>,
    pub denied_tools: Vec<String>,
    pub delegated_permissions: Option<DelegatedPermissions>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct RunError {
    pub code: String,
    pub message: String,
}

/// One end-to-end task execution (spec §3 "Run").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub scope: RunnableScope,
    pub session_key: String,
    pub input: String,
    pub agent_id: String,
    pub status: RunStatus,
    pub parent_run_id: Option<String>,
    pub delegated_permissions: Option<DelegatedPermissions>,
    pub model_config: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<RunError>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub cancelled_at: Option<String>,
    pub suspended_at: Option<String>,
}

impl Run {
    pub fn new(
        id: impl Into<String>,
        scope: RunnableScope,
        session_key: impl Into<String>,
        input: impl Into<String>,
        agent_id: impl Into<String>,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            scope,
            session_key: session_key.into(),
            input: input.into(),
            agent_id: agent_id.into(),
            status: RunStatus::Pending,
            parent_run_id: None,
            delegated_permissions: None,
            model_config: None,
            result: None,
            error: None,
            created_at: created_at.into(),
            started_at: None,
            ended_at: None,
            cancelled_at: None,
            suspended_at: None,
        }
    }

    /// Applies a status transition, rejecting any attempt to leave a
    /// terminal state (spec §4.9 invariant).
    pub fn transition_to(&mut self, next: RunStatus) -> Result<(), String> {
        if self.status.is_terminal() {
            return Err(format!(
                "cannot transition terminal run {:?} to {:?}",
                self.status, next
            ));
        }
        self.status = next;
        Ok(())
    }
}

/// Status of one parent→child link (spec §3 "Dependency").
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DependencyStatus {
    Pending,
    Completed,
    Failed,
}

/// Row linking a parent run to a child run via the tool call that spawned it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dependency {
    pub parent_run_id: String,
    pub child_run_id: String,
    pub tool_call_id: String,
    pub role: String,
    pub goal: String,
    pub status: DependencyStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl Dependency {
    pub fn new(
        parent_run_id: impl Into<String>,
        child_run_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        role: impl Into<String>,
        goal: impl Into<String>,
    ) -> Self {
        Self {
            parent_run_id: parent_run_id.into(),
            child_run_id: child_run_id.into(),
            tool_call_id: tool_call_id.into(),
            role: role.into(),
            goal: goal.into(),
            status: DependencyStatus::Pending,
            result: None,
            error: None,
        }
    }
}
