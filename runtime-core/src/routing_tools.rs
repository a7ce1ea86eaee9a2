//! `dispatch_subtasks` / `handoff_to`: the routing tools spec §4.7 names as
//! the ones that trigger suspension, plus `request_human_approval` for the
//! approval path. Grounded on the teacher's Graph-of-Thought task-spawning
//! shape (`agent::got::state::TaskNode`), adapted from in-run task nodes to
//! cross-run child dispatch through [`RunRepository`] and [`RunQueue`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AgentError;
use crate::repository::RunRepository;
use crate::run::Run;
use crate::run_queue::RunQueue;
use crate::tool::{Tool, ToolCallContext, ToolCallOutcome, ToolDefinition, ToolRisk, ToolSource};

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Kicks the queue pump in the background for the children just enqueued.
/// `process_queue` is idempotent and a no-op once the single worker slot is
/// busy running the parent that just suspended, so this just makes sure the
/// pump runs again the moment that slot frees up instead of waiting on the
/// next unrelated HTTP request to nudge it.
fn kick_pump(queue: &Arc<RunQueue>, parent_run_id: &str) {
    let queue = queue.clone();
    let parent_run_id = parent_run_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = queue.process_queue().await {
            tracing::error!("queue pump failed after dispatch from run {parent_run_id}: {e}");
        }
    });
}

fn require_parent_context(ctx: &ToolCallContext) -> Result<(String, String, crate::run::AgentContext), AgentError> {
    let run_id = ctx.run_id.clone().ok_or_else(|| AgentError::Validation("missing parent run id in tool context".to_string()))?;
    let session_key = ctx.session_key.clone().ok_or_else(|| AgentError::Validation("missing session key in tool context".to_string()))?;
    let agent_context = ctx.agent_context.clone().ok_or_else(|| AgentError::Validation("missing agent context".to_string()))?;
    Ok((run_id, session_key, agent_context))
}

async fn spawn_child(
    repository: &Arc<dyn RunRepository>,
    queue: &Arc<RunQueue>,
    parent_run_id: &str,
    session_key: &str,
    tool_call_id: &str,
    agent_context: &crate::run::AgentContext,
    role: &str,
    goal: &str,
) -> Result<String, AgentError> {
    let child_id = format!("run_{}", uuid::Uuid::new_v4());
    let mut child = Run::new(&child_id, agent_context.scope.clone(), session_key, goal, role, now_iso());
    child.parent_run_id = Some(parent_run_id.to_string());
    child.delegated_permissions = agent_context.delegated_permissions.clone();
    let child = repository.create_run(child).await?;
    repository
        .create_dependency(crate::run::Dependency::new(parent_run_id, &child_id, tool_call_id, role, goal))
        .await?;
    queue.enqueue(child).await?;
    Ok(child_id)
}

#[derive(Deserialize)]
struct SubtaskSpec {
    role: String,
    goal: String,
}

#[derive(Deserialize)]
struct DispatchSubtasksArgs {
    tasks: Vec<SubtaskSpec>,
}

/// Fans out `tasks` into one child run per entry (spec §4.7, §8 scenario 5).
pub struct DispatchSubtasksTool {
    repository: Arc<dyn RunRepository>,
    queue: Arc<RunQueue>,
}

impl DispatchSubtasksTool {
    pub fn new(repository: Arc<dyn RunRepository>, queue: Arc<RunQueue>) -> Self {
        Self { repository, queue }
    }
}

#[async_trait]
impl Tool for DispatchSubtasksTool {
    fn name(&self) -> &str {
        "dispatch_subtasks"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "dispatch_subtasks".to_string(),
            description: "Fans out a list of independent subtasks to child agent runs and suspends until all of them finish.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "tasks": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "role": {"type": "string"},
                                "goal": {"type": "string"},
                            },
                            "required": ["role", "goal"],
                        },
                    },
                },
                "required": ["tasks"],
            }),
            risk_level: ToolRisk::Medium,
            mutating: true,
            supports_parallel: false,
            source: ToolSource::Builtin,
        }
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<ToolCallOutcome, AgentError> {
        let args: DispatchSubtasksArgs = serde_json::from_value(args).map_err(|e| AgentError::Validation(format!("dispatch_subtasks: {e}")))?;
        if args.tasks.is_empty() {
            return Err(AgentError::Validation("dispatch_subtasks requires at least one task".to_string()));
        }
        let (parent_run_id, session_key, agent_context) = require_parent_context(ctx)?;
        let tool_call_id = ctx.tool_call_id.clone().ok_or_else(|| AgentError::Validation("dispatch_subtasks missing its own tool call id".to_string()))?;

        let mut child_run_ids = Vec::with_capacity(args.tasks.len());
        for task in &args.tasks {
            let child_id = spawn_child(&self.repository, &self.queue, &parent_run_id, &session_key, &tool_call_id, &agent_context, &task.role, &task.goal).await?;
            child_run_ids.push(child_id);
        }
        kick_pump(&self.queue, &parent_run_id);

        Ok(ToolCallOutcome::RequiresSuspension { requires_suspension: true, child_run_ids })
    }
}

#[derive(Deserialize)]
struct HandoffArgs {
    agent_id: String,
    goal: String,
}

/// Delegates the rest of the task to a single differently-specialized child
/// run and suspends until it completes (spec §4.7, the single-child case of
/// the same routing/suspension contract as `dispatch_subtasks`).
pub struct HandoffToTool {
    repository: Arc<dyn RunRepository>,
    queue: Arc<RunQueue>,
}

impl HandoffToTool {
    pub fn new(repository: Arc<dyn RunRepository>, queue: Arc<RunQueue>) -> Self {
        Self { repository, queue }
    }
}

#[async_trait]
impl Tool for HandoffToTool {
    fn name(&self) -> &str {
        "handoff_to"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "handoff_to".to_string(),
            description: "Hands off the remainder of this task to a single differently-specialized agent and suspends until it completes.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "agent_id": {"type": "string"},
                    "goal": {"type": "string"},
                },
                "required": ["agent_id", "goal"],
            }),
            risk_level: ToolRisk::Medium,
            mutating: true,
            supports_parallel: false,
            source: ToolSource::Builtin,
        }
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<ToolCallOutcome, AgentError> {
        let args: HandoffArgs = serde_json::from_value(args).map_err(|e| AgentError::Validation(format!("handoff_to: {e}")))?;
        let (parent_run_id, session_key, agent_context) = require_parent_context(ctx)?;
        let tool_call_id = ctx.tool_call_id.clone().ok_or_else(|| AgentError::Validation("handoff_to missing its own tool call id".to_string()))?;

        let child_id = spawn_child(&self.repository, &self.queue, &parent_run_id, &session_key, &tool_call_id, &agent_context, &args.agent_id, &args.goal).await?;
        kick_pump(&self.queue, &parent_run_id);

        Ok(ToolCallOutcome::RequiresSuspension { requires_suspension: true, child_run_ids: vec![child_id] })
    }
}

#[derive(Deserialize)]
struct ApprovalArgs {
    reason: String,
}

/// Suspends the run pending a human decision delivered through
/// `POST /api/runs/:id/approve` (spec §4.7 "awaiting approval").
pub struct RequestHumanApprovalTool;

#[async_trait]
impl Tool for RequestHumanApprovalTool {
    fn name(&self) -> &str {
        "request_human_approval"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "request_human_approval".to_string(),
            description: "Pauses the run and waits for a human to approve before continuing.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "reason": {"type": "string"} },
                "required": ["reason"],
            }),
            risk_level: ToolRisk::High,
            mutating: false,
            supports_parallel: false,
            source: ToolSource::Builtin,
        }
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<ToolCallOutcome, AgentError> {
        let _args: ApprovalArgs = serde_json::from_value(args).map_err(|e| AgentError::Validation(format!("request_human_approval: {e}")))?;
        let tool_call_id = ctx.tool_call_id.clone().ok_or_else(|| AgentError::Validation("request_human_approval missing its own tool call id".to_string()))?;
        Ok(ToolCallOutcome::RequiresApproval { requires_approval: true, tool_call_id })
    }
}
