//! AgentRunner: the plan/act/observe step loop (spec §4.7).
//!
//! Grounded on the teacher's ReAct graph (`think -> act -> observe ->
//! compress -> think`) and on the `Node::run` / `NodeMiddleware::around_run`
//! step-function and around-wrapping shapes. The generic `StateGraph`
//! compiler those shapes originally ran inside was filtered out of the
//! retrieval pack (see DESIGN.md); since spec.md's AgentRunner is a fixed
//! step loop rather than an arbitrary branching graph, it is implemented
//! here as a direct async loop over the same stages instead.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::context::{CompactionReport, Compactor, ContextBuilder, ContextInputs, TokenBudgetManager};
use crate::event_log::EventLog;
use crate::llm::LlmClient;
use crate::memory_service::MemoryService;
use crate::message::{orphan_tool_call_ids, Message};
use crate::retry::RetryPolicy;
use crate::run::{AgentContext, RunnableScope};
use crate::sse::SSEBroadcaster;
use crate::tool::{ToolCallContext, ToolDefinition};
use crate::tool_router::ToolRouter;
use crate::tool_scheduler::ToolScheduler;
use runtime_stream::{EventPayload, Redaction, RunEvent};

const ORPHAN_STUB: &str = "[synthetic: no result recorded]";

fn step_id(step_number: u32) -> String {
    format!("step_{step_number:04}")
}

#[derive(Clone, Debug)]
pub struct ResumeFrom {
    pub step_number: u32,
    pub messages: Vec<Message>,
    pub working_state: Value,
}

/// Static configuration for one [`AgentRunner::run`] invocation.
pub struct RunnerConfig {
    pub max_steps: u32,
    pub base_system_prompt: String,
    pub provider_hints: Option<String>,
    pub cwd: String,
    pub available_groups: Vec<String>,
    pub skill_fragments: Vec<String>,
    pub max_context_tokens: u32,
    pub reserve_tokens: u32,
    pub memory_query: Option<String>,
    pub tool_timeout: Duration,
    pub tool_max_parallelism: usize,
    pub retry_policy: RetryPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_steps: 25,
            base_system_prompt: String::new(),
            provider_hints: None,
            cwd: "/".to_string(),
            available_groups: Vec::new(),
            skill_fragments: Vec::new(),
            max_context_tokens: 128_000,
            reserve_tokens: 4_000,
            memory_query: None,
            tool_timeout: Duration::from_secs(30),
            tool_max_parallelism: 4,
            retry_policy: RetryPolicy::exponential(2, Duration::from_millis(200), Duration::from_secs(5), 2.0),
        }
    }
}

/// What one `run` invocation resolved to.
pub enum RunnerOutcome {
    Completed { result: Value },
    Suspended { tool_call_id: String, child_run_ids: Vec<String> },
    AwaitingApproval { tool_call_id: String },
    Failed { code: String, message: String },
}

pub struct AgentRunner {
    event_log: Arc<dyn EventLog>,
    checkpoints: Arc<dyn CheckpointStore>,
    llm: Arc<dyn LlmClient>,
    tool_router: Arc<ToolRouter>,
    tool_scheduler: ToolScheduler,
    memory: Arc<dyn MemoryService>,
    context_builder: ContextBuilder,
    compactor: Compactor,
    broadcaster: Option<Arc<SSEBroadcaster>>,
}

impl AgentRunner {
    pub fn new(
        event_log: Arc<dyn EventLog>,
        checkpoints: Arc<dyn CheckpointStore>,
        llm: Arc<dyn LlmClient>,
        tool_router: Arc<ToolRouter>,
        memory: Arc<dyn MemoryService>,
    ) -> Self {
        Self {
            event_log,
            checkpoints,
            llm,
            tool_scheduler: ToolScheduler::new(4),
            tool_router,
            memory,
            context_builder: ContextBuilder::default(),
            compactor: Compactor::default(),
            broadcaster: None,
        }
    }

    /// Fans every event this runner appends out to live SSE subscribers of
    /// the run it belongs to, in addition to the durable log (spec §4.11).
    pub fn with_broadcaster(mut self, broadcaster: Arc<SSEBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    async fn emit(&self, session_key: &str, run_id: &str, agent_id: &str, step_number: u32, payload: EventPayload) {
        let event = RunEvent {
            v: 1,
            ts: chrono::Utc::now().to_rfc3339(),
            session_key: session_key.to_string(),
            run_id: run_id.to_string(),
            agent_id: agent_id.to_string(),
            step_id: step_id(step_number),
            span_id: uuid::Uuid::new_v4().to_string(),
            parent_span_id: None,
            redaction: Redaction::default(),
            payload,
        };
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast_to_run(run_id, &event);
        }
        if let Err(e) = self.event_log.append(event).await {
            warn!("failed to append event for run {run_id}: {e}");
        }
    }

    /// Runs `agent_context`'s input to completion, suspension, approval-wait,
    /// or failure (spec §4.7). `resume_from` rehydrates an in-progress run;
    /// pass `None` for a fresh run whose only message so far is the user
    /// input.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        session_key: &str,
        run_id: &str,
        config: &RunnerConfig,
        agent_context: &AgentContext,
        input: &str,
        resume_from: Option<ResumeFrom>,
        abort_signal: watch::Receiver<bool>,
    ) -> RunnerOutcome {
        let mut budget = TokenBudgetManager::new(config.max_context_tokens, config.reserve_tokens);

        let (mut step_number, mut messages, mut working_state) = match resume_from {
            Some(resume) => {
                let repaired = self.repair_orphans(resume.messages, run_id).await;
                let next_step = resume.step_number + 1;
                self.emit(session_key, run_id, &agent_context.agent_id, next_step, EventPayload::RunResumed { step_number: next_step }).await;
                (next_step, repaired, resume.working_state)
            }
            None => {
                self.emit(session_key, run_id, &agent_context.agent_id, 0, EventPayload::RunStarted { input: input.to_string() }).await;
                (0, vec![Message::user(input.to_string())], serde_json::json!({}))
            }
        };

        let memory_hits = if let Some(query) = &config.memory_query {
            self.memory
                .search(&agent_context.scope, query, 5)
                .await
                .unwrap_or_else(|e| {
                    warn!("memory search failed for run {run_id}: {e}");
                    Vec::new()
                })
        } else {
            Vec::new()
        };

        loop {
            // Step 1: abort check.
            if *abort_signal.borrow() {
                return RunnerOutcome::Failed { code: "CANCELLED".to_string(), message: "run cancelled".to_string() };
            }

            if step_number >= config.max_steps {
                let message = "Max steps reached".to_string();
                self.save_failure_checkpoint(session_key, run_id, step_number, &messages, &working_state).await;
                self.emit(session_key, run_id, &agent_context.agent_id, step_number, EventPayload::RunFailed { code: "MAX_STEPS".to_string(), message: message.clone() }).await;
                return RunnerOutcome::Failed { code: "MAX_STEPS".to_string(), message };
            }

            self.emit(session_key, run_id, &agent_context.agent_id, step_number, EventPayload::StepStarted { step_number }).await;

            // Step 2: compaction check.
            let estimated_prompt_tokens = messages.iter().map(|m| m.content_len() / 4).sum::<usize>() as u32;
            if budget.should_compact(estimated_prompt_tokens) {
                budget.begin_compaction();
                let (compacted, report) = self.compactor.compact_messages(&messages);
                messages = compacted;
                budget.record_compaction();
                self.log_compaction(session_key, run_id, &agent_context.agent_id, step_number, &report).await;
            }
            let budget_warning = if budget.should_warn(estimated_prompt_tokens) {
                Some("approaching the context token budget; consider wrapping up".to_string())
            } else {
                None
            };

            // Step 3: compose.
            let tool_defs = self.tool_router.list_tools().await;
            let available_tool_names: Vec<String> = tool_defs.iter().map(|d| d.name.clone()).collect();
            let inputs = ContextInputs {
                base_system_prompt: &config.base_system_prompt,
                provider_hints: config.provider_hints.as_deref(),
                allowed_tools: &agent_context.allowed_tools,
                denied_tools: &agent_context.denied_tools,
                cwd: &config.cwd,
                date: &chrono::Utc::now().to_rfc3339(),
                available_tool_names: &available_tool_names,
                available_groups: &config.available_groups,
                skill_fragments: &config.skill_fragments,
                memory_hits: &memory_hits,
                budget_warning: budget_warning.as_deref(),
                history: &messages,
            };
            let composed = self.context_builder.compose(&inputs);

            // Step 4: call the LLM through the retry policy.
            let tool_defs_for_call = tool_defs.clone();
            let llm = self.llm.clone();
            let attempts_counter = std::sync::atomic::AtomicU32::new(0);
            let outcome = config
                .retry_policy
                .execute(abort_signal.clone(), || {
                    attempts_counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    let llm = llm.clone();
                    let composed = composed.clone();
                    let tool_defs_for_call = tool_defs_for_call.clone();
                    async move { llm.invoke(&composed, &tool_defs_for_call).await }
                })
                .await;

            let response = match outcome {
                Ok(o) => {
                    if o.attempts > 1 {
                        self.emit(session_key, run_id, &agent_context.agent_id, step_number, EventPayload::StepRetried { attempt: o.attempts, reason: "llm call retried".to_string() }).await;
                    }
                    o.result
                }
                Err(e) => {
                    let (code, message) = e.code_message();
                    self.save_failure_checkpoint(session_key, run_id, step_number, &messages, &working_state).await;
                    self.emit(session_key, run_id, &agent_context.agent_id, step_number, EventPayload::RunFailed { code: code.to_string(), message: message.clone() }).await;
                    return RunnerOutcome::Failed { code: code.to_string(), message };
                }
            };

            self.emit(
                session_key,
                run_id,
                &agent_context.agent_id,
                step_number,
                EventPayload::LlmCalled {
                    prompt_tokens: response.usage.prompt_tokens,
                    completion_tokens: response.usage.completion_tokens,
                    total_tokens: response.usage.total_tokens,
                },
            )
            .await;

            // Step 6: no tool calls -> final answer.
            if !response.has_tool_calls() {
                messages.push(Message::assistant(response.content.clone()));
                self.emit(session_key, run_id, &agent_context.agent_id, step_number, EventPayload::StepCompleted { step_number, final_answer: true }).await;
                self.save_checkpoint(session_key, run_id, step_number, &messages, &working_state).await;
                let result = serde_json::json!({ "content": response.content });
                self.emit(session_key, run_id, &agent_context.agent_id, step_number, EventPayload::RunCompleted { result: result.clone() }).await;
                return RunnerOutcome::Completed { result };
            }

            // Step 5: dispatch tool calls.
            messages.push(Message::assistant_with_tool_calls(response.content.clone(), response.tool_calls.clone()));

            let tool_ctx = ToolCallContext {
                recent_messages: messages.clone(),
                agent_context: Some(agent_context.clone()),
                run_id: Some(run_id.to_string()),
                session_key: Some(session_key.to_string()),
                tool_call_id: None,
            };

            let defs_lookup = move |name: &str| -> Option<ToolDefinition> {
                tool_defs.iter().find(|d| d.name == name).cloned()
            };
            let tool_messages = self
                .tool_scheduler
                .run_step(&self.tool_router, &response.tool_calls, &defs_lookup, &tool_ctx)
                .await;

            if let Some(outcome) = self.detect_suspension(&tool_messages) {
                messages.extend(tool_messages);
                self.save_checkpoint(session_key, run_id, step_number, &messages, &working_state).await;
                let reason = match &outcome {
                    RunnerOutcome::Suspended { tool_call_id, .. } => (tool_call_id.clone(), "fan-out suspension"),
                    RunnerOutcome::AwaitingApproval { tool_call_id } => (tool_call_id.clone(), "awaiting human approval"),
                    _ => unreachable!("detect_suspension only returns Suspended or AwaitingApproval"),
                };
                self.emit(
                    session_key,
                    run_id,
                    &agent_context.agent_id,
                    step_number,
                    EventPayload::RunSuspended { reason: reason.1.to_string(), tool_call_id: Some(reason.0) },
                )
                .await;
                return outcome;
            }
            messages.extend(tool_messages);

            self.emit(session_key, run_id, &agent_context.agent_id, step_number, EventPayload::StepCompleted { step_number, final_answer: false }).await;

            // Step 7: persist and advance.
            self.save_checkpoint(session_key, run_id, step_number, &messages, &working_state).await;
            step_number += 1;
        }
    }

    /// Scans this step's tool-role results for a suspension/approval marker
    /// (the JSON shape [`crate::tool::ToolCallOutcome::RequiresSuspension`] /
    /// `RequiresApproval` serialize to, once a handler returns one and
    /// [`ToolRouter::call_tool`] turns it into message content). A suspending
    /// result pre-empts the rest of the step loop (spec §4.7).
    fn detect_suspension(&self, tool_messages: &[Message]) -> Option<RunnerOutcome> {
        for message in tool_messages {
            let Message::Tool { tool_call_id, content } = message else { continue };
            let Ok(value) = serde_json::from_str::<Value>(content) else { continue };
            if value.get("requires_suspension").and_then(Value::as_bool) == Some(true) {
                let child_run_ids = value
                    .get("child_run_ids")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                return Some(RunnerOutcome::Suspended { tool_call_id: tool_call_id.clone(), child_run_ids });
            }
            if value.get("requires_approval").and_then(Value::as_bool) == Some(true) {
                return Some(RunnerOutcome::AwaitingApproval { tool_call_id: tool_call_id.clone() });
            }
        }
        None
    }

    async fn repair_orphans(&self, mut messages: Vec<Message>, run_id: &str) -> Vec<Message> {
        let orphans = orphan_tool_call_ids(&messages);
        if orphans.is_empty() {
            return messages;
        }
        info!("repairing {} orphaned tool call(s) on resume of run {run_id}", orphans.len());
        for id in orphans {
            messages.push(Message::tool(id, ORPHAN_STUB));
        }
        messages
    }

    async fn log_compaction(&self, session_key: &str, run_id: &str, agent_id: &str, step_number: u32, report: &CompactionReport) {
        self.emit(
            session_key,
            run_id,
            agent_id,
            step_number,
            EventPayload::MessageDecision {
                summary: format!(
                    "compacted {} messages to {} (~{} tokens saved)",
                    report.messages_before, report.messages_after, report.estimated_tokens_saved
                ),
            },
        )
        .await;
    }

    async fn save_checkpoint(&self, session_key: &str, run_id: &str, step_number: u32, messages: &[Message], working_state: &Value) {
        let checkpoint = Checkpoint::new(step_number, messages.to_vec(), working_state.clone());
        if let Err(e) = self.checkpoints.save_latest(session_key, run_id, &checkpoint).await {
            warn!("failed to save checkpoint for run {run_id}: {e}");
        }
    }

    async fn save_failure_checkpoint(&self, session_key: &str, run_id: &str, step_number: u32, messages: &[Message], working_state: &Value) {
        self.save_checkpoint(session_key, run_id, step_number, messages, working_state).await;
        let step = step_id(step_number);
        let checkpoint = Checkpoint::new(step_number, messages.to_vec(), working_state.clone());
        if let Err(e) = self.checkpoints.save_historical(session_key, run_id, &checkpoint, &step).await {
            warn!("failed to save forensic checkpoint for run {run_id}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::FsCheckpointStore;
    use crate::event_log::FsEventLog;
    use crate::llm::MockLlm;
    use crate::memory_service::InMemoryMemoryService;

    fn agent_context() -> AgentContext {
        AgentContext {
            scope: RunnableScope::new("org", "user"),
            agent_id: "agent".to_string(),
            allowed_tools: Vec::new(),
            denied_tools: Vec::new(),
            delegated_permissions: None,
        }
    }

    fn runner(llm: Arc<dyn LlmClient>, dir: &std::path::Path) -> AgentRunner {
        AgentRunner::new(
            Arc::new(FsEventLog::new(dir)),
            Arc::new(FsCheckpointStore::new(dir)),
            llm,
            Arc::new(ToolRouter::new(Duration::from_secs(5))),
            Arc::new(InMemoryMemoryService::new()),
        )
    }

    #[tokio::test]
    async fn happy_path_completes_on_first_tool_free_response() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlm::with_final_answer("hello"));
        let runner = runner(llm, dir.path());
        let (_tx, rx) = watch::channel(false);
        let outcome = runner
            .run("sess", "run_1", &RunnerConfig::default(), &agent_context(), "say hello", None, rx)
            .await;
        assert!(matches!(outcome, RunnerOutcome::Completed { .. }));

        let events = runner.event_log.read_stream("sess", "run_1").await.unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["run.started", "step.started", "llm.called", "step.completed", "run.completed"]);
    }

    #[tokio::test]
    async fn max_steps_zero_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlm::with_final_answer("unused"));
        let runner = runner(llm, dir.path());
        let mut config = RunnerConfig::default();
        config.max_steps = 0;
        let (_tx, rx) = watch::channel(false);
        let outcome = runner.run("sess", "run_2", &config, &agent_context(), "hi", None, rx).await;
        match outcome {
            RunnerOutcome::Failed { message, .. } => assert!(message.contains("Max steps")),
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn cancelled_before_first_step_fails_with_cancelled_code() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlm::with_final_answer("unused"));
        let runner = runner(llm, dir.path());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let outcome = runner.run("sess", "run_3", &RunnerConfig::default(), &agent_context(), "hi", None, rx).await;
        match outcome {
            RunnerOutcome::Failed { code, .. } => assert_eq!(code, "CANCELLED"),
            _ => panic!("expected cancellation failure"),
        }
    }

    #[tokio::test]
    async fn resuming_with_orphaned_tool_call_synthesizes_stub_result() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlm::with_final_answer("done"));
        let runner = runner(llm, dir.path());
        let orphaned = vec![
            Message::user("do it"),
            Message::assistant_with_tool_calls(
                "",
                vec![crate::message::ToolCall { id: "call_1".to_string(), name: "bash".to_string(), parameters: serde_json::json!({}) }],
            ),
        ];
        let resume = ResumeFrom { step_number: 1, messages: orphaned, working_state: serde_json::json!({}) };
        let (_tx, rx) = watch::channel(false);
        let outcome = runner.run("sess", "run_4", &RunnerConfig::default(), &agent_context(), "do it", Some(resume), rx).await;
        assert!(matches!(outcome, RunnerOutcome::Completed { .. }));

        let checkpoint = runner.checkpoints.load_latest("sess", "run_4").await.unwrap().unwrap();
        let has_stub = checkpoint.messages.iter().any(|m| matches!(m, Message::Tool { content, .. } if content.contains("synthetic")));
        assert!(has_stub);
    }

    #[tokio::test]
    async fn resuming_continues_from_stepnumber_plus_one() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlm::with_final_answer("done"));
        let runner = runner(llm, dir.path());
        let resume = ResumeFrom { step_number: 4, messages: vec![Message::user("hi")], working_state: serde_json::json!({}) };
        let (_tx, rx) = watch::channel(false);
        let outcome = runner.run("sess", "run_5", &RunnerConfig::default(), &agent_context(), "hi", Some(resume), rx).await;
        assert!(matches!(outcome, RunnerOutcome::Completed { .. }));

        let events = runner.event_log.read_stream("sess", "run_5").await.unwrap();
        let resumed = events.iter().find(|e| matches!(e.payload, EventPayload::RunResumed { .. })).unwrap();
        let EventPayload::RunResumed { step_number } = &resumed.payload else { unreachable!() };
        assert_eq!(*step_number, 5, "resume must continue from stepNumber + 1, not stepNumber");
        assert_eq!(resumed.step_id, "step_0005");

        let checkpoint = runner.checkpoints.load_latest("sess", "run_5").await.unwrap().unwrap();
        assert_eq!(checkpoint.step_number, 5);
    }
}
