//! # runtime-core
//!
//! Orchestration core of an agent execution runtime: the run queue and its
//! single-worker executor, the agent step loop, the hierarchical run graph
//! (parent/child dispatch and fan-in), the append-only event log, and the SSE
//! broadcast layer. Everything outside that — the HTTP router shell, the CLI
//! front-end, auth, LLM vendor wire formats, vector/FTS memory internals — is
//! an external collaborator reached only through the traits this crate
//! defines (`RunRepository`, `MemoryService`, `LlmClient`, `Tool`).
//!
//! ## Main modules
//!
//! - [`run`]: [`Run`], [`RunStatus`], [`Dependency`], [`AgentContext`], [`RunnableScope`].
//! - [`message`]: [`Message`], [`ToolCall`].
//! - [`event_log`]: [`EventLog`], [`FsEventLog`] — append-only per-run event stream.
//! - [`checkpoint`]: [`Checkpoint`], [`CheckpointStore`], [`FsCheckpointStore`].
//! - [`tool`]: [`Tool`] trait, [`ToolDefinition`], [`ToolResult`], [`ToolCallContext`].
//! - [`tool_policy`]: [`ToolPolicy`].
//! - [`tool_router`]: [`ToolRouter`].
//! - [`tool_scheduler`]: [`ToolScheduler`].
//! - [`retry`]: [`ErrorClassifier`], [`RetryPolicy`].
//! - [`routing_tools`]: [`DispatchSubtasksTool`], [`HandoffToTool`], [`RequestHumanApprovalTool`].
//! - [`context`]: [`ContextBuilder`], [`Compactor`], [`TokenBudgetManager`].
//! - [`llm`]: [`LlmClient`] trait, [`MockLlm`], [`HttpLlmClient`].
//! - [`agent_runner`]: [`AgentRunner`] — the plan/act/observe step loop.
//! - [`run_queue`]: [`RunQueue`].
//! - [`swarm`]: [`SwarmCoordinator`].
//! - [`sse`]: [`SSEBroadcaster`].
//! - [`repository`]: [`RunRepository`] trait, [`InMemoryRunRepository`].
//! - [`memory_service`]: [`MemoryService`] trait, [`InMemoryMemoryService`].
//! - [`error`]: [`AgentError`] taxonomy.

pub mod agent_runner;
pub mod context;
pub mod checkpoint;
pub mod error;
pub mod event_log;
pub mod llm;
pub mod memory_service;
pub mod message;
pub mod repository;
pub mod retry;
pub mod routing_tools;
pub mod run;
pub mod run_queue;
pub mod sse;
pub mod swarm;
pub mod tool;
pub mod tool_policy;
pub mod tool_router;
pub mod tool_scheduler;

pub use agent_runner::{AgentRunner, ResumeFrom, RunnerConfig, RunnerOutcome};
pub use checkpoint::{Checkpoint, CheckpointStore, FsCheckpointStore, WorkingState};
pub use context::{Compactor, CompactionReport, ContextBuilder, TokenBudgetManager};
pub use error::AgentError;
pub use event_log::{EventLog, FsEventLog, Page};
pub use llm::{HttpLlmClient, LlmClient, LlmResponse, LlmUsage, MockLlm};
pub use memory_service::{InMemoryMemoryService, MemoryHit, MemoryService};
pub use message::{Message, ToolCall};
pub use repository::{CompleteDependencyOutcome, InMemoryRunRepository, RunRepository};
pub use retry::{ErrorClassification, ErrorClassifier, RetryOutcome, RetryPolicy};
pub use routing_tools::{DispatchSubtasksTool, HandoffToTool, RequestHumanApprovalTool};
pub use run::{AgentContext, DelegatedPermissions, Dependency, DependencyStatus, Run, RunError, RunStatus, RunnableScope};
pub use run_queue::{Executor, RunOutcome, RunQueue};
pub use sse::SSEBroadcaster;
pub use swarm::SwarmCoordinator;
pub use tool::{Tool, ToolCallContext, ToolCallOutcome, ToolDefinition, ToolResult, ToolRisk};
pub use tool_policy::ToolPolicy;
pub use tool_router::ToolRouter;
pub use tool_scheduler::ToolScheduler;
