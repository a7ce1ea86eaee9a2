//! Axum HTTP + SSE surface over the run queue, event log, and broadcaster
//! (spec §6 "HTTP surface"). Thin: no auth, no business logic beyond
//! scope-header extraction and request/response mapping onto `runtime-core`.
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`].

mod app;
mod error;
mod routes;
mod scope;
mod stream;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::info;

use runtime_core::{
    AgentContext, AgentError, AgentRunner, CheckpointStore, DependencyStatus, DispatchSubtasksTool, EventLog,
    Executor, FsCheckpointStore, FsEventLog, HandoffToTool, HttpLlmClient, InMemoryMemoryService, LlmClient,
    MockLlm, RequestHumanApprovalTool, ResumeFrom, Run, RunError, RunOutcome, RunQueue, RunRepository, RunStatus,
    RunnerConfig, RunnerOutcome, SSEBroadcaster, SwarmCoordinator, ToolRouter,
};
use runtime_config::RuntimeConfig;
use runtime_repository::SqliteRunRepository;

use app::{router, AppState};

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn llm_from_config(config: &RuntimeConfig) -> Arc<dyn LlmClient> {
    let model = config.llm_model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
    match config.llm_provider.as_deref() {
        Some("openai") => {
            let key = config.openai_api_key.clone().unwrap_or_default();
            Arc::new(HttpLlmClient::new("https://api.openai.com/v1", key, model))
        }
        Some("anthropic") => {
            let key = config.anthropic_api_key.clone().unwrap_or_default();
            Arc::new(HttpLlmClient::new("https://api.anthropic.com/v1", key, model))
        }
        _ => Arc::new(MockLlm::with_final_answer("no LLM_PROVIDER configured")),
    }
}

/// Builds the executor closure that drives [`AgentRunner::run`] for each run
/// the queue pops, translating [`RunnerOutcome`] into the [`RunOutcome`] the
/// queue's bookkeeping expects and persisting the resulting [`Run`] state.
fn build_executor(
    repository: Arc<dyn RunRepository>,
    checkpoints: Arc<dyn CheckpointStore>,
    runner: Arc<AgentRunner>,
    runner_config: Arc<RunnerConfig>,
    swarm: Arc<SwarmCoordinator>,
) -> Executor {
    Arc::new(move |mut run: Run, abort_rx| {
        let repository = repository.clone();
        let checkpoints = checkpoints.clone();
        let runner = runner.clone();
        let runner_config = runner_config.clone();
        let swarm = swarm.clone();
        Box::pin(async move {
            if run.transition_to(RunStatus::Running).is_ok() {
                run.started_at = Some(now_iso());
                let _ = repository.update_run(run.clone()).await;
            }

            let agent_context = AgentContext {
                scope: run.scope.clone(),
                agent_id: run.agent_id.clone(),
                allowed_tools: Vec::new(),
                denied_tools: Vec::new(),
                delegated_permissions: run.delegated_permissions.clone(),
            };

            let resume_from = match checkpoints.load_latest(&run.session_key, &run.id).await {
                Ok(Some(checkpoint)) => Some(ResumeFrom {
                    step_number: checkpoint.step_number,
                    messages: checkpoint.messages,
                    working_state: checkpoint.working_state,
                }),
                _ => None,
            };

            let outcome = runner
                .run(&run.session_key, &run.id, &runner_config, &agent_context, &run.input, resume_from, abort_rx)
                .await;

            let run_id = run.id.clone();
            let parent_run_id = run.parent_run_id.clone();

            match outcome {
                RunnerOutcome::Completed { result } => {
                    let _ = run.transition_to(RunStatus::Completed);
                    run.result = Some(result.clone());
                    run.ended_at = Some(now_iso());
                    let _ = repository.update_run(run).await;
                    if parent_run_id.is_some() {
                        let _ = swarm.on_child_terminal(&run_id, DependencyStatus::Completed, Some(result.clone()), None).await;
                    }
                    RunOutcome::Completed(result)
                }
                RunnerOutcome::Suspended { .. } | RunnerOutcome::AwaitingApproval { .. } => {
                    let _ = run.transition_to(RunStatus::Suspended);
                    run.suspended_at = Some(now_iso());
                    let _ = repository.update_run(run).await;
                    RunOutcome::Suspended
                }
                RunnerOutcome::Failed { code, message } => {
                    let _ = run.transition_to(RunStatus::Failed);
                    run.error = Some(RunError { code, message: message.clone() });
                    run.ended_at = Some(now_iso());
                    let _ = repository.update_run(run).await;
                    if parent_run_id.is_some() {
                        let _ = swarm.on_child_terminal(&run_id, DependencyStatus::Failed, None, Some(message.clone())).await;
                    }
                    RunOutcome::Failed(AgentError::Other(message))
                }
            }
        })
    })
}

fn build_state(data_dir: PathBuf, config: &RuntimeConfig) -> AppState {
    let event_log: Arc<dyn EventLog> = Arc::new(FsEventLog::new(&data_dir));
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(FsCheckpointStore::new(&data_dir));

    let repository: Arc<dyn RunRepository> = match &config.database_url {
        Some(path) if !path.is_empty() => match SqliteRunRepository::new(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!("failed to open DATABASE_URL={path}: {e}, falling back to in-memory repository");
                Arc::new(runtime_core::InMemoryRunRepository::new())
            }
        },
        _ => Arc::new(runtime_core::InMemoryRunRepository::new()),
    };

    let broadcaster = Arc::new(SSEBroadcaster::default());

    let queue = Arc::new(
        RunQueue::new(1000, Some(Duration::from_secs(600)), Some(data_dir.join("queue")), event_log.clone())
            .with_broadcaster(broadcaster.clone()),
    );

    let tool_router = Arc::new(ToolRouter::new(Duration::from_secs(30)));
    tool_router.register_tool(Arc::new(DispatchSubtasksTool::new(repository.clone(), queue.clone())));
    tool_router.register_tool(Arc::new(HandoffToTool::new(repository.clone(), queue.clone())));
    tool_router.register_tool(Arc::new(RequestHumanApprovalTool));

    let memory = Arc::new(InMemoryMemoryService::new());
    let llm = llm_from_config(config);
    let runner = Arc::new(
        AgentRunner::new(event_log.clone(), checkpoints.clone(), llm, tool_router, memory).with_broadcaster(broadcaster.clone()),
    );
    let runner_config = Arc::new(RunnerConfig::default());
    let swarm = Arc::new(SwarmCoordinator::new(repository.clone(), checkpoints.clone(), queue.clone()));

    queue.set_executor(build_executor(repository.clone(), checkpoints.clone(), runner, runner_config, swarm));

    AppState {
        queue,
        repository,
        event_log,
        checkpoints,
        broadcaster,
        shutdown_tx: Arc::new(Mutex::new(None)),
    }
}

fn data_dir_from_config(config: &RuntimeConfig) -> PathBuf {
    config.data_dir.clone().map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".agentrt-data"))
}

/// Runs the HTTP+SSE server on an existing listener. Used by tests (bind to
/// 127.0.0.1:0 then pass the listener in). When `once` is true, the server
/// exits after the first connection's requests are done being served.
pub async fn run_serve_on_listener(
    listener: TcpListener,
    once: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("agent runtime listening on http://{addr}");

    let config = runtime_config::load_and_apply("agentrt", None).unwrap_or_default();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let mut state = build_state(data_dir_from_config(&config), &config);
    if once {
        *state.shutdown_tx.lock().unwrap() = Some(shutdown_tx);
    }
    stream::spawn_heartbeat(&state);
    let _ = state.queue.restore().await;

    let app = router(state);
    if once {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await?;
    } else {
        axum::serve(listener, app).await?;
    }
    Ok(())
}

/// Runs the HTTP+SSE server. Listens on `addr` (default 127.0.0.1:8080, or
/// `PORT` from the environment when `addr` is `None`).
pub async fn run_serve(addr: Option<&str>, once: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let owned_addr;
    let addr = match addr {
        Some(a) => a,
        None => {
            let config = runtime_config::load_and_apply("agentrt", None).unwrap_or_default();
            owned_addr = config.port.map(|p| format!("127.0.0.1:{p}")).unwrap_or_else(|| DEFAULT_ADDR.to_string());
            &owned_addr
        }
    };
    let listener = TcpListener::bind(addr).await?;
    run_serve_on_listener(listener, once).await
}
