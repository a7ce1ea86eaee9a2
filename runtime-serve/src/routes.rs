//! Route handlers for the HTTP surface (spec §6). Thin: scope-header
//! extraction plus request/response mapping onto `runtime-core` calls, no
//! business logic beyond what the core's traits already enforce.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use runtime_core::{AgentError, DelegatedPermissions, Message, Run, RunStatus};

use crate::app::AppState;
use crate::error::ApiError;
use crate::scope::Scope;
use crate::stream::stream_response;

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Deserialize)]
pub struct CreateRunRequest {
    pub input: String,
    pub agent_id: String,
    pub session_key: String,
    pub model_config: Option<Value>,
    pub delegated_permissions: Option<DelegatedPermissions>,
}

#[derive(Serialize)]
pub struct CreateRunResponse {
    pub run_id: String,
    pub status: &'static str,
    pub created_at: String,
}

pub async fn create_run(
    State(state): State<AppState>,
    Scope(scope): Scope,
    Json(req): Json<CreateRunRequest>,
) -> Result<Response, ApiError> {
    if req.input.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "input must not be empty"));
    }
    let run_id = format!("run_{}", uuid::Uuid::new_v4());
    let created_at = now_iso();
    let mut run = Run::new(&run_id, scope, &req.session_key, &req.input, &req.agent_id, &created_at);
    run.model_config = req.model_config;
    run.delegated_permissions = req.delegated_permissions;

    let run = state.repository.create_run(run).await?;
    state.queue.enqueue(run.clone()).await?;
    spawn_pump(&state);

    Ok((
        StatusCode::CREATED,
        Json(CreateRunResponse { run_id: run.id, status: "pending", created_at }),
    )
        .into_response())
}

pub async fn get_run(
    State(state): State<AppState>,
    Scope(scope): Scope,
    Path(run_id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    let run = state
        .repository
        .get_run(&scope, &run_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("run {run_id} not found")))?;
    Ok(Json(run))
}

#[derive(Deserialize)]
pub struct EventsQuery {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub include_tokens: bool,
}

#[derive(Serialize)]
struct EventsResponse {
    events: Vec<runtime_stream::RunEvent>,
    next_cursor: Option<String>,
}

pub async fn list_events(
    State(state): State<AppState>,
    Scope(scope): Scope,
    Path(run_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let run = state
        .repository
        .get_run(&scope, &run_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("run {run_id} not found")))?;
    let page = state
        .event_log
        .read_page(&run.session_key, &run.id, query.cursor, query.limit.unwrap_or(100), query.include_tokens)
        .await?;
    Ok(Json(EventsResponse { events: page.events, next_cursor: page.next_cursor }))
}

#[derive(Deserialize)]
pub struct StreamQuery {
    pub last_event_id: Option<String>,
}

pub async fn stream_run(
    State(state): State<AppState>,
    Scope(scope): Scope,
    Path(run_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    state
        .repository
        .get_run(&scope, &run_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("run {run_id} not found")))?;
    let (client_id, rx) = state
        .broadcaster
        .add_client(&run_id, query.last_event_id)
        .map_err(|e| ApiError::new(StatusCode::TOO_MANY_REQUESTS, "TOO_MANY_SUBSCRIBERS", e))?;
    Ok(stream_response(state.broadcaster.clone(), client_id, rx))
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Scope(scope): Scope,
    Path(run_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let run = state
        .repository
        .get_run(&scope, &run_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("run {run_id} not found")))?;

    if run.status.is_terminal() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "RUN_ALREADY_FINISHED", "run has already finished"));
    }

    let was_pending = run.status == RunStatus::Pending;
    let removed_from_queue = state.queue.cancel(&run_id).await;

    if was_pending && removed_from_queue {
        // Never entered the worker slot: the executor (and the run.failed
        // event it owns) never ran, so this is the one cancellation path the
        // HTTP layer must finish itself.
        let mut cancelled = run;
        cancelled.transition_to(RunStatus::Cancelled).map_err(AgentError::Validation)?;
        cancelled.cancelled_at = Some(now_iso());
        state.repository.update_run(cancelled).await?;
    }
    // If it was already running, the abort signal was flipped above; the
    // executor observes it at the next loop-top check and reports the
    // terminal `run.failed{code: CANCELLED}` itself.
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
pub struct ApproveRequest {
    pub tool_call_id: String,
}

pub async fn approve_run(
    State(state): State<AppState>,
    Scope(scope): Scope,
    Path(run_id): Path<String>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<Run>, ApiError> {
    let run = state
        .repository
        .get_run(&scope, &run_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("run {run_id} not found")))?;

    if run.status != RunStatus::Suspended {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            format!("run {run_id} is not awaiting approval"),
        ));
    }

    let approval = serde_json::json!({ "approved": true, "tool_call_id": req.tool_call_id }).to_string();
    state
        .checkpoints
        .append_tool_results(&run.session_key, &run.id, vec![Message::tool(req.tool_call_id.clone(), approval)])
        .await?;
    state.repository.set_run_resumed_from_suspension(&run.id).await?;

    let mut resumed = run;
    resumed.status = RunStatus::Pending;
    resumed.suspended_at = None;
    state.queue.notify_run_resumed(&resumed.id);
    state.queue.enqueue(resumed.clone()).await?;
    spawn_pump(&state);

    Ok(Json(resumed))
}

#[derive(Deserialize)]
pub struct SessionRunsQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct SessionRunsResponse {
    runs: Vec<Run>,
    total: usize,
    page: usize,
    limit: usize,
}

pub async fn list_session_runs(
    State(state): State<AppState>,
    Scope(scope): Scope,
    Path(session_key): Path<String>,
    Query(query): Query<SessionRunsQuery>,
) -> Result<Json<SessionRunsResponse>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    let (runs, total) = state.repository.list_runs_in_session(&scope, &session_key, page, limit).await?;
    Ok(Json(SessionRunsResponse { runs, total, page, limit }))
}

/// Kicks the queue's idempotent pump in the background so the HTTP response
/// returns immediately; `process_queue` is a no-op if the worker is busy.
fn spawn_pump(state: &AppState) {
    let queue = state.queue.clone();
    tokio::spawn(async move {
        if let Err(e) = queue.process_queue().await {
            tracing::error!("queue pump failed: {e}");
        }
    });
}
