//! Axum app: shared state and router (spec §6 "HTTP surface").

use std::sync::{Arc, Mutex};

use axum::routing::{get, post};
use axum::Router;
use runtime_core::{CheckpointStore, EventLog, RunQueue, RunRepository, SSEBroadcaster};
use tokio::sync::oneshot;

use crate::routes;

/// Holds every collaborator a route handler needs: the admission queue, the
/// scoped repository, the append-only log, checkpoints (for the approve
/// flow's synthetic tool-result injection), and the SSE fan-out broadcaster.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<RunQueue>,
    pub repository: Arc<dyn RunRepository>,
    pub event_log: Arc<dyn EventLog>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub broadcaster: Arc<SSEBroadcaster>,
    pub(crate) shutdown_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/runs", post(routes::create_run))
        .route("/api/runs/:id", get(routes::get_run))
        .route("/api/runs/:id/events", get(routes::list_events))
        .route("/api/runs/:id/stream", get(routes::stream_run))
        .route("/api/runs/:id/cancel", post(routes::cancel_run))
        .route("/api/runs/:id/approve", post(routes::approve_run))
        .route("/api/sessions/:key/runs", get(routes::list_session_runs))
        .with_state(state)
}
