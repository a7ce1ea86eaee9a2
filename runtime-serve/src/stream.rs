//! SSE response body for `GET /api/runs/:id/stream` (spec §6, §4.11):
//! `event: run.event`, periodic `event: ping`, `event: done` on terminal.

use std::sync::Arc;

use axum::body::Body;
use axum::response::Response;
use futures::StreamExt;
use runtime_core::SSEBroadcaster;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::app::AppState;

/// Wraps a subscriber's frame channel as the response body, evicting it from
/// the broadcaster once the client disconnects and the stream is dropped.
pub fn stream_response(broadcaster: Arc<SSEBroadcaster>, client_id: u64, rx: UnboundedReceiver<String>) -> Response {
    let frames = UnboundedReceiverStream::new(rx).map(|frame| Ok::<_, std::convert::Infallible>(frame));
    let guarded = EvictOnDrop { broadcaster, client_id, inner: Box::pin(frames) };

    Response::builder()
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(guarded))
        .expect("static headers are always valid")
}

struct EvictOnDrop {
    broadcaster: Arc<SSEBroadcaster>,
    client_id: u64,
    inner: std::pin::Pin<Box<dyn futures::Stream<Item = Result<String, std::convert::Infallible>> + Send>>,
}

impl futures::Stream for EvictOnDrop {
    type Item = Result<String, std::convert::Infallible>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for EvictOnDrop {
    fn drop(&mut self) {
        self.broadcaster.remove_client(self.client_id);
    }
}

/// Spawns the background task that drives [`SSEBroadcaster::heartbeat_all`]
/// on its configured interval.
pub fn spawn_heartbeat(state: &AppState) {
    let broadcaster = state.broadcaster.clone();
    let interval = broadcaster.heartbeat_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            broadcaster.heartbeat_all();
        }
    });
}
