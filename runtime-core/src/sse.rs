//! SSEBroadcaster: per-run subscriber fan-out with heartbeats (spec §4.11).
//!
//! Grounded on the teacher's `stream::ToolStreamWriter` (type-erased emit
//! closure, `Clone + Send + Sync`) and `serve::connection` (per-connection
//! handler, evict-on-write-error), retargeted from a single WebSocket duplex
//! per run to N SSE subscribers per run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use runtime_stream::{connected_frame, done_frame, ping_frame, run_event_frame, RunEvent};

const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_CLIENTS_PER_RUN: usize = 64;

pub type ClientId = u64;

struct Client {
    run_id: String,
    sender: mpsc::UnboundedSender<String>,
}

pub struct SSEBroadcaster {
    max_clients_per_run: usize,
    heartbeat_interval: Duration,
    clients: DashMap<ClientId, Client>,
    by_run: DashMap<String, Vec<ClientId>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl Default for SSEBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CLIENTS_PER_RUN, DEFAULT_HEARTBEAT)
    }
}

impl SSEBroadcaster {
    pub fn new(max_clients_per_run: usize, heartbeat_interval: Duration) -> Self {
        Self {
            max_clients_per_run,
            heartbeat_interval,
            clients: DashMap::new(),
            by_run: DashMap::new(),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// `addClient` (spec §4.11): registers a subscriber, sends the initial
    /// `connected` frame, and returns the id used to later `removeClient`.
    /// `last_event_id` is accepted for protocol completeness (clients
    /// re-page the EventLog with a cursor to fill gaps rather than relying
    /// on in-memory replay; see spec §9 "SSE delivery semantics").
    pub fn add_client(
        &self,
        run_id: &str,
        _last_event_id: Option<String>,
    ) -> Result<(ClientId, mpsc::UnboundedReceiver<String>), String> {
        let current = self.by_run.get(run_id).map(|v| v.len()).unwrap_or(0);
        if current >= self.max_clients_per_run {
            return Err(format!("run {run_id} already has the maximum number of SSE subscribers"));
        }
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(connected_frame(run_id));
        self.clients.insert(id, Client { run_id: run_id.to_string(), sender: tx });
        self.by_run.entry(run_id.to_string()).or_default().push(id);
        Ok((id, rx))
    }

    pub fn remove_client(&self, client_id: ClientId) {
        if let Some((_, client)) = self.clients.remove(&client_id) {
            if let Some(mut ids) = self.by_run.get_mut(&client.run_id) {
                ids.retain(|id| *id != client_id);
            }
        }
    }

    /// `broadcastToRun` (spec §4.11): delivers in insertion order to each
    /// subscriber of `run_id`; failed writes evict that client.
    pub fn broadcast_to_run(&self, run_id: &str, event: &RunEvent) {
        let Some(ids) = self.by_run.get(run_id).map(|v| v.clone()) else { return };
        let Ok(frame) = run_event_frame(event) else {
            warn!("dropping unserializable event for run {run_id}");
            return;
        };
        let mut dead = Vec::new();
        for id in ids {
            if let Some(client) = self.clients.get(&id) {
                if client.sender.send(frame.clone()).is_err() {
                    dead.push(id);
                }
            }
        }
        for id in dead {
            self.remove_client(id);
        }
    }

    fn broadcast_raw(&self, run_id: &str, frame: String) {
        let Some(ids) = self.by_run.get(run_id).map(|v| v.clone()) else { return };
        let mut dead = Vec::new();
        for id in ids {
            if let Some(client) = self.clients.get(&id) {
                if client.sender.send(frame.clone()).is_err() {
                    dead.push(id);
                }
            }
        }
        for id in dead {
            self.remove_client(id);
        }
    }

    pub fn send_done(&self, run_id: &str) {
        self.broadcast_raw(run_id, done_frame().to_string());
    }

    /// Sends one heartbeat frame (`event: ping`) to every currently
    /// subscribed run. Callers typically drive this from a
    /// `tokio::time::interval` ticking every [`Self::heartbeat_interval`].
    pub fn heartbeat_all(&self) {
        let ts = chrono::Utc::now().to_rfc3339();
        let run_ids: Vec<String> = self.by_run.iter().map(|e| e.key().clone()).collect();
        for run_id in run_ids {
            self.broadcast_raw(&run_id, ping_frame(&ts));
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn client_count(&self, run_id: &str) -> usize {
        self.by_run.get(run_id).map(|v| v.len()).unwrap_or(0)
    }

    /// Terminates all subscriber channels.
    pub fn shutdown(&self) {
        self.clients.clear();
        self.by_run.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_stream::{EventPayload, Redaction};

    fn event(run_id: &str) -> RunEvent {
        RunEvent {
            v: 1,
            ts: "2026-01-01T00:00:00Z".to_string(),
            session_key: "sess".to_string(),
            run_id: run_id.to_string(),
            agent_id: "agent".to_string(),
            step_id: "step_0000".to_string(),
            span_id: "span_1".to_string(),
            parent_span_id: None,
            redaction: Redaction::default(),
            payload: EventPayload::StepStarted { step_number: 0 },
        }
    }

    #[test]
    fn add_client_sends_connected_frame_first() {
        let broadcaster = SSEBroadcaster::default();
        let (_id, mut rx) = broadcaster.add_client("run_1", None).unwrap();
        let first = rx.try_recv().unwrap();
        assert!(first.contains("event: connected"));
    }

    #[test]
    fn broadcast_reaches_all_subscribers_of_the_run_only() {
        let broadcaster = SSEBroadcaster::default();
        let (_a, mut rx_a) = broadcaster.add_client("run_1", None).unwrap();
        let (_b, mut rx_b) = broadcaster.add_client("run_2", None).unwrap();
        rx_a.try_recv().unwrap(); // connected frame
        rx_b.try_recv().unwrap();

        broadcaster.broadcast_to_run("run_1", &event("run_1"));
        let frame = rx_a.try_recv().unwrap();
        assert!(frame.contains("event: run.event"));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn max_clients_per_run_is_enforced() {
        let broadcaster = SSEBroadcaster::new(1, DEFAULT_HEARTBEAT);
        broadcaster.add_client("run_1", None).unwrap();
        assert!(broadcaster.add_client("run_1", None).is_err());
    }

    #[test]
    fn remove_client_drops_it_from_the_run_index() {
        let broadcaster = SSEBroadcaster::default();
        let (id, _rx) = broadcaster.add_client("run_1", None).unwrap();
        assert_eq!(broadcaster.client_count("run_1"), 1);
        broadcaster.remove_client(id);
        assert_eq!(broadcaster.client_count("run_1"), 0);
    }

    #[test]
    fn dropped_receiver_is_evicted_on_next_broadcast() {
        let broadcaster = SSEBroadcaster::default();
        let (_id, rx) = broadcaster.add_client("run_1", None).unwrap();
        drop(rx);
        broadcaster.broadcast_to_run("run_1", &event("run_1"));
        assert_eq!(broadcaster.client_count("run_1"), 0);
    }
}
