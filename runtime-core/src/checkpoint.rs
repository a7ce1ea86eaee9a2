//! CheckpointStore: per-run conversation state, atomically persisted (spec §4.2).
//!
//! Write-to-temp-then-rename, grounded on the teacher's `SqliteSaver::put`
//! use of `tokio::task::spawn_blocking` around synchronous I/O, adapted here
//! from a SQLite row write to a JSON file write.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;
use crate::message::Message;

/// Opaque working-state map carried alongside messages (spec §3 "Checkpoint").
pub type WorkingState = Value;

/// Per-run snapshot of conversation state sufficient to resume (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub step_number: u32,
    pub messages: Vec<Message>,
    pub working_state: WorkingState,
}

impl Checkpoint {
    pub fn new(step_number: u32, messages: Vec<Message>, working_state: WorkingState) -> Self {
        Self {
            step_number,
            messages,
            working_state,
        }
    }
}

fn step_id_valid(step_id: &str) -> bool {
    step_id.starts_with("step_") && step_id[5..].len() == 4 && step_id[5..].chars().all(|c| c.is_ascii_digit())
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_latest(&self, session_key: &str, run_id: &str, checkpoint: &Checkpoint) -> Result<(), AgentError>;
    async fn load_latest(&self, session_key: &str, run_id: &str) -> Result<Option<Checkpoint>, AgentError>;
    async fn save_historical(&self, session_key: &str, run_id: &str, checkpoint: &Checkpoint, step_id: &str) -> Result<(), AgentError>;
    async fn load_historical(&self, session_key: &str, run_id: &str, step_id: &str) -> Result<Option<Checkpoint>, AgentError>;
    async fn list_historical(&self, session_key: &str, run_id: &str) -> Result<Vec<String>, AgentError>;
    async fn delete_latest(&self, session_key: &str, run_id: &str) -> Result<(), AgentError>;
    /// Loads latest, appends `messages` (tool-role) to the message list, and
    /// rewrites latest. Fails if no checkpoint exists (spec §4.2).
    async fn append_tool_results(
        &self,
        session_key: &str,
        run_id: &str,
        messages: Vec<Message>,
    ) -> Result<(), AgentError>;
}

pub struct FsCheckpointStore {
    root: PathBuf,
}

impl FsCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn run_dir(&self, session_key: &str, run_id: &str) -> PathBuf {
        self.root.join("sessions").join(session_key).join("runs").join(run_id)
    }

    fn latest_path(&self, session_key: &str, run_id: &str) -> PathBuf {
        self.run_dir(session_key, run_id).join("checkpoint.latest.json")
    }

    fn historical_path(&self, session_key: &str, run_id: &str, step_id: &str) -> PathBuf {
        self.run_dir(session_key, run_id).join("checkpoint").join(format!("{step_id}.json"))
    }

    async fn write_atomic(path: &Path, checkpoint: &Checkpoint) -> Result<(), AgentError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| AgentError::CheckpointStore(e.to_string()))?;
        }
        let data = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| AgentError::Validation(format!("invalid checkpoint: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await.map_err(|e| AgentError::CheckpointStore(e.to_string()))?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| AgentError::CheckpointStore(e.to_string()))?;
        Ok(())
    }

    async fn read(path: &Path) -> Result<Option<Checkpoint>, AgentError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let checkpoint = serde_json::from_slice(&bytes)
                    .map_err(|e| AgentError::CheckpointStore(format!("corrupt checkpoint: {e}")))?;
                Ok(Some(checkpoint))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AgentError::CheckpointStore(e.to_string())),
        }
    }
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn save_latest(&self, session_key: &str, run_id: &str, checkpoint: &Checkpoint) -> Result<(), AgentError> {
        Self::write_atomic(&self.latest_path(session_key, run_id), checkpoint).await
    }

    async fn load_latest(&self, session_key: &str, run_id: &str) -> Result<Option<Checkpoint>, AgentError> {
        Self::read(&self.latest_path(session_key, run_id)).await
    }

    async fn save_historical(&self, session_key: &str, run_id: &str, checkpoint: &Checkpoint, step_id: &str) -> Result<(), AgentError> {
        if !step_id_valid(step_id) {
            return Err(AgentError::Validation(format!("invalid step id: {step_id}")));
        }
        Self::write_atomic(&self.historical_path(session_key, run_id, step_id), checkpoint).await
    }

    async fn load_historical(&self, session_key: &str, run_id: &str, step_id: &str) -> Result<Option<Checkpoint>, AgentError> {
        Self::read(&self.historical_path(session_key, run_id, step_id)).await
    }

    async fn list_historical(&self, session_key: &str, run_id: &str) -> Result<Vec<String>, AgentError> {
        let dir = self.run_dir(session_key, run_id).join("checkpoint");
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(AgentError::CheckpointStore(e.to_string())),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| AgentError::CheckpointStore(e.to_string()))? {
            if let Some(name) = entry.path().file_stem().and_then(|s| s.to_str()) {
                out.push(name.to_string());
            }
        }
        out.sort();
        Ok(out)
    }

    async fn delete_latest(&self, session_key: &str, run_id: &str) -> Result<(), AgentError> {
        match tokio::fs::remove_file(self.latest_path(session_key, run_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AgentError::CheckpointStore(e.to_string())),
        }
    }

    async fn append_tool_results(
        &self,
        session_key: &str,
        run_id: &str,
        messages: Vec<Message>,
    ) -> Result<(), AgentError> {
        let mut checkpoint = self
            .load_latest(session_key, run_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("no checkpoint for run {run_id}")))?;
        checkpoint.messages.extend(messages);
        self.save_latest(session_key, run_id, &checkpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_latest_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let checkpoint = Checkpoint::new(1, vec![Message::user("hi")], serde_json::json!({}));
        store.save_latest("sess", "run_1", &checkpoint).await.unwrap();
        let loaded = store.load_latest("sess", "run_1").await.unwrap().unwrap();
        assert_eq!(loaded.step_number, 1);
    }

    #[tokio::test]
    async fn load_latest_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        assert!(store.load_latest("sess", "run_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_tool_results_trailing_messages_match_inputs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let checkpoint = Checkpoint::new(1, vec![Message::user("hi")], serde_json::json!({}));
        store.save_latest("sess", "run_1", &checkpoint).await.unwrap();

        let tool_messages = vec![Message::tool("c1", "r1"), Message::tool("c2", "r2")];
        store.append_tool_results("sess", "run_1", tool_messages.clone()).await.unwrap();

        let loaded = store.load_latest("sess", "run_1").await.unwrap().unwrap();
        let trailing = &loaded.messages[loaded.messages.len() - 2..];
        assert_eq!(trailing, tool_messages.as_slice());
    }

    #[tokio::test]
    async fn append_tool_results_fails_without_existing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let result = store.append_tool_results("sess", "run_1", vec![Message::tool("c1", "r1")]).await;
        assert!(matches!(result, Err(AgentError::NotFound(_))));
    }

    #[tokio::test]
    async fn saves_historical_rejects_invalid_step_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let checkpoint = Checkpoint::new(1, vec![], serde_json::json!({}));
        let result = store.save_historical("sess", "run_1", &checkpoint, "bogus").await;
        assert!(matches!(result, Err(AgentError::Validation(_))));
    }

    #[tokio::test]
    async fn list_historical_returns_sorted_step_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let checkpoint = Checkpoint::new(1, vec![], serde_json::json!({}));
        store.save_historical("sess", "run_1", &checkpoint, "step_0002").await.unwrap();
        store.save_historical("sess", "run_1", &checkpoint, "step_0001").await.unwrap();
        let list = store.list_historical("sess", "run_1").await.unwrap();
        assert_eq!(list, vec!["step_0001".to_string(), "step_0002".to_string()]);
    }
}
