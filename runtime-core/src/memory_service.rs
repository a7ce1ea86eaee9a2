//! MemoryService (spec §4.9): a scoped store the context builder queries
//! for relevant prior facts. Grounded on the teacher's `memory` module
//! search/write split, generalized from its vector-store backend to a
//! pluggable trait with an in-memory substring-match implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::run::RunnableScope;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MemoryHit {
    pub id: String,
    pub content: String,
    pub score: f32,
}

#[async_trait]
pub trait MemoryService: Send + Sync {
    async fn search(&self, scope: &RunnableScope, query: &str, limit: usize) -> Result<Vec<MemoryHit>, AgentError>;
    async fn write(&self, scope: &RunnableScope, content: &str) -> Result<String, AgentError>;
    async fn get(&self, scope: &RunnableScope, id: &str) -> Result<Option<MemoryHit>, AgentError>;
}

#[derive(Clone, Debug)]
struct Entry {
    scope_key: String,
    id: String,
    content: String,
}

/// Substring-ranked in-process memory store. Production deployments would
/// swap this for an embedding-backed implementation without touching
/// callers, since they only depend on the [`MemoryService`] trait.
#[derive(Default)]
pub struct InMemoryMemoryService {
    entries: std::sync::Mutex<Vec<Entry>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl InMemoryMemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    fn scope_key(scope: &RunnableScope) -> String {
        format!(
            "{}/{}/{}",
            scope.org_id,
            scope.user_id,
            scope.project_id.as_deref().unwrap_or("*")
        )
    }
}

#[async_trait]
impl MemoryService for InMemoryMemoryService {
    async fn search(&self, scope: &RunnableScope, query: &str, limit: usize) -> Result<Vec<MemoryHit>, AgentError> {
        let scope_key = Self::scope_key(scope);
        let query_lower = query.to_lowercase();
        let entries = self.entries.lock().unwrap();

        let mut hits: Vec<MemoryHit> = entries
            .iter()
            .filter(|e| e.scope_key == scope_key)
            .filter_map(|e| {
                let content_lower = e.content.to_lowercase();
                let matches = query_lower
                    .split_whitespace()
                    .filter(|word| content_lower.contains(word))
                    .count();
                if matches == 0 {
                    return None;
                }
                let score = matches as f32 / query_lower.split_whitespace().count().max(1) as f32;
                Some(MemoryHit { id: e.id.clone(), content: e.content.clone(), score })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn write(&self, scope: &RunnableScope, content: &str) -> Result<String, AgentError> {
        let id = format!("mem_{}", self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst));
        let mut entries = self.entries.lock().unwrap();
        entries.push(Entry { scope_key: Self::scope_key(scope), id: id.clone(), content: content.to_string() });
        Ok(id)
    }

    async fn get(&self, scope: &RunnableScope, id: &str) -> Result<Option<MemoryHit>, AgentError> {
        let scope_key = Self::scope_key(scope);
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .find(|e| e.scope_key == scope_key && e.id == id)
            .map(|e| MemoryHit { id: e.id.clone(), content: e.content.clone(), score: 1.0 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> RunnableScope {
        RunnableScope::new("org", "user").with_project("proj")
    }

    #[tokio::test]
    async fn search_finds_written_entries_by_substring() {
        let service = InMemoryMemoryService::new();
        let id = service.write(&scope(), "the deploy key rotates every 90 days").await.unwrap();
        let hits = service.search(&scope(), "deploy key", 5).await.unwrap();
        assert_eq!(hits[0].id, id);
    }

    #[tokio::test]
    async fn search_is_scoped_and_does_not_leak_across_scopes() {
        let service = InMemoryMemoryService::new();
        service.write(&scope(), "secret project detail").await.unwrap();
        let other = RunnableScope::new("other-org", "user").with_project("proj");
        let hits = service.search(&other, "secret project detail", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn get_returns_none_for_unknown_id() {
        let service = InMemoryMemoryService::new();
        assert!(service.get(&scope(), "missing").await.unwrap().is_none());
    }
}
