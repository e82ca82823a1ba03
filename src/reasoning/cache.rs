//! Similarity-keyed cache of past execution plans.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::llm::ModelClient;

use super::plan::ExecutionPlan;
use super::{cosine_similarity, stable_hash};

const MEMO_CAPACITY: usize = 1024;

/// A stored `{request, embedding, plan}` triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedReasoningItem {
    pub request: String,
    pub embedding: Vec<f32>,
    pub plan: ExecutionPlan,
    pub timestamp: DateTime<Utc>,
    pub access_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
}

/// Bounded memoization of request embeddings, oldest-insertion eviction.
#[derive(Default)]
struct EmbeddingMemo {
    entries: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

impl EmbeddingMemo {
    fn get(&self, request: &str) -> Option<Vec<f32>> {
        self.entries.get(request).cloned()
    }

    fn insert(&mut self, request: String, embedding: Vec<f32>) {
        if self.entries.contains_key(&request) {
            return;
        }
        while self.entries.len() >= MEMO_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
        self.order.push_back(request.clone());
        self.entries.insert(request, embedding);
    }
}

/// Embedding-keyed similarity lookup of prior plans.
///
/// Entries live in memory; a TTL bounds how long a stored plan stays
/// reusable. Writes to the same request key are last-writer-wins.
pub struct ReasoningCache {
    entries: Arc<RwLock<HashMap<String, CachedReasoningItem>>>,
    memo: Arc<RwLock<EmbeddingMemo>>,
    similarity_threshold: f64,
    ttl: Duration,
}

impl ReasoningCache {
    pub fn new(similarity_threshold: f64, ttl_secs: u64) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            memo: Arc::new(RwLock::new(EmbeddingMemo::default())),
            similarity_threshold,
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Default threshold (0.85) and a one-day TTL.
    pub fn with_defaults() -> Self {
        Self::new(0.85, 86_400)
    }

    /// Compute (or recall) the embedding for a raw request string.
    ///
    /// Memoized by the raw request, bounded at ~1000 entries with
    /// oldest-insertion eviction.
    pub async fn embedding_for(
        &self,
        request: &str,
        client: &dyn ModelClient,
    ) -> Result<Vec<f32>> {
        if let Some(hit) = self.memo.read().await.get(request) {
            return Ok(hit);
        }

        let mut embeddings = client.embed(&[request.to_string()]).await?;
        let embedding = embeddings.pop().unwrap_or_default();
        self.memo
            .write()
            .await
            .insert(request.to_string(), embedding.clone());
        Ok(embedding)
    }

    /// Return the stored plan of the most similar entry at or above the
    /// similarity threshold. Increments the entry's access count on hit.
    pub async fn find_similar(&self, embedding: &[f32]) -> Option<ExecutionPlan> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();

        let best_key = entries
            .iter()
            .filter(|(_, item)| now - item.timestamp <= self.ttl)
            .map(|(key, item)| (key.clone(), cosine_similarity(embedding, &item.embedding)))
            .filter(|(_, similarity)| *similarity >= self.similarity_threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(key, _)| key);

        let key = best_key?;
        let item = entries.get_mut(&key)?;
        item.access_count += 1;
        tracing::debug!(request = %item.request, "reasoning cache hit");
        Some(item.plan.clone())
    }

    /// Store a plan under the stable hash of its request.
    pub async fn store(&self, request: &str, embedding: Vec<f32>, plan: ExecutionPlan) {
        let key = stable_hash(request);
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CachedReasoningItem {
                request: request.to_string(),
                embedding,
                plan,
                timestamp: Utc::now(),
                access_count: 0,
                success_rate: None,
            },
        );
    }

    /// Attach a post-execution outcome to a stored plan.
    pub async fn update_success_rate(&self, request: &str, success: bool) {
        let key = stable_hash(request);
        let mut entries = self.entries.write().await;
        if let Some(item) = entries.get_mut(&key) {
            let observed = if success { 1.0 } else { 0.0 };
            item.success_rate = Some(match item.success_rate {
                Some(rate) => 0.8 * rate + 0.2 * observed,
                None => observed,
            });
        }
    }

    /// Drop expired entries.
    pub async fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, item| now - item.timestamp <= self.ttl);
        before - entries.len()
    }

    /// Number of stored plans.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashEmbeddingClient;
    use crate::reasoning::plan::PlanStep;

    fn plan(request: &str) -> ExecutionPlan {
        ExecutionPlan::new(request, vec![PlanStep::analysis("inspect")])
    }

    #[tokio::test]
    async fn test_store_then_find_exact() {
        let cache = ReasoningCache::with_defaults();
        let client = HashEmbeddingClient::new(64);

        let embedding = cache
            .embedding_for("refactor the parser", &client)
            .await
            .unwrap();
        cache
            .store("refactor the parser", embedding.clone(), plan("refactor the parser"))
            .await;

        let hit = cache.find_similar(&embedding).await;
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().request, "refactor the parser");
    }

    #[tokio::test]
    async fn test_dissimilar_misses() {
        let cache = ReasoningCache::with_defaults();
        let client = HashEmbeddingClient::new(64);

        let stored = cache.embedding_for("refactor the parser", &client).await.unwrap();
        cache.store("refactor the parser", stored, plan("refactor the parser")).await;

        // Hash embeddings of unrelated strings are effectively orthogonal.
        let query = cache.embedding_for("write release notes", &client).await.unwrap();
        assert!(cache.find_similar(&query).await.is_none());
    }

    #[tokio::test]
    async fn test_hit_increments_access_count() {
        let cache = ReasoningCache::with_defaults();
        let client = HashEmbeddingClient::new(64);

        let embedding = cache.embedding_for("r", &client).await.unwrap();
        cache.store("r", embedding.clone(), plan("r")).await;
        cache.find_similar(&embedding).await;
        cache.find_similar(&embedding).await;

        let entries = cache.entries.read().await;
        let item = entries.values().next().unwrap();
        assert_eq!(item.access_count, 2);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = ReasoningCache::new(0.85, 0);
        let client = HashEmbeddingClient::new(64);

        let embedding = cache.embedding_for("old request", &client).await.unwrap();
        cache.store("old request", embedding.clone(), plan("old request")).await;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(cache.find_similar(&embedding).await.is_none());
        assert_eq!(cache.evict_expired().await, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_success_rate() {
        let cache = ReasoningCache::with_defaults();
        let client = HashEmbeddingClient::new(64);

        let embedding = cache.embedding_for("task", &client).await.unwrap();
        cache.store("task", embedding, plan("task")).await;

        cache.update_success_rate("task", true).await;
        cache.update_success_rate("task", false).await;

        let entries = cache.entries.read().await;
        let rate = entries.values().next().unwrap().success_rate.unwrap();
        assert!((rate - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_memo_returns_same_embedding() {
        let cache = ReasoningCache::with_defaults();
        let client = HashEmbeddingClient::new(64);

        let first = cache.embedding_for("same", &client).await.unwrap();
        let second = cache.embedding_for("same", &client).await.unwrap();
        assert_eq!(first, second);
    }
}
