//! Path-tuple keyed TTL cache with pattern invalidation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;

use super::backend::CacheBackend;

const SEPARATOR: char = ':';
const SCAN_PAGE: usize = 100;

/// A stored cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached value.
    pub value: Value,
    /// When the entry was stored.
    pub stored_at: DateTime<Utc>,
    /// Best-effort read counter.
    pub access_count: u64,
    /// Number of key parts.
    pub level: usize,
    /// Entry-specific TTL in seconds, `None` for the cache default.
    pub ttl_secs: Option<u64>,
}

impl CacheEntry {
    pub fn new(value: Value, level: usize, ttl_secs: Option<u64>) -> Self {
        Self {
            value,
            stored_at: Utc::now(),
            access_count: 0,
            level,
            ttl_secs,
        }
    }

    fn is_expired(&self, default_ttl_secs: u64) -> bool {
        let ttl = self.ttl_secs.unwrap_or(default_ttl_secs);
        Utc::now() - self.stored_at > Duration::seconds(ttl as i64)
    }
}

/// Per-level statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelStats {
    pub count: usize,
    pub last_access: Option<DateTime<Utc>>,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub per_level: HashMap<usize, LevelStats>,
    pub total: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// An entry to seed via [`HierarchicalCache::warmup`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupEntry {
    pub key_parts: Vec<String>,
    pub value: Value,
    pub ttl_secs: Option<u64>,
}

/// Multi-level TTL cache keyed by ordered path tuples.
pub struct HierarchicalCache<B: CacheBackend> {
    backend: B,
    default_ttl_secs: u64,
    counters: Arc<RwLock<(u64, u64)>>,
    level_access: Arc<RwLock<HashMap<usize, DateTime<Utc>>>>,
}

impl<B: CacheBackend> HierarchicalCache<B> {
    pub fn new(backend: B, default_ttl_secs: u64) -> Self {
        Self {
            backend,
            default_ttl_secs,
            counters: Arc::new(RwLock::new((0, 0))),
            level_access: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn join(parts: &[String]) -> String {
        parts.join(&SEPARATOR.to_string())
    }

    /// Fetch a value. Expired entries read as misses and are lazily dropped.
    ///
    /// The access-count increment is best-effort: a backend failure while
    /// persisting it does not fail the read.
    pub async fn get(&self, key_parts: &[String]) -> Option<Value> {
        let key = Self::join(key_parts);

        let entry = match self.backend.get(&key).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache backend read failed, reporting miss");
                self.record_miss().await;
                return None;
            }
        };

        match entry {
            Some(mut entry) if !entry.is_expired(self.default_ttl_secs) => {
                entry.access_count += 1;
                let value = entry.value.clone();
                let level = entry.level;
                if let Err(e) = self.backend.set(&key, entry).await {
                    tracing::debug!(key = %key, error = %e, "access count update failed");
                }
                self.record_hit(level).await;
                Some(value)
            }
            Some(_) => {
                let _ = self.backend.delete(&key).await;
                self.record_miss().await;
                None
            }
            None => {
                self.record_miss().await;
                None
            }
        }
    }

    /// Store a value under the key tuple. Last-writer-wins.
    pub async fn set(
        &self,
        key_parts: &[String],
        value: Value,
        ttl_secs: Option<u64>,
    ) -> Result<()> {
        let key = Self::join(key_parts);
        let entry = CacheEntry::new(value, key_parts.len(), ttl_secs);
        self.backend.set(&key, entry).await
    }

    /// Delete every entry whose key tuple begins with `prefix_parts`.
    ///
    /// Scans incrementally so large key sets never block the backend on one
    /// sweep. Returns the number of deleted entries.
    pub async fn invalidate(&self, prefix_parts: &[String]) -> Result<usize> {
        let prefix = Self::join(prefix_parts);
        let mut deleted = 0;
        let mut cursor = None;

        loop {
            let (keys, next) = self.backend.scan(&prefix, cursor, SCAN_PAGE).await?;
            for key in &keys {
                // Only whole-part prefixes count: "proj:mod" must not match "proj:module".
                let matches = key == &prefix
                    || key
                        .strip_prefix(&prefix)
                        .map_or(false, |rest| rest.starts_with(SEPARATOR));
                if matches && self.backend.delete(key).await? {
                    deleted += 1;
                }
            }
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        tracing::debug!(prefix = %prefix, deleted, "cache invalidation complete");
        Ok(deleted)
    }

    /// Seed a batch of entries.
    pub async fn warmup(&self, entries: Vec<WarmupEntry>) -> Result<usize> {
        let count = entries.len();
        for entry in entries {
            self.set(&entry.key_parts, entry.value, entry.ttl_secs)
                .await?;
        }
        tracing::debug!(count, "cache warmup complete");
        Ok(count)
    }

    /// Current statistics: per-level counts plus hit/miss totals.
    pub async fn stats(&self) -> Result<CacheStats> {
        let keys = self.backend.keys().await?;
        let mut per_level: HashMap<usize, LevelStats> = HashMap::new();

        for key in &keys {
            let level = key.split(SEPARATOR).count();
            per_level.entry(level).or_default().count += 1;
        }

        let level_access = self.level_access.read().await;
        for (level, stats) in per_level.iter_mut() {
            stats.last_access = level_access.get(level).copied();
        }

        let (hits, misses) = *self.counters.read().await;
        Ok(CacheStats {
            total: keys.len(),
            per_level,
            hits,
            misses,
        })
    }

    /// Remove every entry.
    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await
    }

    async fn record_hit(&self, level: usize) {
        self.counters.write().await.0 += 1;
        self.level_access.write().await.insert(level, Utc::now());
    }

    async fn record_miss(&self) {
        self.counters.write().await.1 += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;
    use serde_json::json;

    fn parts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn cache() -> HierarchicalCache<MemoryBackend> {
        HierarchicalCache::new(MemoryBackend::new(), 3600)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = cache();
        let key = parts(&["proj", "modA", "fileX"]);
        cache.set(&key, json!({"v": 1}), None).await.unwrap();
        assert_eq!(cache.get(&key).await, Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn test_invalidate_prefix() {
        let cache = cache();
        cache
            .set(&parts(&["proj", "modA", "fileX"]), json!(1), None)
            .await
            .unwrap();
        cache
            .set(&parts(&["proj", "modB", "fileY"]), json!(2), None)
            .await
            .unwrap();

        let deleted = cache.invalidate(&parts(&["proj", "modA"])).await.unwrap();
        assert_eq!(deleted, 1);

        assert_eq!(cache.get(&parts(&["proj", "modA", "fileX"])).await, None);
        assert_eq!(
            cache.get(&parts(&["proj", "modB", "fileY"])).await,
            Some(json!(2))
        );
    }

    #[tokio::test]
    async fn test_invalidate_does_not_match_partial_part() {
        let cache = cache();
        cache
            .set(&parts(&["proj", "module", "f"]), json!(1), None)
            .await
            .unwrap();

        let deleted = cache.invalidate(&parts(&["proj", "mod"])).await.unwrap();
        assert_eq!(deleted, 0);
        assert!(cache.get(&parts(&["proj", "module", "f"])).await.is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss() {
        let cache = HierarchicalCache::new(MemoryBackend::new(), 3600);
        let key = parts(&["a", "b"]);
        cache.set(&key, json!("v"), Some(0)).await.unwrap();
        // Zero TTL: expired on the next read.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(cache.get(&key).await, None);
    }

    #[tokio::test]
    async fn test_stats_per_level() {
        let cache = cache();
        cache.set(&parts(&["p"]), json!(1), None).await.unwrap();
        cache.set(&parts(&["p", "m"]), json!(2), None).await.unwrap();
        cache
            .set(&parts(&["p", "m", "f"]), json!(3), None)
            .await
            .unwrap();
        cache
            .set(&parts(&["q", "n", "g"]), json!(4), None)
            .await
            .unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.per_level.get(&1).map(|l| l.count), Some(1));
        assert_eq!(stats.per_level.get(&3).map(|l| l.count), Some(2));
    }

    #[tokio::test]
    async fn test_hit_miss_counters() {
        let cache = cache();
        let key = parts(&["k"]);
        cache.get(&key).await;
        cache.set(&key, json!(1), None).await.unwrap();
        cache.get(&key).await;

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_warmup_seeds_entries() {
        let cache = cache();
        let seeded = cache
            .warmup(vec![
                WarmupEntry {
                    key_parts: parts(&["w", "1"]),
                    value: json!("a"),
                    ttl_secs: None,
                },
                WarmupEntry {
                    key_parts: parts(&["w", "2"]),
                    value: json!("b"),
                    ttl_secs: None,
                },
            ])
            .await
            .unwrap();
        assert_eq!(seeded, 2);
        assert_eq!(cache.get(&parts(&["w", "1"])).await, Some(json!("a")));
    }

    #[tokio::test]
    async fn test_access_count_increments() {
        let cache = cache();
        let key = parts(&["c"]);
        cache.set(&key, json!(1), None).await.unwrap();
        cache.get(&key).await;
        cache.get(&key).await;

        let raw = cache.backend.get("c").await.unwrap().unwrap();
        assert_eq!(raw.access_count, 2);
    }
}
