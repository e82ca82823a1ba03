//! Cache storage backends.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;

use super::hierarchical::CacheEntry;

/// Storage backend for the hierarchical cache.
///
/// Implementations must be safe under concurrent callers; writes to the same
/// key are last-writer-wins.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch an entry by its joined key.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Store an entry under the joined key.
    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()>;

    /// Delete an entry. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Incrementally list keys starting with `prefix`.
    ///
    /// `cursor` is the last key returned by a previous page (`None` to start).
    /// Returns up to `limit` keys in ascending order and the cursor for the
    /// next page, or `None` when the scan is complete.
    async fn scan(
        &self,
        prefix: &str,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<(Vec<String>, Option<String>)>;

    /// List every key (used for statistics).
    async fn keys(&self) -> Result<Vec<String>>;

    /// Remove all entries.
    async fn clear(&self) -> Result<()>;
}

/// In-memory backend over a shared map.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(key).is_some())
    }

    async fn scan(
        &self,
        prefix: &str,
        cursor: Option<String>,
        limit: usize,
    ) -> Result<(Vec<String>, Option<String>)> {
        let entries = self.entries.read().await;
        let mut matching: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| cursor.as_deref().map_or(true, |c| k.as_str() > c))
            .cloned()
            .collect();
        matching.sort();
        matching.truncate(limit);

        let next = if matching.len() == limit {
            matching.last().cloned()
        } else {
            None
        };
        Ok((matching, next))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scan_pagination() {
        let backend = MemoryBackend::new();
        for i in 0..5 {
            backend
                .set(
                    &format!("proj:mod:{i}"),
                    CacheEntry::new(json!(i), 3, None),
                )
                .await
                .unwrap();
        }
        backend
            .set("other:key", CacheEntry::new(json!("x"), 2, None))
            .await
            .unwrap();

        let (page1, cursor) = backend.scan("proj:", None, 2).await.unwrap();
        assert_eq!(page1.len(), 2);
        assert!(cursor.is_some());

        let (page2, cursor) = backend.scan("proj:", cursor, 2).await.unwrap();
        assert_eq!(page2.len(), 2);

        let (page3, cursor) = backend.scan("proj:", cursor, 2).await.unwrap();
        assert_eq!(page3.len(), 1);
        assert!(cursor.is_none());

        let mut all: Vec<String> = page1.into_iter().chain(page2).chain(page3).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 5);
    }
}
