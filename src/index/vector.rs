//! Vector index backends and the index wrapper.
//!
//! The index and its metadata side-table are a single logical unit: `save`
//! writes both files, `load` reads both, and divergence (one half missing)
//! falls back to an empty index. The default [`FlatBackend`] is an exact L2
//! scan, which stays correct for small collections; an approximate backend
//! can be slotted in behind [`VectorBackend`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Metadata for one indexed chunk, keyed by internal id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRef {
    /// External identifier (e.g. chunk id).
    pub id: String,
    /// Source the text came from (usually a file path).
    pub source: String,
    /// The indexed text.
    pub text: String,
    /// Character start position within the source.
    pub start_pos: usize,
    /// Character end position within the source.
    pub end_pos: usize,
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Internal id of the matched vector.
    pub internal_id: u64,
    /// L2 distance to the query (lower is closer).
    pub score: f32,
    /// Side-table metadata for the match.
    pub metadata: Option<ChunkRef>,
}

/// Index statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub ntotal: u64,
    pub dimension: usize,
}

/// Storage/search backend for dense vectors.
pub trait VectorBackend: Send + Sync {
    /// Append vectors; each must have the backend's dimension.
    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()>;

    /// Return `(internal_id, distance)` for the `top_k` nearest vectors in
    /// ascending L2 distance order.
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(u64, f32)>>;

    /// Number of stored vectors.
    fn ntotal(&self) -> u64;

    /// Vector dimension.
    fn dimension(&self) -> usize;

    /// Serialize the backend payload.
    fn to_bytes(&self) -> Result<Vec<u8>>;

    /// Restore the backend payload.
    fn from_bytes(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Exact L2 scan over an in-memory vector table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatBackend {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }
}

impl VectorBackend for FlatBackend {
    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        for v in vectors {
            if v.len() != self.dimension {
                return Err(Error::Internal(format!(
                    "vector dimension {} does not match index dimension {}",
                    v.len(),
                    self.dimension
                )));
            }
        }
        self.vectors.extend(vectors.iter().cloned());
        Ok(())
    }

    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(u64, f32)>> {
        if query.len() != self.dimension {
            return Err(Error::Internal(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let mut scored: Vec<(u64, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let dist: f32 = v
                    .iter()
                    .zip(query.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>()
                    .sqrt();
                (i as u64, dist)
            })
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    fn ntotal(&self) -> u64 {
        self.vectors.len() as u64
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        *self = serde_json::from_slice(bytes)?;
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SideTable {
    entries: Vec<ChunkRef>,
}

/// Dense-vector index with an external metadata side-table.
pub struct VectorIndex<B: VectorBackend> {
    backend: Arc<RwLock<B>>,
    metadata: Arc<RwLock<SideTable>>,
    index_path: PathBuf,
}

impl VectorIndex<FlatBackend> {
    /// Create an empty flat index persisting under `dir/<name>.faiss`.
    pub fn flat(dir: impl AsRef<Path>, name: &str, dimension: usize) -> Self {
        Self::with_backend(dir, name, FlatBackend::new(dimension))
    }
}

impl<B: VectorBackend> VectorIndex<B> {
    /// Create an index over the given backend.
    pub fn with_backend(dir: impl AsRef<Path>, name: &str, backend: B) -> Self {
        Self {
            backend: Arc::new(RwLock::new(backend)),
            metadata: Arc::new(RwLock::new(SideTable::default())),
            index_path: dir.as_ref().join(format!("{name}.faiss")),
        }
    }

    fn metadata_path(&self) -> PathBuf {
        let mut s = self.index_path.as_os_str().to_owned();
        s.push(".metadata.json");
        PathBuf::from(s)
    }

    /// Add length-matched vectors and metadata; assigns internal ids and
    /// persists the pair incrementally.
    pub async fn add(&self, vectors: &[Vec<f32>], metadatas: &[ChunkRef]) -> Result<Vec<u64>> {
        if vectors.len() != metadatas.len() {
            return Err(Error::Internal(format!(
                "vectors ({}) and metadatas ({}) must be length-matched",
                vectors.len(),
                metadatas.len()
            )));
        }
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        let mut backend = self.backend.write().await;
        let first_id = backend.ntotal();
        backend.add(vectors)?;

        let mut table = self.metadata.write().await;
        table.entries.extend(metadatas.iter().cloned());

        let ids: Vec<u64> = (first_id..backend.ntotal()).collect();
        self.persist(&backend, &table)?;
        Ok(ids)
    }

    /// Search for the `top_k` nearest vectors, ascending by L2 distance.
    /// An empty index returns an empty result.
    pub async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let backend = self.backend.read().await;
        if backend.ntotal() == 0 {
            return Ok(Vec::new());
        }

        let raw = backend.search(query, top_k)?;
        let table = self.metadata.read().await;

        Ok(raw
            .into_iter()
            .map(|(internal_id, score)| SearchHit {
                internal_id,
                score,
                metadata: table.entries.get(internal_id as usize).cloned(),
            })
            .collect())
    }

    /// Number of indexed vectors.
    pub async fn ntotal(&self) -> u64 {
        self.backend.read().await.ntotal()
    }

    /// Index statistics.
    pub async fn stats(&self) -> IndexStats {
        let backend = self.backend.read().await;
        IndexStats {
            ntotal: backend.ntotal(),
            dimension: backend.dimension(),
        }
    }

    /// Write index and metadata as a pair.
    pub async fn save(&self) -> Result<()> {
        let backend = self.backend.read().await;
        let table = self.metadata.read().await;
        self.persist(&backend, &table)
    }

    fn persist(&self, backend: &B, table: &SideTable) -> Result<()> {
        if let Some(parent) = self.index_path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&self.index_path, &backend.to_bytes()?)?;
        write_atomic(&self.metadata_path(), &serde_json::to_vec_pretty(table)?)?;
        Ok(())
    }

    /// Load index and metadata as a pair.
    ///
    /// If either half is missing the index stays empty rather than serving
    /// vectors without their side-table (or vice versa).
    pub async fn load(&self) -> Result<bool> {
        let index_bytes = fs::read(&self.index_path);
        let meta_bytes = fs::read(self.metadata_path());

        match (index_bytes, meta_bytes) {
            (Ok(index_bytes), Ok(meta_bytes)) => {
                let mut backend = self.backend.write().await;
                backend.from_bytes(&index_bytes)?;
                let mut table = self.metadata.write().await;
                *table = serde_json::from_slice(&meta_bytes)?;
                Ok(true)
            }
            _ => {
                tracing::warn!(path = %self.index_path.display(), "index/metadata pair incomplete, starting empty");
                Ok(false)
            }
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(i: usize) -> ChunkRef {
        ChunkRef {
            id: format!("chunk-{i}"),
            source: "src/lib.rs".to_string(),
            text: format!("text {i}"),
            start_pos: i * 10,
            end_pos: i * 10 + 10,
        }
    }

    #[tokio::test]
    async fn test_empty_search_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::flat(dir.path(), "test", 3);
        let hits = index.search(&[0.0, 0.0, 0.0], 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_add_assigns_sequential_ids() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::flat(dir.path(), "test", 2);

        let ids = index
            .add(&[vec![0.0, 0.0], vec![1.0, 1.0]], &[meta(0), meta(1)])
            .await
            .unwrap();
        assert_eq!(ids, vec![0, 1]);

        let ids = index.add(&[vec![2.0, 2.0]], &[meta(2)]).await.unwrap();
        assert_eq!(ids, vec![2]);
        assert_eq!(index.ntotal().await, 3);
    }

    #[tokio::test]
    async fn test_search_ascending_distance() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::flat(dir.path(), "test", 2);
        index
            .add(
                &[vec![10.0, 0.0], vec![1.0, 0.0], vec![5.0, 0.0]],
                &[meta(0), meta(1), meta(2)],
            )
            .await
            .unwrap();

        let hits = index.search(&[0.0, 0.0], 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].internal_id, 1);
        assert_eq!(hits[1].internal_id, 2);
        assert_eq!(hits[2].internal_id, 0);
        assert!(hits[0].score <= hits[1].score && hits[1].score <= hits[2].score);
        assert_eq!(hits[0].metadata.as_ref().unwrap().id, "chunk-1");
    }

    #[tokio::test]
    async fn test_search_caps_at_ntotal() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::flat(dir.path(), "test", 2);
        index.add(&[vec![0.0, 1.0]], &[meta(0)]).await.unwrap();

        let hits = index.search(&[0.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_length_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::flat(dir.path(), "test", 2);
        let result = index.add(&[vec![0.0, 0.0]], &[]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = VectorIndex::flat(dir.path(), "rt", 2);
            index
                .add(&[vec![1.0, 2.0], vec![3.0, 4.0]], &[meta(0), meta(1)])
                .await
                .unwrap();
            index.save().await.unwrap();
        }

        let reloaded = VectorIndex::flat(dir.path(), "rt", 2);
        assert!(reloaded.load().await.unwrap());
        assert_eq!(reloaded.ntotal().await, 2);

        let hits = reloaded.search(&[1.0, 2.0], 1).await.unwrap();
        assert_eq!(hits[0].internal_id, 0);
        assert_eq!(hits[0].metadata.as_ref().unwrap().id, "chunk-0");
    }

    #[tokio::test]
    async fn test_missing_metadata_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = VectorIndex::flat(dir.path(), "half", 2);
            index.add(&[vec![1.0, 2.0]], &[meta(0)]).await.unwrap();
            index.save().await.unwrap();
        }
        fs::remove_file(dir.path().join("half.faiss.metadata.json")).unwrap();

        let reloaded = VectorIndex::flat(dir.path(), "half", 2);
        assert!(!reloaded.load().await.unwrap());
        assert_eq!(reloaded.ntotal().await, 0);
    }
}
