//! Dense-vector index with a persisted metadata side-table.

mod vector;

pub use vector::{ChunkRef, FlatBackend, IndexStats, SearchHit, VectorBackend, VectorIndex};
