//! Hierarchical TTL cache.
//!
//! Keys are ordered path tuples (`[project, module, file, function]`); the
//! tuple length is the entry's level for statistics. The store itself is a
//! pluggable [`CacheBackend`] so an external key-value service can replace
//! the in-memory map without changing the cache contract.

mod backend;
mod hierarchical;

pub use backend::{CacheBackend, MemoryBackend};
pub use hierarchical::{CacheEntry, CacheStats, HierarchicalCache, LevelStats, WarmupEntry};
