//! Crate-wide configuration.
//!
//! `EvoConfig` holds the persisted-state layout and the knobs shared across
//! subsystems. Paths support `~` and `$VAR` expansion. Construction validates
//! the cross-field invariants (chunking overlap, thresholds) and fails with
//! [`Error::Config`] on violation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration for the evolution engine and reasoning layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvoConfig {
    /// Root for all persisted state (default: `data`).
    pub data_dir: PathBuf,
    /// Directory holding plan template JSON files (default: `config/plan_templates`).
    pub template_dir: PathBuf,
    /// Working directory of the repository under evolution (default: `.`).
    pub working_dir: PathBuf,
    /// Embedding dimension used by the vector index and similarity stores.
    pub embedding_dimension: usize,
    /// Default chunk size in characters.
    pub chunk_size: usize,
    /// Default chunk overlap in characters. Must be `< chunk_size`.
    pub chunk_overlap: usize,
    /// Default cache TTL in seconds.
    pub cache_ttl_secs: u64,
    /// Cron expression for scheduled evolution cycles (5-field).
    pub schedule: String,
}

impl Default for EvoConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            template_dir: PathBuf::from("config/plan_templates"),
            working_dir: PathBuf::from("."),
            embedding_dimension: 384,
            chunk_size: 2000,
            chunk_overlap: 200,
            cache_ttl_secs: 3600,
            schedule: "0 2 * * *".to_string(),
        }
    }
}

impl EvoConfig {
    /// Create a config rooted at the given data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load configuration overrides from the environment.
    ///
    /// Recognized variables: `EVO_DATA_DIR`, `EVO_TEMPLATE_DIR`,
    /// `EVO_WORKING_DIR`, `EVO_EMBEDDING_DIM`, `EVO_CHUNK_SIZE`,
    /// `EVO_CHUNK_OVERLAP`, `EVO_CACHE_TTL_SECS`, `EVO_SCHEDULE`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("EVO_DATA_DIR") {
            config.data_dir = expand_path(&dir);
        }
        if let Ok(dir) = std::env::var("EVO_TEMPLATE_DIR") {
            config.template_dir = expand_path(&dir);
        }
        if let Ok(dir) = std::env::var("EVO_WORKING_DIR") {
            config.working_dir = expand_path(&dir);
        }
        if let Ok(dim) = std::env::var("EVO_EMBEDDING_DIM") {
            config.embedding_dimension = dim
                .parse()
                .map_err(|_| Error::Config(format!("invalid EVO_EMBEDDING_DIM: {dim}")))?;
        }
        if let Ok(size) = std::env::var("EVO_CHUNK_SIZE") {
            config.chunk_size = size
                .parse()
                .map_err(|_| Error::Config(format!("invalid EVO_CHUNK_SIZE: {size}")))?;
        }
        if let Ok(overlap) = std::env::var("EVO_CHUNK_OVERLAP") {
            config.chunk_overlap = overlap
                .parse()
                .map_err(|_| Error::Config(format!("invalid EVO_CHUNK_OVERLAP: {overlap}")))?;
        }
        if let Ok(ttl) = std::env::var("EVO_CACHE_TTL_SECS") {
            config.cache_ttl_secs = ttl
                .parse()
                .map_err(|_| Error::Config(format!("invalid EVO_CACHE_TTL_SECS: {ttl}")))?;
        }
        if let Ok(schedule) = std::env::var("EVO_SCHEDULE") {
            config.schedule = schedule;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.embedding_dimension == 0 {
            return Err(Error::Config("embedding_dimension must be non-zero".into()));
        }
        Ok(())
    }

    /// Directory for evolution cycle and hypothesis history.
    pub fn history_dir(&self) -> PathBuf {
        self.data_dir.join("evolution-history")
    }

    /// Directory for checkpoint and file backups.
    pub fn backup_dir(&self) -> PathBuf {
        self.history_dir().join("backups")
    }

    /// Directory for benchmark run results.
    pub fn benchmark_dir(&self) -> PathBuf {
        self.data_dir.join("benchmarks")
    }

    /// Directory for the vector index and its metadata side-table.
    pub fn vector_index_dir(&self) -> PathBuf {
        self.data_dir.join("vector-index")
    }

    /// Directory for learned pattern sets.
    pub fn decision_tree_dir(&self) -> PathBuf {
        self.data_dir.join("decision_trees")
    }

    /// Path of the tool selection matrix.
    pub fn tool_matrix_path(&self) -> PathBuf {
        self.data_dir.join("tool_selection_matrix.json")
    }

    /// Directory for persisted memory graphs.
    pub fn memory_graph_dir(&self) -> PathBuf {
        self.data_dir.join("memory-graphs")
    }
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::full(raw).map(|s| s.into_owned()).unwrap_or_else(|_| raw.to_string()))
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_configured_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => expand_path(s),
        None => path.to_path_buf(),
    }
}
