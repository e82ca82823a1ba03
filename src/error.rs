//! Error types for evo-core.

use thiserror::Error;

/// Result type alias using evo-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during evolution and reasoning operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration at construction. Fatal; abort startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A model endpoint or cache backend is unreachable.
    #[error("External service error: {service} - {message}")]
    ExternalService { service: String, message: String },

    /// A mutation failed its safety checks and was reverted.
    #[error("Mutation validation failed: {mutation_id} - {message}")]
    MutationValidation {
        mutation_id: String,
        message: String,
    },

    /// A benchmark test exceeded its timeout.
    #[error("Benchmark timed out after {duration_ms}ms")]
    BenchmarkTimeout { duration_ms: u64 },

    /// A git command failed.
    #[error("Git operation failed: {command} - {message}")]
    GitOperation { command: String, message: String },

    /// An evolution cycle failed in a phase.
    #[error("Evolution cycle {cycle_id} failed in phase {phase}: {message}")]
    CycleFailure {
        cycle_id: String,
        phase: String,
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an external service error.
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a mutation validation error.
    pub fn mutation_validation(
        mutation_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::MutationValidation {
            mutation_id: mutation_id.into(),
            message: message.into(),
        }
    }

    /// Create a benchmark timeout error.
    pub fn benchmark_timeout(duration_ms: u64) -> Self {
        Self::BenchmarkTimeout { duration_ms }
    }

    /// Create a git operation error.
    pub fn git(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::GitOperation {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a cycle failure error.
    pub fn cycle_failure(
        cycle_id: impl Into<String>,
        phase: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::CycleFailure {
            cycle_id: cycle_id.into(),
            phase: phase.into(),
            message: message.into(),
        }
    }
}
