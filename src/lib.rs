//! # evo-core
//!
//! Core of a self-improving development assistant: a Darwinian evolution
//! engine wrapped around a reasoning orchestrator.
//!
//! ## Core Components
//!
//! - **Evolution**: benchmark-driven cycle of hypothesis generation, isolated
//!   branch testing, and threshold-gated merge with rollback
//! - **Reasoning**: cached, pattern-learned, template- and tool-aware
//!   execution planning
//! - **Infra**: hierarchical cache, vector index, chunking engine, and the
//!   in-repo memory graph they share
//!
//! ## Example
//!
//! ```rust,ignore
//! use evo_core::{EvolutionEngine, ReasoningOrchestrator, ProjectContext};
//!
//! let plan = orchestrator.create_execution_plan("fix the login crash", &context).await?;
//! let cycle = engine.run_evolution_cycle().await?;
//! println!("applied {} improvements", cycle.applied_improvements.len());
//! ```

pub mod cache;
pub mod chunking;
pub mod config;
pub mod error;
pub mod evolution;
pub mod graph;
pub mod index;
pub mod llm;
pub mod reasoning;

// Re-exports for convenience
pub use cache::{CacheBackend, CacheStats, HierarchicalCache, MemoryBackend, WarmupEntry};
pub use chunking::{estimate_tokens, Chunk, ChunkStrategy, ChunkingEngine, SlidingWindow};
pub use config::EvoConfig;
pub use error::{Error, Result};
pub use evolution::{
    BenchmarkResult, BenchmarkResults, BenchmarkRunner, BenchmarkRunnerConfig, BenchmarkSuite,
    Branch, Checkpoint, CodeMutator, CyclePhase, EngineConfig, EvolutionCycle, EvolutionEngine,
    EvolutionMetrics, FixedSuite, GenerationContext, GeneratorConfig, Hypothesis,
    HypothesisGenerator, HypothesisKind, Mutation, MutationKind, MutatorConfig, RollbackManager,
    RollbackManagerConfig, RunContext, TestResult,
};
pub use graph::{GraphEdge, GraphNode, MemoryGraph};
pub use index::{ChunkRef, FlatBackend, SearchHit, VectorBackend, VectorIndex};
pub use llm::{
    GenerateRequest, HashEmbeddingClient, HttpModelClient, ModelClient, ModelClientConfig,
    ReasonRequest, ReasonResponse, ToolDescriptor,
};
pub use reasoning::{
    Classification, ExecutionPlan, LearnedPattern, PatternSet, PlanStep, PlanTemplate,
    ProjectContext, ReasoningCache, ReasoningOrchestrator, RequestCategory, RequestComplexity,
    TemplateLibrary, ToolSelector, ToolSelectorConfig,
};
