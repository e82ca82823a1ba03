//! The Darwinian evolution engine.
//!
//! A closed loop: benchmark the current system, propose typed hypotheses,
//! test each one in an isolated git branch under the same benchmark harness,
//! and merge only measured improvements that clear the configured threshold,
//! with rollback on regression.

mod benchmark;
mod engine;
mod hypothesis;
mod mutator;
mod rollback;
mod types;

pub use benchmark::{
    BenchmarkRunner, BenchmarkRunnerConfig, BenchmarkSuite, BenchmarkTest, FixedSuite, RunContext,
};
pub use engine::{EngineConfig, EvolutionEngine};
pub use hypothesis::{GenerationContext, GeneratorConfig, HypothesisGenerator};
pub use mutator::{CodeMutator, MutatorConfig};
pub use rollback::{
    RollbackManager, RollbackManagerConfig, RollbackPlan, VerificationOutcome, VerificationStep,
};
pub use types::{
    BenchmarkResult, BenchmarkResults, Bottleneck, Branch, BranchKind, Checkpoint, CyclePhase,
    EvolutionCycle, EvolutionMetrics, GeneratedBy, Hypothesis, HypothesisKind, Mutation,
    MutationKind, PerformanceProfile, Priority, RiskLevel, SafetyCheck, Severity, TestResult,
};
