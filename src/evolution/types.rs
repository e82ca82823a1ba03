//! Data model of the evolution engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Result of one benchmark suite run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// `100 * passed / total` when `total > 0`, else 0.
    pub score: f64,
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub duration_ms: u64,
}

impl BenchmarkResult {
    /// Build a result from counts, computing the score.
    pub fn from_counts(passed: u32, failed: u32, total: u32, duration_ms: u64) -> Self {
        let score = if total > 0 {
            100.0 * passed as f64 / total as f64
        } else {
            0.0
        };
        Self {
            score,
            total,
            passed,
            failed,
            duration_ms,
        }
    }
}

/// Canonical suite names.
pub const CANONICAL_SUITES: &[&str] = &["swe_bench", "human_eval", "polyglot"];

/// Named map of suite results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResults {
    pub suites: BTreeMap<String, BenchmarkResult>,
}

impl BenchmarkResults {
    pub fn insert(&mut self, name: impl Into<String>, result: BenchmarkResult) {
        self.suites.insert(name.into(), result);
    }

    pub fn get(&self, name: &str) -> Option<&BenchmarkResult> {
        self.suites.get(name)
    }

    /// Mean of the canonical suites' non-zero scores.
    pub fn average_score(&self) -> f64 {
        let scores: Vec<f64> = CANONICAL_SUITES
            .iter()
            .filter_map(|name| self.suites.get(*name))
            .map(|r| r.score)
            .filter(|s| *s > 0.0)
            .collect();
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }
}

/// Typed change class a hypothesis proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HypothesisKind {
    ParameterTuning,
    ArchitectureChange,
    PromptOptimization,
    ModelOptimization,
}

impl std::fmt::Display for HypothesisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParameterTuning => write!(f, "parameter-tuning"),
            Self::ArchitectureChange => write!(f, "architecture-change"),
            Self::PromptOptimization => write!(f, "prompt-optimization"),
            Self::ModelOptimization => write!(f, "model-optimization"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Weight used in hypothesis ranking.
    pub fn score(&self) -> f64 {
        match self {
            Self::Low => 0.3,
            Self::Medium => 0.6,
            Self::High => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Weight used in hypothesis ranking (lower risk scores higher).
    pub fn score(&self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 0.6,
            Self::High => 0.3,
        }
    }
}

/// Source that produced a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratedBy {
    Analysis,
    Pattern,
    Llm,
    Manual,
}

/// A proposed, typed change with an expected improvement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: String,
    pub description: String,
    pub kind: HypothesisKind,
    /// Repo-relative path prefix the change targets.
    pub target_component: String,
    /// Key to proposed-value mapping applied by the mutator.
    pub proposed_changes: HashMap<String, Value>,
    /// Expected improvement in percent.
    pub expected_improvement: f64,
    pub priority: Priority,
    pub risk_level: RiskLevel,
    pub estimated_duration_min: u32,
    pub generated_by: GeneratedBy,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<String>,
    /// Set post-hoc once the hypothesis has been tested or applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<bool>,
}

impl Hypothesis {
    pub fn new(
        description: impl Into<String>,
        kind: HypothesisKind,
        target_component: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            kind,
            target_component: target_component.into(),
            proposed_changes: HashMap::new(),
            expected_improvement: 0.0,
            priority: Priority::Medium,
            risk_level: RiskLevel::Medium,
            estimated_duration_min: 30,
            generated_by: GeneratedBy::Analysis,
            created_at: Utc::now(),
            cycle_id: None,
            succeeded: None,
        }
    }
}

/// Safety check names a mutation must pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SafetyCheck {
    SyntaxValidation,
    TypeCheck,
    CompileCheck,
    FormatValidation,
    SchemaValidation,
}

/// Concrete edit class of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
    FileModification,
    ConfigChange,
    ParameterUpdate,
    PromptTemplateChange,
}

/// A concrete file/config edit executing a hypothesis, paired with its
/// rollback data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub id: String,
    pub kind: MutationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_file: Option<PathBuf>,
    pub original_value: String,
    pub new_value: String,
    /// Pre-image written back on revert.
    pub rollback_data: String,
    pub safety_checks: Vec<SafetyCheck>,
    pub description: String,
}

/// Outcome of testing one hypothesis in its experiment branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub hypothesis_id: String,
    pub success: bool,
    /// Measured improvement in percent against the cycle baseline.
    pub improvement: f64,
    pub mutations: Vec<Mutation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark_results: Option<BenchmarkResults>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Always the negation of `success`.
    pub rollback_required: bool,
}

impl TestResult {
    /// Build a result, maintaining `rollback_required == !success`.
    pub fn new(hypothesis_id: impl Into<String>, success: bool, improvement: f64) -> Self {
        Self {
            hypothesis_id: hypothesis_id.into(),
            success,
            improvement,
            mutations: Vec::new(),
            benchmark_results: None,
            duration_ms: 0,
            errors: Vec::new(),
            rollback_required: !success,
        }
    }

    pub fn failed(hypothesis_id: impl Into<String>, error: impl Into<String>) -> Self {
        let mut result = Self::new(hypothesis_id, false, 0.0);
        result.errors.push(error.into());
        result
    }
}

/// Phase of an evolution cycle. Transitions are strictly forward except
/// `* -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CyclePhase {
    Benchmark,
    HypothesisGeneration,
    Testing,
    Application,
    Complete,
    Failed,
}

impl CyclePhase {
    fn order(&self) -> u8 {
        match self {
            Self::Benchmark => 0,
            Self::HypothesisGeneration => 1,
            Self::Testing => 2,
            Self::Application => 3,
            Self::Complete => 4,
            Self::Failed => 5,
        }
    }

    /// Whether a transition to `next` is legal.
    pub fn can_transition(&self, next: CyclePhase) -> bool {
        next == Self::Failed || next.order() == self.order() + 1
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Benchmark => write!(f, "benchmark"),
            Self::HypothesisGeneration => write!(f, "hypothesis-generation"),
            Self::Testing => write!(f, "testing"),
            Self::Application => write!(f, "application"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One run of the evolution pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionCycle {
    pub id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub phase: CyclePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<BenchmarkResults>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hypotheses: Vec<Hypothesis>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_results: Vec<TestResult>,
    /// Ids of hypotheses whose improvements were merged.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_improvements: Vec<String>,
    /// Sum of applied improvements, in percent.
    pub total_improvement: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvolutionCycle {
    pub fn begin() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            end_time: None,
            phase: CyclePhase::Benchmark,
            baseline: None,
            hypotheses: Vec::new(),
            test_results: Vec::new(),
            applied_improvements: Vec::new(),
            total_improvement: 0.0,
            error: None,
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds().max(0) as u64)
    }
}

/// Snapshot of repository state plus optional benchmark results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub branch: String,
    pub commit: String,
    /// Configuration files keyed by path.
    pub system_state: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark_results: Option<BenchmarkResults>,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchKind {
    Experiment,
    Rollback,
    Main,
}

/// A tracked git branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub commit: String,
    pub created_at: DateTime<Utc>,
    pub kind: BranchKind,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Aggregate metrics across completed cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvolutionMetrics {
    pub cycles_completed: u64,
    pub total_improvements: u64,
    pub average_improvement: f64,
    /// Fraction of tested hypotheses that succeeded.
    pub success_rate: f64,
    /// Fraction of tested hypotheses that required rollback.
    pub rollback_rate: f64,
    pub avg_cycle_duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_performance: Option<f64>,
}

/// Synthesized performance profile the generator thresholds against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceProfile {
    pub response_time_ms: f64,
    /// Benchmark-derived accuracy in `[0, 1]`.
    pub accuracy: f64,
    pub token_efficiency: f64,
    /// Memory utilization in `[0, 1]`.
    pub memory_utilization: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// An identified performance bottleneck.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bottleneck {
    pub component: String,
    pub kind: String,
    pub severity: Severity,
    pub impact: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benchmark_result_score() {
        let result = BenchmarkResult::from_counts(30, 20, 50, 1000);
        assert!((result.score - 60.0).abs() < 1e-6);
        assert!(result.passed + result.failed <= result.total);

        let empty = BenchmarkResult::from_counts(0, 0, 0, 0);
        assert_eq!(empty.score, 0.0);
    }

    #[test]
    fn test_average_score_ignores_zero_suites() {
        let mut results = BenchmarkResults::default();
        results.insert("swe_bench", BenchmarkResult::from_counts(60, 40, 100, 0));
        results.insert("human_eval", BenchmarkResult::from_counts(0, 0, 0, 0));
        results.insert("polyglot", BenchmarkResult::from_counts(50, 50, 100, 0));
        assert!((results.average_score() - 55.0).abs() < 1e-6);
    }

    #[test]
    fn test_average_score_empty() {
        assert_eq!(BenchmarkResults::default().average_score(), 0.0);
    }

    #[test]
    fn test_test_result_invariant() {
        assert!(!TestResult::new("h1", true, 2.0).rollback_required);
        assert!(TestResult::new("h1", false, -1.0).rollback_required);
        assert!(TestResult::failed("h1", "boom").rollback_required);
    }

    #[test]
    fn test_phase_transitions_forward_only() {
        use CyclePhase::*;
        assert!(Benchmark.can_transition(HypothesisGeneration));
        assert!(HypothesisGeneration.can_transition(Testing));
        assert!(Testing.can_transition(Application));
        assert!(Application.can_transition(Complete));
        assert!(Benchmark.can_transition(Failed));
        assert!(!Testing.can_transition(Benchmark));
        assert!(!Benchmark.can_transition(Testing));
        assert!(Complete.is_terminal());
        assert!(Failed.is_terminal());
    }

    #[test]
    fn test_ranking_weights() {
        assert_eq!(Priority::High.score(), 1.0);
        assert_eq!(Priority::Low.score(), 0.3);
        assert_eq!(RiskLevel::Low.score(), 1.0);
        assert_eq!(RiskLevel::High.score(), 0.3);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(HypothesisKind::ParameterTuning.to_string(), "parameter-tuning");
        assert_eq!(CyclePhase::HypothesisGeneration.to_string(), "hypothesis-generation");
    }
}
