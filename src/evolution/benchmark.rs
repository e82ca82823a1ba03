//! Benchmark suite contract and runner.
//!
//! The runner contract (load tests, execute each under a timeout, collect
//! results) is separate from any concrete suite. Suites are injected as
//! trait objects so deterministic fixtures can stand in for the real
//! harnesses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

use super::types::{BenchmarkResult, BenchmarkResults};

/// One test inside a suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkTest {
    pub id: String,
    pub name: String,
}

/// Execution context for a run.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Experiment branch the working tree is on, if any. The caller must
    /// have checked the branch out (via the rollback manager) beforehand.
    pub branch: Option<String>,
}

/// A named benchmark suite.
#[async_trait]
pub trait BenchmarkSuite: Send + Sync {
    fn name(&self) -> &str;

    /// Load the fixed test set for this suite.
    async fn load_tests(&self) -> Result<Vec<BenchmarkTest>>;

    /// Execute one test; `Ok(true)` is a pass. Errors count as failures.
    async fn execute_test(&self, test: &BenchmarkTest, context: &RunContext) -> Result<bool>;
}

/// Deterministic suite fixture: a scripted pass/fail outcome per test, with
/// an optional different script for experiment-branch runs.
pub struct FixedSuite {
    name: String,
    baseline_passed: u32,
    total: u32,
    branch_passed: HashMap<String, u32>,
}

impl FixedSuite {
    /// A suite of `total` tests of which `passed` succeed.
    pub fn new(name: impl Into<String>, passed: u32, total: u32) -> Self {
        Self {
            name: name.into(),
            baseline_passed: passed,
            total,
            branch_passed: HashMap::new(),
        }
    }

    /// Script a different pass count for runs on a specific branch prefix.
    pub fn with_branch_score(mut self, branch_prefix: impl Into<String>, passed: u32) -> Self {
        self.branch_passed.insert(branch_prefix.into(), passed);
        self
    }

    fn passed_for(&self, context: &RunContext) -> u32 {
        if let Some(branch) = &context.branch {
            for (prefix, passed) in &self.branch_passed {
                if branch.starts_with(prefix.as_str()) {
                    return *passed;
                }
            }
        }
        self.baseline_passed
    }
}

#[async_trait]
impl BenchmarkSuite for FixedSuite {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load_tests(&self) -> Result<Vec<BenchmarkTest>> {
        Ok((0..self.total)
            .map(|i| BenchmarkTest {
                id: format!("{}-{i}", self.name),
                name: format!("{} case {i}", self.name),
            })
            .collect())
    }

    async fn execute_test(&self, test: &BenchmarkTest, context: &RunContext) -> Result<bool> {
        let index: u32 = test
            .id
            .rsplit('-')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Ok(index < self.passed_for(context))
    }
}

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct BenchmarkRunnerConfig {
    /// Directory results are persisted under (`<dir>/results/<runId>.json`).
    pub root_dir: PathBuf,
    /// Per-test timeout.
    pub test_timeout_ms: u64,
}

impl BenchmarkRunnerConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            test_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRun {
    run_id: String,
    timestamp: DateTime<Utc>,
    results: BenchmarkResults,
    config: PersistedRunConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRunConfig {
    suites: Vec<String>,
    test_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
}

/// Runs the enabled suites in order and persists each run.
pub struct BenchmarkRunner {
    suites: Vec<Arc<dyn BenchmarkSuite>>,
    config: BenchmarkRunnerConfig,
}

impl BenchmarkRunner {
    pub fn new(suites: Vec<Arc<dyn BenchmarkSuite>>, config: BenchmarkRunnerConfig) -> Self {
        Self { suites, config }
    }

    fn results_dir(&self) -> PathBuf {
        self.config.root_dir.join("results")
    }

    /// Run every suite, collecting per-suite results. The run is assigned a
    /// uuid and persisted under `results/<runId>.json`.
    pub async fn run(&self, context: &RunContext) -> Result<BenchmarkResults> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut results = BenchmarkResults::default();

        for suite in &self.suites {
            let result = self.run_suite(suite.as_ref(), context).await?;
            tracing::info!(
                suite = suite.name(),
                score = result.score,
                passed = result.passed,
                total = result.total,
                "benchmark suite finished"
            );
            results.insert(suite.name().to_string(), result);
        }

        self.persist_run(&run_id, &results, context)?;
        Ok(results)
    }

    /// Run the suites against an experiment branch. The rollback manager
    /// must already have the working tree on that branch.
    pub async fn run_in_branch(
        &self,
        branch: &str,
        context: &RunContext,
    ) -> Result<BenchmarkResults> {
        let branch_context = RunContext {
            branch: Some(branch.to_string()),
            ..context.clone()
        };
        self.run(&branch_context).await
    }

    async fn run_suite(
        &self,
        suite: &dyn BenchmarkSuite,
        context: &RunContext,
    ) -> Result<BenchmarkResult> {
        let tests = suite.load_tests().await?;
        let timeout = Duration::from_millis(self.config.test_timeout_ms);
        let started = Instant::now();

        let mut passed = 0u32;
        let mut failed = 0u32;

        for test in &tests {
            let outcome = tokio::time::timeout(timeout, suite.execute_test(test, context)).await;
            match outcome {
                Ok(Ok(true)) => passed += 1,
                Ok(Ok(false)) => failed += 1,
                Ok(Err(e)) => {
                    tracing::debug!(test = %test.id, error = %e, "benchmark test errored");
                    failed += 1;
                }
                Err(_) => {
                    tracing::warn!(test = %test.id, timeout_ms = self.config.test_timeout_ms, "benchmark test timed out");
                    failed += 1;
                }
            }
        }

        Ok(BenchmarkResult::from_counts(
            passed,
            failed,
            tests.len() as u32,
            started.elapsed().as_millis() as u64,
        ))
    }

    fn persist_run(
        &self,
        run_id: &str,
        results: &BenchmarkResults,
        context: &RunContext,
    ) -> Result<()> {
        let dir = self.results_dir();
        fs::create_dir_all(&dir)?;
        let persisted = PersistedRun {
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            results: results.clone(),
            config: PersistedRunConfig {
                suites: self.suites.iter().map(|s| s.name().to_string()).collect(),
                test_timeout_ms: self.config.test_timeout_ms,
                branch: context.branch.clone(),
            },
        };
        fs::write(
            dir.join(format!("{run_id}.json")),
            serde_json::to_vec_pretty(&persisted)?,
        )?;
        Ok(())
    }

    /// Read up to `limit` most-recent persisted runs, newest first.
    pub fn get_historical_results(&self, limit: usize) -> Result<Vec<BenchmarkResults>> {
        let pattern = self.results_dir().join("*.json");
        let mut runs: Vec<PersistedRun> = Vec::new();

        for entry in glob::glob(&pattern.to_string_lossy())
            .map_err(|e| Error::Internal(e.to_string()))?
        {
            let Ok(path) = entry else { continue };
            match fs::read(&path)
                .map_err(Error::from)
                .and_then(|bytes| serde_json::from_slice::<PersistedRun>(&bytes).map_err(Into::into))
            {
                Ok(run) => runs.push(run),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable benchmark result");
                }
            }
        }

        runs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(runs.into_iter().take(limit).map(|r| r.results).collect())
    }

    /// Percentage improvement of `current` over `baseline`, by canonical
    /// suite average. Zero when the baseline average is zero.
    pub fn calculate_improvement(baseline: &BenchmarkResults, current: &BenchmarkResults) -> f64 {
        let baseline_avg = baseline.average_score();
        if baseline_avg == 0.0 {
            return 0.0;
        }
        (current.average_score() - baseline_avg) / baseline_avg * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical_suites() -> Vec<Arc<dyn BenchmarkSuite>> {
        vec![
            Arc::new(FixedSuite::new("swe_bench", 60, 100)),
            Arc::new(FixedSuite::new("human_eval", 55, 100)),
            Arc::new(FixedSuite::new("polyglot", 50, 100)),
        ]
    }

    #[tokio::test]
    async fn test_run_collects_all_suites() {
        let dir = tempfile::tempdir().unwrap();
        let runner = BenchmarkRunner::new(
            canonical_suites(),
            BenchmarkRunnerConfig::new(dir.path()),
        );
        let results = runner.run(&RunContext::default()).await.unwrap();

        assert_eq!(results.suites.len(), 3);
        assert!((results.get("swe_bench").unwrap().score - 60.0).abs() < 1e-6);
        assert!((results.average_score() - 55.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_run_persists_result_file() {
        let dir = tempfile::tempdir().unwrap();
        let runner = BenchmarkRunner::new(
            canonical_suites(),
            BenchmarkRunnerConfig::new(dir.path()),
        );
        runner.run(&RunContext::default()).await.unwrap();
        runner.run(&RunContext::default()).await.unwrap();

        let files: Vec<_> = fs::read_dir(dir.path().join("results")).unwrap().collect();
        assert_eq!(files.len(), 2);

        let history = runner.get_historical_results(10).unwrap();
        assert_eq!(history.len(), 2);
        let limited = runner.get_historical_results(1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_branch_run_uses_branch_script() {
        let dir = tempfile::tempdir().unwrap();
        let suites: Vec<Arc<dyn BenchmarkSuite>> = vec![
            Arc::new(FixedSuite::new("swe_bench", 60, 100).with_branch_score("evolution-", 66)),
            Arc::new(FixedSuite::new("human_eval", 55, 100)),
            Arc::new(FixedSuite::new("polyglot", 50, 100)),
        ];
        let runner = BenchmarkRunner::new(suites, BenchmarkRunnerConfig::new(dir.path()));

        let baseline = runner.run(&RunContext::default()).await.unwrap();
        let branch = runner
            .run_in_branch("evolution-h1-123", &RunContext::default())
            .await
            .unwrap();

        let improvement = BenchmarkRunner::calculate_improvement(&baseline, &branch);
        assert!((improvement - 3.6363).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_improvement_zero_baseline() {
        let empty = BenchmarkResults::default();
        let mut current = BenchmarkResults::default();
        current.insert("swe_bench", BenchmarkResult::from_counts(10, 0, 10, 0));
        assert_eq!(BenchmarkRunner::calculate_improvement(&empty, &current), 0.0);
    }

    struct HangingSuite;

    #[async_trait]
    impl BenchmarkSuite for HangingSuite {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn load_tests(&self) -> Result<Vec<BenchmarkTest>> {
            Ok(vec![BenchmarkTest {
                id: "hang-0".into(),
                name: "hangs".into(),
            }])
        }

        async fn execute_test(&self, _test: &BenchmarkTest, _context: &RunContext) -> Result<bool> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BenchmarkRunnerConfig::new(dir.path());
        config.test_timeout_ms = 20;
        let runner = BenchmarkRunner::new(vec![Arc::new(HangingSuite)], config);

        let results = runner.run(&RunContext::default()).await.unwrap();
        let suite = results.get("hanging").unwrap();
        assert_eq!(suite.passed, 0);
        assert_eq!(suite.failed, 1);
    }

    struct ErroringSuite;

    #[async_trait]
    impl BenchmarkSuite for ErroringSuite {
        fn name(&self) -> &str {
            "erroring"
        }

        async fn load_tests(&self) -> Result<Vec<BenchmarkTest>> {
            Ok(vec![
                BenchmarkTest {
                    id: "e-0".into(),
                    name: "explodes".into(),
                },
                BenchmarkTest {
                    id: "e-1".into(),
                    name: "passes".into(),
                },
            ])
        }

        async fn execute_test(&self, test: &BenchmarkTest, _context: &RunContext) -> Result<bool> {
            if test.id == "e-0" {
                Err(Error::Internal("benchmark harness exploded".into()))
            } else {
                Ok(true)
            }
        }
    }

    #[tokio::test]
    async fn test_error_counts_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = BenchmarkRunner::new(
            vec![Arc::new(ErroringSuite)],
            BenchmarkRunnerConfig::new(dir.path()),
        );
        let results = runner.run(&RunContext::default()).await.unwrap();
        let suite = results.get("erroring").unwrap();
        assert_eq!(suite.passed, 1);
        assert_eq!(suite.failed, 1);
        assert!((suite.score - 50.0).abs() < 1e-6);
    }
}
