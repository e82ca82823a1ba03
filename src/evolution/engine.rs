//! The evolution engine: a strict four-phase cycle state machine.
//!
//! Cycles are serialized per process; hypothesis tests inside a cycle run as
//! a batched set of concurrent tasks, each holding the worktree lock across
//! its apply-and-benchmark span so experiment branches never interleave.

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex, RwLock};

use crate::error::{Error, Result};

use super::benchmark::{BenchmarkRunner, RunContext};
use super::hypothesis::{GenerationContext, HypothesisGenerator};
use super::mutator::CodeMutator;
use super::rollback::RollbackManager;
use super::types::{
    BenchmarkResults, CyclePhase, EvolutionCycle, EvolutionMetrics, Hypothesis, HypothesisKind,
    PerformanceProfile, TestResult,
};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Concurrent hypothesis tests per batch.
    pub parallel_hypotheses: usize,
    /// Minimum measured improvement (percent) for a test to succeed.
    pub min_improvement_threshold: f64,
    /// Improvements at or above this merge without manual review.
    pub auto_approval_threshold: f64,
    /// 5-field cron expression; `None` disables scheduling.
    pub schedule: Option<String>,
    /// Directory holding `cycles.json`.
    pub history_dir: PathBuf,
    /// How many past cycles contribute recent failures to generation.
    pub recent_failure_cycles: usize,
}

impl EngineConfig {
    pub fn new(history_dir: impl Into<PathBuf>) -> Self {
        Self {
            parallel_hypotheses: 2,
            min_improvement_threshold: 1.0,
            auto_approval_threshold: 3.0,
            schedule: None,
            history_dir: history_dir.into(),
            recent_failure_cycles: 5,
        }
    }
}

struct EngineState {
    is_running: bool,
    current_performance: Option<BenchmarkResults>,
    metrics: EvolutionMetrics,
    history: Vec<EvolutionCycle>,
    queued: Vec<Hypothesis>,
}

/// Drives benchmark, generation, testing, and application phases.
pub struct EvolutionEngine {
    config: EngineConfig,
    runner: Arc<BenchmarkRunner>,
    generator: Arc<HypothesisGenerator>,
    mutator: Arc<CodeMutator>,
    rollback: Arc<RollbackManager>,
    state: RwLock<EngineState>,
    cycle_gate: Mutex<()>,
    scheduler_stop: Mutex<Option<watch::Sender<bool>>>,
}

impl EvolutionEngine {
    pub fn new(
        config: EngineConfig,
        runner: Arc<BenchmarkRunner>,
        generator: Arc<HypothesisGenerator>,
        mutator: Arc<CodeMutator>,
        rollback: Arc<RollbackManager>,
    ) -> Result<Self> {
        let history = Self::load_history(&config.history_dir)?;
        let metrics = Self::derive_metrics(&history);

        Ok(Self {
            config,
            runner,
            generator,
            mutator,
            rollback,
            state: RwLock::new(EngineState {
                is_running: false,
                current_performance: None,
                metrics,
                history,
                queued: Vec::new(),
            }),
            cycle_gate: Mutex::new(()),
            scheduler_stop: Mutex::new(None),
        })
    }

    fn cycles_path(history_dir: &std::path::Path) -> PathBuf {
        history_dir.join("cycles.json")
    }

    fn load_history(history_dir: &std::path::Path) -> Result<Vec<EvolutionCycle>> {
        let path = Self::cycles_path(history_dir);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    /// Mark the engine running and register the schedule trigger, if any.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        self.state.write().await.is_running = true;

        if let Some(expression) = &self.config.schedule {
            // The cron crate wants a seconds field; 5-field expressions get
            // a zero prepended.
            let normalized = format!("0 {expression}");
            let schedule = cron::Schedule::from_str(&normalized)
                .map_err(|e| Error::Config(format!("invalid cron expression '{expression}': {e}")))?;

            let (stop_tx, mut stop_rx) = watch::channel(false);
            *self.scheduler_stop.lock().await = Some(stop_tx);

            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    let Some(next) = schedule.upcoming(Utc).next() else {
                        break;
                    };
                    let wait = (next - Utc::now()).to_std().unwrap_or_default();
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {
                            if let Err(e) = engine.run_evolution_cycle().await {
                                tracing::warn!(error = %e, "scheduled evolution cycle failed");
                            }
                        }
                        _ = stop_rx.changed() => break,
                    }
                }
                tracing::debug!("evolution schedule stopped");
            });
            tracing::info!(schedule = %expression, "evolution schedule registered");
        }
        Ok(())
    }

    /// Unregister the schedule and let any in-flight cycle drain.
    pub async fn stop(&self) {
        self.state.write().await.is_running = false;
        if let Some(stop) = self.scheduler_stop.lock().await.take() {
            let _ = stop.send(true);
        }
        // Draining: waiting on the gate returns once the current cycle ends.
        let _ = self.cycle_gate.lock().await;
    }

    /// Queue a manually authored hypothesis for the next cycle.
    pub async fn queue_hypothesis(&self, hypothesis: Hypothesis) {
        self.state.write().await.queued.push(hypothesis);
    }

    /// Aggregate metrics over completed cycles.
    pub async fn metrics(&self) -> EvolutionMetrics {
        self.state.read().await.metrics.clone()
    }

    /// Last observed benchmark results on main.
    pub async fn current_performance(&self) -> Option<BenchmarkResults> {
        self.state.read().await.current_performance.clone()
    }

    /// Completed cycle history, oldest first.
    pub async fn history(&self) -> Vec<EvolutionCycle> {
        self.state.read().await.history.clone()
    }

    /// Run one evolution cycle. Cycles are serialized; an overlapping
    /// invocation is rejected rather than queued.
    pub async fn run_evolution_cycle(&self) -> Result<EvolutionCycle> {
        if !self.state.read().await.is_running {
            return Err(Error::Internal("engine is not running".into()));
        }
        let _gate = self
            .cycle_gate
            .try_lock()
            .map_err(|_| Error::Internal("evolution cycle already in progress".into()))?;

        let mut cycle = EvolutionCycle::begin();
        tracing::info!(cycle = %cycle.id, "evolution cycle started");

        match self.run_phases(&mut cycle).await {
            Ok(()) => {
                self.set_phase(&mut cycle, CyclePhase::Complete)?;
                cycle.end_time = Some(Utc::now());
                self.finish_cycle(cycle.clone()).await?;
                tracing::info!(
                    cycle = %cycle.id,
                    improvement = cycle.total_improvement,
                    applied = cycle.applied_improvements.len(),
                    "evolution cycle complete"
                );
                Ok(cycle)
            }
            Err(e) => {
                cycle.phase = CyclePhase::Failed;
                cycle.end_time = Some(Utc::now());
                cycle.error = Some(e.to_string());
                // Partial state still lands in history.
                if let Err(persist_err) = self.finish_cycle(cycle.clone()).await {
                    tracing::warn!(error = %persist_err, "failed to persist failed cycle");
                }
                tracing::warn!(cycle = %cycle.id, error = %e, "evolution cycle failed");
                Err(e)
            }
        }
    }

    async fn run_phases(&self, cycle: &mut EvolutionCycle) -> Result<()> {
        // Phase 1: benchmark.
        self.rollback
            .create_checkpoint(&format!("pre-benchmark for cycle {}", cycle.id), None)
            .await?;
        let baseline = self.runner.run(&RunContext::default()).await?;
        self.state.write().await.current_performance = Some(baseline.clone());
        cycle.baseline = Some(baseline.clone());

        // Phase 2: hypothesis generation.
        self.set_phase(cycle, CyclePhase::HypothesisGeneration)?;
        let context = self.build_generation_context(cycle, &baseline).await;
        let mut hypotheses = self.generator.generate(&context).await?;
        hypotheses.extend(self.drain_queued(&cycle.id).await);
        cycle.hypotheses = hypotheses;

        // Phase 3: testing, in batches of `parallel_hypotheses`.
        self.set_phase(cycle, CyclePhase::Testing)?;
        for batch in cycle.hypotheses.chunks(self.config.parallel_hypotheses.max(1)) {
            let tests = batch.iter().map(|h| self.test_hypothesis(h, &baseline));
            cycle.test_results.extend(join_all(tests).await);
        }
        for result in &cycle.test_results {
            if let Some(hypothesis) = cycle
                .hypotheses
                .iter_mut()
                .find(|h| h.id == result.hypothesis_id)
            {
                hypothesis.succeeded = Some(result.success);
            }
        }

        // Phase 4: application, best improvement first.
        self.set_phase(cycle, CyclePhase::Application)?;
        let mut successes: Vec<TestResult> = cycle
            .test_results
            .iter()
            .filter(|r| r.success)
            .cloned()
            .collect();
        successes.sort_by(|a, b| {
            b.improvement
                .partial_cmp(&a.improvement)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.hypothesis_id.cmp(&b.hypothesis_id))
        });

        for result in successes {
            if result.improvement >= self.config.auto_approval_threshold {
                self.apply_improvement(cycle, &result).await?;
            } else {
                tracing::info!(
                    hypothesis = %result.hypothesis_id,
                    improvement = result.improvement,
                    "improvement below auto-approval threshold, branch kept for manual review"
                );
            }
        }
        Ok(())
    }

    fn set_phase(&self, cycle: &mut EvolutionCycle, next: CyclePhase) -> Result<()> {
        if !cycle.phase.can_transition(next) {
            return Err(Error::cycle_failure(
                &cycle.id,
                cycle.phase.to_string(),
                format!("illegal phase transition to {next}"),
            ));
        }
        cycle.phase = next;
        tracing::debug!(cycle = %cycle.id, phase = %next, "phase transition");
        Ok(())
    }

    async fn drain_queued(&self, cycle_id: &str) -> Vec<Hypothesis> {
        let mut state = self.state.write().await;
        let mut queued = std::mem::take(&mut state.queued);
        for hypothesis in &mut queued {
            hypothesis.cycle_id = Some(cycle_id.to_string());
        }
        queued
    }

    async fn build_generation_context(
        &self,
        cycle: &EvolutionCycle,
        baseline: &BenchmarkResults,
    ) -> GenerationContext {
        let state = self.state.read().await;

        let historical: Vec<Hypothesis> = state
            .history
            .iter()
            .flat_map(|c| c.hypotheses.iter().cloned())
            .collect();

        let recent_failures: Vec<(HypothesisKind, String)> = {
            let recent = state
                .history
                .iter()
                .rev()
                .take(self.config.recent_failure_cycles);
            let mut seen = HashSet::new();
            let mut failures = Vec::new();
            for past in recent {
                for result in &past.test_results {
                    if result.success {
                        continue;
                    }
                    if let Some(hypothesis) = past
                        .hypotheses
                        .iter()
                        .find(|h| h.id == result.hypothesis_id)
                    {
                        let key = (hypothesis.kind, hypothesis.target_component.clone());
                        if seen.insert(key.clone()) {
                            failures.push(key);
                        }
                    }
                }
            }
            failures
        };

        GenerationContext {
            cycle_id: cycle.id.clone(),
            current_metrics: synthesize_profile(baseline),
            historical,
            recent_failures,
            bottlenecks: Vec::new(),
        }
    }

    /// Test one hypothesis in an isolated experiment branch.
    ///
    /// The worktree lock is held for the whole span so the branch under
    /// benchmark is the branch the mutations landed on.
    async fn test_hypothesis(&self, hypothesis: &Hypothesis, baseline: &BenchmarkResults) -> TestResult {
        let started = Instant::now();
        let _worktree = self.rollback.lock_worktree().await;

        let branch = match self.rollback.create_branch_locked(&hypothesis.id).await {
            Ok(branch) => branch,
            Err(e) => return TestResult::failed(&hypothesis.id, e.to_string()),
        };

        let outcome = self.test_on_branch(hypothesis, baseline, &branch.name).await;

        match outcome {
            Ok(mut result) => {
                result.duration_ms = started.elapsed().as_millis() as u64;
                if result.success {
                    // The branch survives for application; the tree goes
                    // back to main for the next test.
                    if let Err(e) = self.rollback.checkout_main_locked().await {
                        tracing::warn!(branch = %branch.name, error = %e, "checkout of main after test failed");
                    }
                } else if let Err(e) = self.rollback.delete_branch_locked(&branch.name).await {
                    tracing::warn!(branch = %branch.name, error = %e, "experiment branch cleanup failed");
                }
                result
            }
            Err(e) => {
                if let Err(cleanup) = self.rollback.delete_branch_locked(&branch.name).await {
                    tracing::warn!(branch = %branch.name, error = %cleanup, "experiment branch cleanup failed");
                }
                let mut result = TestResult::failed(&hypothesis.id, e.to_string());
                result.duration_ms = started.elapsed().as_millis() as u64;
                result
            }
        }
    }

    async fn test_on_branch(
        &self,
        hypothesis: &Hypothesis,
        baseline: &BenchmarkResults,
        branch: &str,
    ) -> Result<TestResult> {
        let mutations = self.mutator.generate_mutations(hypothesis)?;
        if mutations.is_empty() {
            let mut result = TestResult::failed(&hypothesis.id, "no mutations generated");
            result.mutations = mutations;
            return Ok(result);
        }

        self.rollback
            .apply_mutations_locked(&mutations, Some(branch))
            .await?;

        let results = self.runner.run_in_branch(branch, &RunContext::default()).await?;
        let improvement = BenchmarkRunner::calculate_improvement(baseline, &results);
        let success = improvement > 0.0 && improvement >= self.config.min_improvement_threshold;

        let mut result = TestResult::new(&hypothesis.id, success, improvement);
        result.mutations = mutations;
        result.benchmark_results = Some(results);
        Ok(result)
    }

    /// Merge an approved improvement into main.
    async fn apply_improvement(&self, cycle: &mut EvolutionCycle, result: &TestResult) -> Result<()> {
        let branch = self
            .rollback
            .tracked_branches()
            .await
            .into_iter()
            .find(|b| b.metadata.get("hypothesis_id").map(|id| id.as_str()) == Some(result.hypothesis_id.as_str()))
            .ok_or_else(|| {
                Error::Internal(format!(
                    "no tracked branch for hypothesis {}",
                    result.hypothesis_id
                ))
            })?;

        self.rollback
            .create_checkpoint(
                &format!("pre-improvement {}", result.hypothesis_id),
                self.state.read().await.current_performance.clone(),
            )
            .await?;

        self.rollback.merge_to_main(&branch.name).await?;

        if let Some(results) = &result.benchmark_results {
            self.state.write().await.current_performance = Some(results.clone());
        }
        cycle.applied_improvements.push(result.hypothesis_id.clone());
        cycle.total_improvement += result.improvement;
        tracing::info!(
            hypothesis = %result.hypothesis_id,
            improvement = result.improvement,
            "improvement merged into main"
        );
        Ok(())
    }

    /// Terminal bookkeeping: metrics update and history append.
    async fn finish_cycle(&self, cycle: EvolutionCycle) -> Result<()> {
        let mut state = self.state.write().await;
        state.history.push(cycle);
        state.metrics = Self::derive_metrics(&state.history);

        let score = state.current_performance.as_ref().map(|b| b.average_score());
        if let Some(score) = score {
            state.metrics.best_performance = Some(
                state
                    .metrics
                    .best_performance
                    .map_or(score, |b| b.max(score)),
            );
        }

        fs::create_dir_all(&self.config.history_dir)?;
        fs::write(
            Self::cycles_path(&self.config.history_dir),
            serde_json::to_vec_pretty(&state.history)?,
        )?;
        Ok(())
    }

    fn derive_metrics(history: &[EvolutionCycle]) -> EvolutionMetrics {
        let completed: Vec<&EvolutionCycle> = history
            .iter()
            .filter(|c| c.phase.is_terminal())
            .collect();

        let tested: usize = completed.iter().map(|c| c.test_results.len()).sum();
        let succeeded: usize = completed
            .iter()
            .flat_map(|c| &c.test_results)
            .filter(|r| r.success)
            .count();
        let rolled_back: usize = completed
            .iter()
            .flat_map(|c| &c.test_results)
            .filter(|r| r.rollback_required)
            .count();
        let applied: usize = completed.iter().map(|c| c.applied_improvements.len()).sum();
        let applied_total: f64 = completed.iter().map(|c| c.total_improvement).sum();
        let durations: Vec<u64> = completed.iter().filter_map(|c| c.duration_ms()).collect();

        EvolutionMetrics {
            cycles_completed: completed.len() as u64,
            total_improvements: applied as u64,
            average_improvement: if applied == 0 {
                0.0
            } else {
                applied_total / applied as f64
            },
            success_rate: if tested == 0 {
                0.0
            } else {
                succeeded as f64 / tested as f64
            },
            rollback_rate: if tested == 0 {
                0.0
            } else {
                rolled_back as f64 / tested as f64
            },
            avg_cycle_duration_ms: if durations.is_empty() {
                0.0
            } else {
                durations.iter().sum::<u64>() as f64 / durations.len() as f64
            },
            best_performance: None,
        }
    }
}

/// Synthesize the performance profile the generator thresholds against.
fn synthesize_profile(baseline: &BenchmarkResults) -> PerformanceProfile {
    let durations: Vec<u64> = baseline.suites.values().map(|r| r.duration_ms).collect();
    let response_time_ms = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<u64>() as f64 / durations.len() as f64
    };

    PerformanceProfile {
        response_time_ms,
        accuracy: baseline.average_score() / 100.0,
        // Not measured by the benchmark harness; reported healthy so only
        // observable signals drive generation.
        token_efficiency: 1.0,
        memory_utilization: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::benchmark::{BenchmarkRunnerConfig, BenchmarkSuite, FixedSuite};
    use crate::evolution::hypothesis::GeneratorConfig;
    use crate::evolution::mutator::MutatorConfig;
    use crate::evolution::rollback::{tests::init_repo, RollbackManagerConfig};
    use crate::evolution::types::Priority;
    use serde_json::Value;
    use std::collections::HashMap;

    /// Generator config whose thresholds never fire against the fixed
    /// baseline (avg score 55 => accuracy 0.55).
    fn quiet_generator(history_dir: &std::path::Path) -> GeneratorConfig {
        GeneratorConfig {
            accuracy_threshold: 0.1,
            token_efficiency_threshold: 0.0,
            memory_threshold: 1.1,
            history_path: Some(history_dir.join("hypotheses.json")),
            ..Default::default()
        }
    }

    fn suites(branch_swe_passed: Option<u32>) -> Vec<Arc<dyn BenchmarkSuite>> {
        let mut swe = FixedSuite::new("swe_bench", 60, 100);
        if let Some(passed) = branch_swe_passed {
            swe = swe.with_branch_score("evolution-", passed);
        }
        vec![
            Arc::new(swe),
            Arc::new(FixedSuite::new("human_eval", 55, 100)),
            Arc::new(FixedSuite::new("polyglot", 50, 100)),
        ]
    }

    struct Harness {
        _repo: tempfile::TempDir,
        engine: Arc<EvolutionEngine>,
        repo_path: PathBuf,
    }

    fn harness(branch_swe_passed: Option<u32>) -> Harness {
        let repo = tempfile::tempdir().unwrap();
        let repo_path = repo.path().to_path_buf();

        // Repository under evolution, with a tunable config file.
        fs::create_dir_all(repo_path.join("core/orchestrator")).unwrap();
        fs::write(
            repo_path.join("core/orchestrator/config.json"),
            "{\n  \"cacheTimeout\": 1800\n}\n",
        )
        .unwrap();
        init_repo(&repo_path);

        let data = repo_path.join("data");
        let history_dir = data.join("evolution-history");

        let runner = Arc::new(BenchmarkRunner::new(
            suites(branch_swe_passed),
            BenchmarkRunnerConfig::new(data.join("benchmarks")),
        ));
        let generator = Arc::new(HypothesisGenerator::new(quiet_generator(&history_dir)));
        let mutator = Arc::new(CodeMutator::new(MutatorConfig {
            backup_dir: Some(history_dir.join("backups")),
            ..MutatorConfig::new(&repo_path)
        }));
        let rollback = Arc::new(
            RollbackManager::new(RollbackManagerConfig::new(
                &repo_path,
                history_dir.join("backups"),
            ))
            .unwrap(),
        );

        let engine = Arc::new(
            EvolutionEngine::new(
                EngineConfig::new(&history_dir),
                runner,
                generator,
                mutator,
                rollback,
            )
            .unwrap(),
        );
        Harness {
            _repo: repo,
            engine,
            repo_path,
        }
    }

    fn tuning_hypothesis() -> Hypothesis {
        let mut hypothesis = Hypothesis::new(
            "raise orchestrator cache timeout",
            HypothesisKind::ParameterTuning,
            "core/orchestrator",
        );
        hypothesis.proposed_changes =
            HashMap::from([("cacheTimeout".to_string(), Value::from(3600))]);
        hypothesis.priority = Priority::High;
        hypothesis
    }

    #[tokio::test]
    async fn test_noop_cycle_completes_cleanly() {
        let h = harness(None);
        Arc::clone(&h.engine).start().await.unwrap();

        let cycle = h.engine.run_evolution_cycle().await.unwrap();
        assert_eq!(cycle.phase, CyclePhase::Complete);
        assert!(cycle.hypotheses.is_empty());
        assert_eq!(cycle.total_improvement, 0.0);
        assert!(cycle.applied_improvements.is_empty());

        let baseline = cycle.baseline.unwrap();
        assert!((baseline.average_score() - 55.0).abs() < 1e-6);
        assert_eq!(
            h.engine.current_performance().await.unwrap(),
            baseline
        );

        let metrics = h.engine.metrics().await;
        assert_eq!(metrics.cycles_completed, 1);
        assert_eq!(metrics.success_rate, 0.0);
        assert_eq!(metrics.rollback_rate, 0.0);
    }

    #[tokio::test]
    async fn test_successful_hypothesis_is_merged() {
        let h = harness(Some(66)); // branch swe_bench 66 => +3.64%
        Arc::clone(&h.engine).start().await.unwrap();

        let hypothesis = tuning_hypothesis();
        let id = hypothesis.id.clone();
        h.engine.queue_hypothesis(hypothesis).await;

        let cycle = h.engine.run_evolution_cycle().await.unwrap();
        assert_eq!(cycle.phase, CyclePhase::Complete);
        assert_eq!(cycle.applied_improvements, vec![id.clone()]);
        assert!((cycle.total_improvement - 3.6363).abs() < 0.01);
        assert_eq!(cycle.test_results.len(), 1);
        assert!(cycle.test_results[0].success);
        assert!(!cycle.test_results[0].rollback_required);

        // Main carries the mutation; the experiment branch is gone.
        let config = fs::read_to_string(h.repo_path.join("core/orchestrator/config.json")).unwrap();
        assert!(config.contains("3600"));
        assert!(h
            .engine
            .rollback
            .tracked_branches()
            .await
            .is_empty());

        let metrics = h.engine.metrics().await;
        assert_eq!(metrics.total_improvements, 1);
        assert_eq!(metrics.success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_regression_rolls_back() {
        let h = harness(Some(58)); // branch swe_bench 58 => negative improvement
        Arc::clone(&h.engine).start().await.unwrap();

        h.engine.queue_hypothesis(tuning_hypothesis()).await;

        let cycle = h.engine.run_evolution_cycle().await.unwrap();
        assert_eq!(cycle.phase, CyclePhase::Complete);
        assert_eq!(cycle.test_results.len(), 1);
        assert!(!cycle.test_results[0].success);
        assert!(cycle.test_results[0].rollback_required);
        assert!(cycle.test_results[0].improvement < 0.0);
        assert!(cycle.applied_improvements.is_empty());

        // Main unchanged, branch deleted.
        let config = fs::read_to_string(h.repo_path.join("core/orchestrator/config.json")).unwrap();
        assert!(config.contains("1800"));
        assert!(h.engine.rollback.tracked_branches().await.is_empty());

        let metrics = h.engine.metrics().await;
        assert_eq!(metrics.rollback_rate, 1.0);
        assert_eq!(metrics.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_below_auto_approval_keeps_branch() {
        let h = harness(Some(63)); // +1.8%: above min (1.0), below auto approval (3.0)
        Arc::clone(&h.engine).start().await.unwrap();

        h.engine.queue_hypothesis(tuning_hypothesis()).await;
        let cycle = h.engine.run_evolution_cycle().await.unwrap();

        assert!(cycle.test_results[0].success);
        assert!(cycle.applied_improvements.is_empty());
        assert_eq!(cycle.total_improvement, 0.0);
        // Branch preserved for manual review.
        assert_eq!(h.engine.rollback.tracked_branches().await.len(), 1);
        let config = fs::read_to_string(h.repo_path.join("core/orchestrator/config.json")).unwrap();
        assert!(config.contains("1800"));
    }

    #[tokio::test]
    async fn test_engine_rejects_when_not_running() {
        let h = harness(None);
        let result = h.engine.run_evolution_cycle().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cycle_history_persisted() {
        let h = harness(None);
        Arc::clone(&h.engine).start().await.unwrap();
        h.engine.run_evolution_cycle().await.unwrap();
        h.engine.run_evolution_cycle().await.unwrap();

        let history = h.engine.history().await;
        assert_eq!(history.len(), 2);

        let path = h
            .repo_path
            .join("data/evolution-history/cycles.json");
        let persisted: Vec<EvolutionCycle> =
            serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        assert_eq!(persisted.len(), 2);
        assert!(persisted.iter().all(|c| c.phase == CyclePhase::Complete));
    }

    #[tokio::test]
    async fn test_stop_prevents_new_cycles() {
        let h = harness(None);
        Arc::clone(&h.engine).start().await.unwrap();
        h.engine.run_evolution_cycle().await.unwrap();
        h.engine.stop().await;
        assert!(h.engine.run_evolution_cycle().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_schedule_rejected() {
        let h = harness(None);
        let mut config = EngineConfig::new(h.repo_path.join("data/evolution-history"));
        config.schedule = Some("not a cron".to_string());

        let engine = Arc::new(
            EvolutionEngine::new(
                config,
                Arc::new(BenchmarkRunner::new(
                    suites(None),
                    BenchmarkRunnerConfig::new(h.repo_path.join("data/benchmarks")),
                )),
                Arc::new(HypothesisGenerator::new(GeneratorConfig::default())),
                Arc::new(CodeMutator::new(MutatorConfig::new(&h.repo_path))),
                Arc::new(
                    RollbackManager::new(RollbackManagerConfig::new(
                        &h.repo_path,
                        h.repo_path.join("backups"),
                    ))
                    .unwrap(),
                ),
            )
            .unwrap(),
        );
        assert!(Arc::clone(&engine).start().await.is_err());
    }
}
