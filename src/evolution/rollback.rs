//! Branch, checkpoint, and working-tree lifecycle around git.
//!
//! The working tree has one writer: this manager. Every method that mutates
//! the tree or moves HEAD holds the worktree lock, and the evolution engine
//! holds the same lock across an apply-and-benchmark span so experiment
//! branches never interleave.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::{Error, Result};

use super::types::{
    BenchmarkResults, Branch, BranchKind, Checkpoint, Mutation, MutationKind, RiskLevel,
};

/// One verification subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationStep {
    pub name: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    pub timeout_ms: u64,
}

impl VerificationStep {
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_ms: 120_000,
        }
    }
}

/// Result of running a verification plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub success: bool,
    /// `(step name, passed)` pairs in execution order.
    pub steps: Vec<(String, bool)>,
}

/// Mutations bundled with verification steps and a risk assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub id: String,
    pub mutations: Vec<Mutation>,
    pub verification_steps: Vec<VerificationStep>,
    pub risk: RiskLevel,
}

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct RollbackManagerConfig {
    pub working_dir: PathBuf,
    /// Checkpoints are persisted under `<backup_path>/checkpoints/`.
    pub backup_path: PathBuf,
    pub main_branch: String,
    pub max_checkpoints: usize,
    pub auto_cleanup: bool,
    /// Canonical verification commands bundled into rollback plans.
    pub compile_step: VerificationStep,
    pub test_step: VerificationStep,
}

impl RollbackManagerConfig {
    pub fn new(working_dir: impl Into<PathBuf>, backup_path: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            backup_path: backup_path.into(),
            main_branch: "main".to_string(),
            max_checkpoints: 20,
            auto_cleanup: true,
            compile_step: VerificationStep::new("compile", "npm", &["run", "build"]),
            test_step: VerificationStep::new("test", "npm", &["test"]),
        }
    }
}

/// Wraps a git working tree and a checkpoints directory.
pub struct RollbackManager {
    config: RollbackManagerConfig,
    git_binary: PathBuf,
    worktree: Arc<Mutex<()>>,
    branches: RwLock<HashMap<String, Branch>>,
}

impl RollbackManager {
    /// Fails when no git binary is on the path.
    pub fn new(config: RollbackManagerConfig) -> Result<Self> {
        let git_binary = which::which("git")
            .map_err(|e| Error::Config(format!("git binary not found: {e}")))?;
        Ok(Self {
            config,
            git_binary,
            worktree: Arc::new(Mutex::new(())),
            branches: RwLock::new(HashMap::new()),
        })
    }

    /// Acquire the worktree lock. The engine holds this across an
    /// apply-and-benchmark span so branch state cannot interleave.
    pub async fn lock_worktree(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.worktree).lock_owned().await
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.git_binary)
            .args(args)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::git(args.join(" "), e.to_string()))?;

        if !output.status.success() {
            return Err(Error::git(
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Current HEAD commit hash.
    pub async fn current_commit(&self) -> Result<String> {
        self.git(&["rev-parse", "HEAD"]).await
    }

    /// Current branch name.
    pub async fn current_branch(&self) -> Result<String> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    /// Create and check out an experiment branch for a hypothesis.
    pub async fn create_branch(&self, hypothesis_id: &str) -> Result<Branch> {
        let _guard = self.worktree.lock().await;
        self.create_branch_locked(hypothesis_id).await
    }

    /// Same as [`create_branch`] for callers already holding the worktree
    /// lock from [`lock_worktree`].
    pub async fn create_branch_locked(&self, hypothesis_id: &str) -> Result<Branch> {
        self.git(&["checkout", &self.config.main_branch]).await?;

        let name = format!("evolution-{hypothesis_id}-{}", Utc::now().timestamp_millis());
        self.git(&["checkout", "-b", &name]).await?;
        let commit = self.current_commit().await?;

        let branch = Branch {
            name: name.clone(),
            commit,
            created_at: Utc::now(),
            kind: BranchKind::Experiment,
            metadata: HashMap::from([("hypothesis_id".to_string(), hypothesis_id.to_string())]),
        };
        self.branches.write().await.insert(name, branch.clone());
        tracing::info!(branch = %branch.name, "experiment branch created");
        Ok(branch)
    }

    fn checkpoints_dir(&self) -> PathBuf {
        self.config.backup_path.join("checkpoints")
    }

    /// Snapshot branch, commit, and configuration files.
    pub async fn create_checkpoint(
        &self,
        description: &str,
        benchmark_results: Option<BenchmarkResults>,
    ) -> Result<Checkpoint> {
        let checkpoint = Checkpoint {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            branch: self.current_branch().await?,
            commit: self.current_commit().await?,
            system_state: self.capture_system_state(),
            benchmark_results,
            description: description.to_string(),
        };

        let dir = self.checkpoints_dir();
        fs::create_dir_all(&dir)?;
        fs::write(
            dir.join(format!("{}.json", checkpoint.id)),
            serde_json::to_vec_pretty(&checkpoint)?,
        )?;

        if self.config.auto_cleanup {
            self.trim_checkpoints()?;
        }
        tracing::debug!(checkpoint = %checkpoint.id, "checkpoint created");
        Ok(checkpoint)
    }

    /// Configuration files keyed by repo-relative path.
    fn capture_system_state(&self) -> HashMap<String, String> {
        let mut state = HashMap::new();
        let root = &self.config.working_dir;

        for name in ["package.json", "tsconfig.json", "Cargo.toml"] {
            let path = root.join(name);
            if let Ok(content) = fs::read_to_string(&path) {
                state.insert(name.to_string(), content);
            }
        }

        let pattern = root.join("config").join("**").join("*.json");
        if let Ok(paths) = glob::glob(&pattern.to_string_lossy()) {
            for path in paths.flatten() {
                let Ok(content) = fs::read_to_string(&path) else {
                    continue;
                };
                let rel = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                state.insert(rel, content);
            }
        }
        state
    }

    /// Drop the oldest checkpoints beyond `max_checkpoints`.
    fn trim_checkpoints(&self) -> Result<()> {
        let dir = self.checkpoints_dir();
        let mut checkpoints: Vec<(PathBuf, Checkpoint)> = Vec::new();

        let pattern = dir.join("*.json");
        if let Ok(paths) = glob::glob(&pattern.to_string_lossy()) {
            for path in paths.flatten() {
                if let Ok(bytes) = fs::read(&path) {
                    if let Ok(checkpoint) = serde_json::from_slice::<Checkpoint>(&bytes) {
                        checkpoints.push((path, checkpoint));
                    }
                }
            }
        }

        if checkpoints.len() <= self.config.max_checkpoints {
            return Ok(());
        }
        checkpoints.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp));
        let excess = checkpoints.len() - self.config.max_checkpoints;
        for (path, checkpoint) in checkpoints.into_iter().take(excess) {
            tracing::debug!(checkpoint = %checkpoint.id, "trimming old checkpoint");
            let _ = fs::remove_file(path);
        }
        Ok(())
    }

    /// Load a checkpoint by id.
    pub fn load_checkpoint(&self, id: &str) -> Result<Checkpoint> {
        let path = self.checkpoints_dir().join(format!("{id}.json"));
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Apply mutations on the working tree (optionally on a branch) and
    /// commit the result.
    pub async fn apply_mutations(&self, mutations: &[Mutation], branch: Option<&str>) -> Result<()> {
        let _guard = self.worktree.lock().await;
        self.apply_mutations_locked(mutations, branch).await
    }

    /// Same as [`apply_mutations`] for callers already holding the worktree
    /// lock from [`lock_worktree`].
    pub async fn apply_mutations_locked(
        &self,
        mutations: &[Mutation],
        branch: Option<&str>,
    ) -> Result<()> {
        if let Some(branch) = branch {
            self.git(&["checkout", branch]).await?;
        }

        for mutation in mutations {
            self.write_mutation(mutation, &mutation.new_value)?;
        }

        self.git(&["add", "-A"]).await?;
        let message = format!(
            "Apply {} mutation(s): {}",
            mutations.len(),
            mutations
                .iter()
                .map(|m| m.description.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        );
        self.git(&["commit", "-m", &message, "--allow-empty"]).await?;
        Ok(())
    }

    /// Revert mutations in reverse order by writing their rollback data,
    /// then commit.
    pub async fn rollback_mutations(&self, mutations: &[Mutation]) -> Result<()> {
        let _guard = self.worktree.lock().await;

        for mutation in mutations.iter().rev() {
            self.write_mutation(mutation, &mutation.rollback_data)?;
        }

        self.git(&["add", "-A"]).await?;
        self.git(&[
            "commit",
            "-m",
            &format!("Roll back {} mutation(s)", mutations.len()),
            "--allow-empty",
        ])
        .await?;
        Ok(())
    }

    /// Per-kind dispatch. Config-bearing kinds get a cheap JSON sanity parse
    /// before the write is considered final.
    fn write_mutation(&self, mutation: &Mutation, content: &str) -> Result<()> {
        let Some(path) = &mutation.target_file else {
            return Ok(());
        };
        match mutation.kind {
            MutationKind::FileModification | MutationKind::PromptTemplateChange => {
                fs::write(path, content)?;
            }
            MutationKind::ConfigChange | MutationKind::ParameterUpdate => {
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    serde_json::from_str::<serde_json::Value>(content).map_err(|e| {
                        Error::mutation_validation(&mutation.id, format!("invalid JSON: {e}"))
                    })?;
                }
                fs::write(path, content)?;
            }
        }
        Ok(())
    }

    /// Restore a checkpoint: branch, commit, and captured configuration.
    pub async fn rollback_to_checkpoint(&self, id: &str) -> Result<()> {
        let checkpoint = self.load_checkpoint(id)?;
        let _guard = self.worktree.lock().await;

        self.git(&["checkout", &checkpoint.branch]).await?;
        self.git(&["reset", "--hard", &checkpoint.commit]).await?;

        for (rel, content) in &checkpoint.system_state {
            let path = self.config.working_dir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content)?;
        }
        tracing::info!(checkpoint = %id, "rolled back to checkpoint");
        Ok(())
    }

    /// Force-delete a branch and drop it from tracking.
    pub async fn delete_branch(&self, name: &str) -> Result<()> {
        let _guard = self.worktree.lock().await;
        self.delete_branch_locked(name).await
    }

    /// Return the working tree to the main branch, leaving other branches
    /// intact. For callers already holding the worktree lock.
    pub async fn checkout_main_locked(&self) -> Result<()> {
        self.git(&["checkout", &self.config.main_branch]).await?;
        Ok(())
    }

    /// Same as [`delete_branch`] for callers already holding the worktree lock.
    pub async fn delete_branch_locked(&self, name: &str) -> Result<()> {
        self.git(&["checkout", &self.config.main_branch]).await?;
        self.git(&["branch", "-D", name]).await?;
        self.branches.write().await.remove(name);
        tracing::debug!(branch = %name, "experiment branch deleted");
        Ok(())
    }

    /// Merge a branch into main and delete it.
    pub async fn merge_to_main(&self, name: &str) -> Result<()> {
        let _guard = self.worktree.lock().await;
        self.git(&["checkout", &self.config.main_branch]).await?;
        self.git(&["merge", name]).await?;
        self.git(&["branch", "-D", name]).await?;
        self.branches.write().await.remove(name);
        tracing::info!(branch = %name, "merged into {}", self.config.main_branch);
        Ok(())
    }

    /// Branches currently tracked.
    pub async fn tracked_branches(&self) -> Vec<Branch> {
        self.branches.read().await.values().cloned().collect()
    }

    /// Bundle mutations with the canonical verification steps and a risk
    /// assessment.
    pub fn create_rollback_plan(&self, mutations: &[Mutation]) -> RollbackPlan {
        let high_risk = mutations
            .iter()
            .any(|m| m.kind == MutationKind::FileModification);
        let risk = if high_risk {
            RiskLevel::High
        } else if mutations.len() > 10 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        RollbackPlan {
            id: uuid::Uuid::new_v4().to_string(),
            mutations: mutations.to_vec(),
            verification_steps: vec![
                self.config.compile_step.clone(),
                self.config.test_step.clone(),
            ],
            risk,
        }
    }

    /// Run verification steps as subprocesses under their timeouts. Overall
    /// success requires every step to exit zero; a timed-out step is killed.
    pub async fn execute_verification(&self, steps: &[VerificationStep]) -> VerificationOutcome {
        let mut outcome = VerificationOutcome {
            success: true,
            steps: Vec::new(),
        };

        for step in steps {
            let passed = self.run_verification_step(step).await;
            if !passed {
                outcome.success = false;
            }
            outcome.steps.push((step.name.clone(), passed));
        }
        outcome
    }

    async fn run_verification_step(&self, step: &VerificationStep) -> bool {
        let child = Command::new(&step.command)
            .args(&step.args)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(step = %step.name, error = %e, "verification step failed to spawn");
                return false;
            }
        };

        match tokio::time::timeout(Duration::from_millis(step.timeout_ms), child.wait()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::warn!(step = %step.name, error = %e, "verification step failed");
                false
            }
            Err(_) => {
                tracing::warn!(step = %step.name, timeout_ms = step.timeout_ms, "verification step timed out, killing");
                let _ = child.kill().await;
                false
            }
        }
    }

    /// Working directory under management.
    pub fn working_dir(&self) -> &Path {
        &self.config.working_dir
    }

    /// Configured main branch name.
    pub fn main_branch(&self) -> &str {
        &self.config.main_branch
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Initialize a scratch repository with one commit on `main`.
    pub(crate) fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            let status = std::process::Command::new("git")
                .args(args)
                .current_dir(dir)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .expect("git invocation failed");
            assert!(status.success(), "git {args:?} failed");
        };
        run(&["init", "-q"]);
        run(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        run(&["config", "user.email", "evo@example.com"]);
        run(&["config", "user.name", "evo"]);
        fs::write(
            dir.join("config.json"),
            "{\n  \"cacheTimeout\": 1800\n}\n",
        )
        .unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-q", "-m", "initial"]);
    }

    fn manager(dir: &Path) -> RollbackManager {
        RollbackManager::new(RollbackManagerConfig::new(dir, dir.join("backups"))).unwrap()
    }

    fn mutation(dir: &Path, new_value: &str) -> Mutation {
        let original = fs::read_to_string(dir.join("config.json")).unwrap();
        Mutation {
            id: "m1".into(),
            kind: MutationKind::ParameterUpdate,
            target_file: Some(dir.join("config.json")),
            original_value: original.clone(),
            new_value: new_value.to_string(),
            rollback_data: original,
            safety_checks: Vec::new(),
            description: "update cacheTimeout".into(),
        }
    }

    #[tokio::test]
    async fn test_create_branch_naming_and_tracking() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let manager = manager(dir.path());

        let branch = manager.create_branch("h1").await.unwrap();
        assert!(branch.name.starts_with("evolution-h1-"));
        assert_eq!(branch.kind, BranchKind::Experiment);
        assert_eq!(branch.metadata.get("hypothesis_id").unwrap(), "h1");
        assert_eq!(manager.current_branch().await.unwrap(), branch.name);
        assert_eq!(manager.tracked_branches().await.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_then_rollback_restores_file() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let manager = manager(dir.path());

        let branch = manager.create_branch("h1").await.unwrap();
        let mutation = mutation(dir.path(), "{\n  \"cacheTimeout\": 3600\n}\n");
        let before = mutation.rollback_data.clone();

        manager
            .apply_mutations(std::slice::from_ref(&mutation), Some(&branch.name))
            .await
            .unwrap();
        assert!(fs::read_to_string(dir.path().join("config.json"))
            .unwrap()
            .contains("3600"));

        manager
            .rollback_mutations(std::slice::from_ref(&mutation))
            .await
            .unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("config.json")).unwrap(),
            before
        );
    }

    #[tokio::test]
    async fn test_invalid_json_config_mutation_rejected() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let manager = manager(dir.path());

        let mutation = mutation(dir.path(), "{ broken");
        let result = manager.apply_mutations(&[mutation], None).await;
        assert!(matches!(result, Err(Error::MutationValidation { .. })));
    }

    #[tokio::test]
    async fn test_merge_to_main_carries_changes() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let manager = manager(dir.path());

        let branch = manager.create_branch("h1").await.unwrap();
        let mutation = mutation(dir.path(), "{\n  \"cacheTimeout\": 3600\n}\n");
        manager
            .apply_mutations(&[mutation], Some(&branch.name))
            .await
            .unwrap();

        manager.merge_to_main(&branch.name).await.unwrap();
        assert_eq!(manager.current_branch().await.unwrap(), "main");
        assert!(fs::read_to_string(dir.path().join("config.json"))
            .unwrap()
            .contains("3600"));
        assert!(manager.tracked_branches().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_branch_discards_changes() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let manager = manager(dir.path());

        let branch = manager.create_branch("h1").await.unwrap();
        let mutation = mutation(dir.path(), "{\n  \"cacheTimeout\": 9999\n}\n");
        manager
            .apply_mutations(&[mutation], Some(&branch.name))
            .await
            .unwrap();

        manager.delete_branch(&branch.name).await.unwrap();
        assert_eq!(manager.current_branch().await.unwrap(), "main");
        assert!(!fs::read_to_string(dir.path().join("config.json"))
            .unwrap()
            .contains("9999"));
    }

    #[tokio::test]
    async fn test_checkpoint_round_trip_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let manager = manager(dir.path());

        let checkpoint = manager
            .create_checkpoint("before tuning", None)
            .await
            .unwrap();
        assert_eq!(checkpoint.branch, "main");

        let loaded = manager.load_checkpoint(&checkpoint.id).unwrap();
        assert_eq!(loaded.commit, checkpoint.commit);

        // Mutate, commit, then restore the checkpoint.
        let mutation = mutation(dir.path(), "{\n  \"cacheTimeout\": 4000\n}\n");
        manager.apply_mutations(&[mutation], None).await.unwrap();
        manager
            .rollback_to_checkpoint(&checkpoint.id)
            .await
            .unwrap();
        assert!(fs::read_to_string(dir.path().join("config.json"))
            .unwrap()
            .contains("1800"));
    }

    #[tokio::test]
    async fn test_checkpoint_lru_trim() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let mut config = RollbackManagerConfig::new(dir.path(), dir.path().join("backups"));
        config.max_checkpoints = 2;
        let manager = RollbackManager::new(config).unwrap();

        for i in 0..4 {
            manager
                .create_checkpoint(&format!("cp {i}"), None)
                .await
                .unwrap();
        }

        let files: Vec<_> = fs::read_dir(dir.path().join("backups/checkpoints"))
            .unwrap()
            .collect();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn test_rollback_plan_risk_ladder() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let manager = manager(dir.path());

        let config_mutation = mutation(dir.path(), "{}");
        let plan = manager.create_rollback_plan(std::slice::from_ref(&config_mutation));
        assert_eq!(plan.risk, RiskLevel::Low);
        assert_eq!(plan.verification_steps.len(), 2);
        assert_eq!(plan.verification_steps[0].name, "compile");

        let mut file_mutation = config_mutation.clone();
        file_mutation.kind = MutationKind::FileModification;
        let plan = manager.create_rollback_plan(&[file_mutation]);
        assert_eq!(plan.risk, RiskLevel::High);

        let many: Vec<Mutation> = (0..12).map(|_| config_mutation.clone()).collect();
        let plan = manager.create_rollback_plan(&many);
        assert_eq!(plan.risk, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn test_verification_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let manager = manager(dir.path());

        let pass = VerificationStep::new("pass", "true", &[]);
        let fail = VerificationStep::new("fail", "false", &[]);

        let outcome = manager.execute_verification(&[pass.clone()]).await;
        assert!(outcome.success);

        let outcome = manager.execute_verification(&[pass, fail]).await;
        assert!(!outcome.success);
        assert_eq!(outcome.steps.len(), 2);
        assert!(outcome.steps[0].1);
        assert!(!outcome.steps[1].1);
    }

    #[tokio::test]
    async fn test_verification_timeout_kills() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let manager = manager(dir.path());

        let mut hang = VerificationStep::new("hang", "sleep", &["30"]);
        hang.timeout_ms = 50;

        let started = std::time::Instant::now();
        let outcome = manager.execute_verification(&[hang]).await;
        assert!(!outcome.success);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
