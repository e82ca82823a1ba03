//! Contextual Q-learning tool selector.
//!
//! State keys are `"{pattern}:{project}:{language}:{complexity}"` tuples; for
//! each `(state, tool)` pair the selector keeps a success record whose
//! Q-value is updated with a standard one-step rule. Exploration draws come
//! from a deterministic hash of the draw context, which keeps selection
//! reproducible within a process history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::llm::ToolDescriptor;

use super::patterns::Classification;
use super::plan::{ProjectContext, RequestCategory};

/// Per `(state, tool)` learning record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSuccessRecord {
    pub successes: u64,
    pub attempts: u64,
    /// Learned value in `[0, 1]`.
    pub q_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_execution_time_ms: Option<f64>,
    /// Exponentially decayed failure rate in `[0, 1]`.
    #[serde(default)]
    pub error_rate: f64,
}

impl Default for ToolSuccessRecord {
    fn default() -> Self {
        Self {
            successes: 0,
            attempts: 0,
            q_value: 0.5,
            last_used: None,
            avg_execution_time_ms: None,
            error_rate: 0.0,
        }
    }
}

impl ToolSuccessRecord {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    fn recency(&self, now: DateTime<Utc>) -> f64 {
        match self.last_used {
            Some(last) => {
                let age_days = (now - last).num_milliseconds() as f64 / 86_400_000.0;
                (1.0 - age_days / 30.0).max(0.0)
            }
            None => 0.0,
        }
    }

    /// Blended selection score.
    pub fn effective_q(&self, now: DateTime<Utc>) -> f64 {
        0.7 * self.q_value
            + 0.2 * self.success_rate()
            + 0.05 * self.recency(now)
            + 0.05 * (1.0 - self.error_rate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContextEntry {
    state: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MatrixMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    exploration_rate: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedMatrix {
    matrix: HashMap<String, HashMap<String, ToolSuccessRecord>>,
    #[serde(default)]
    context_history: Vec<ContextEntry>,
    #[serde(default)]
    metadata: MatrixMetadata,
}

/// Selector configuration.
#[derive(Debug, Clone)]
pub struct ToolSelectorConfig {
    pub learning_rate: f64,
    pub exploration_rate: f64,
    /// Exploit a tool when its effective Q clears this bar.
    pub exploitation_threshold: f64,
    pub store_path: Option<PathBuf>,
}

impl Default for ToolSelectorConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            exploration_rate: 0.1,
            exploitation_threshold: 0.6,
            store_path: None,
        }
    }
}

const EXPLORATION_FLOOR: f64 = 0.01;
const EXPLORATION_CEILING: f64 = 0.3;
const CONTEXT_HISTORY_CAP: usize = 200;

struct SelectorState {
    matrix: HashMap<String, HashMap<String, ToolSuccessRecord>>,
    context_history: Vec<ContextEntry>,
    exploration_rate: f64,
    draw_counter: u64,
}

/// Contextual Q-learning selector over an available tool set.
pub struct ToolSelector {
    state: Arc<RwLock<SelectorState>>,
    learning_rate: f64,
    exploitation_threshold: f64,
    store_path: Option<PathBuf>,
}

impl ToolSelector {
    pub fn new(config: ToolSelectorConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(SelectorState {
                matrix: HashMap::new(),
                context_history: Vec::new(),
                exploration_rate: config.exploration_rate,
                draw_counter: 0,
            })),
            learning_rate: config.learning_rate,
            exploitation_threshold: config.exploitation_threshold,
            store_path: config.store_path,
        }
    }

    /// Build the state key for a classified request in a project context.
    pub fn state_key(classification: &Classification, context: &ProjectContext) -> String {
        format!(
            "{}:{}:{}:{}",
            classification.category(),
            context.project_type,
            context.language,
            classification.complexity()
        )
    }

    /// Select tools for a request: exploit high-Q tools, occasionally explore
    /// less-used ones, and complete with category-preferred tools.
    pub async fn select_tools(
        &self,
        classification: &Classification,
        context: &ProjectContext,
        available: &[ToolDescriptor],
    ) -> Vec<ToolDescriptor> {
        if available.is_empty() {
            return Vec::new();
        }

        let state_key = Self::state_key(classification, context);
        let now = Utc::now();
        let mut state = self.state.write().await;
        state.context_history.push(ContextEntry {
            state: state_key.clone(),
            timestamp: now,
        });
        if state.context_history.len() > CONTEXT_HISTORY_CAP {
            let excess = state.context_history.len() - CONTEXT_HISTORY_CAP;
            state.context_history.drain(..excess);
        }

        let exploration_rate = state.exploration_rate;
        let mut selected: Vec<ToolDescriptor> = Vec::new();

        for tool in available {
            state.draw_counter += 1;
            let draw = state.draw_counter;
            let record = state
                .matrix
                .get(&state_key)
                .and_then(|tools| tools.get(&tool.name))
                .cloned()
                .unwrap_or_default();

            let explore_coin = hash_unit(&state_key, &tool.name, draw, "explore");
            if explore_coin < exploration_rate {
                let weight = 0.3 / (record.attempts as f64 + 1.0);
                if hash_unit(&state_key, &tool.name, draw, "weight") < weight {
                    selected.push(tool.clone());
                    continue;
                }
            }

            if record.effective_q(now) > self.exploitation_threshold {
                selected.push(tool.clone());
            }
        }

        // Category complement: best historical tool per preferred category.
        for preferred in preferred_categories(classification.category()) {
            let candidate = available
                .iter()
                .filter(|t| t.category == *preferred)
                .max_by(|a, b| {
                    let rate_a = state
                        .matrix
                        .get(&state_key)
                        .and_then(|tools| tools.get(&a.name))
                        .map(|r| r.success_rate())
                        .unwrap_or(0.0);
                    let rate_b = state
                        .matrix
                        .get(&state_key)
                        .and_then(|tools| tools.get(&b.name))
                        .map(|r| r.success_rate())
                        .unwrap_or(0.0);
                    rate_a
                        .partial_cmp(&rate_b)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| b.name.cmp(&a.name))
                });
            if let Some(tool) = candidate {
                selected.push(tool.clone());
            }
        }

        let mut seen = std::collections::HashSet::new();
        selected.retain(|t| seen.insert(t.name.clone()));

        // Never return empty: fall back to the single highest-Q tool.
        if selected.is_empty() {
            if let Some(best) = available.iter().max_by(|a, b| {
                let q_a = state
                    .matrix
                    .get(&state_key)
                    .and_then(|tools| tools.get(&a.name))
                    .map(|r| r.effective_q(now))
                    .unwrap_or(0.0);
                let q_b = state
                    .matrix
                    .get(&state_key)
                    .and_then(|tools| tools.get(&b.name))
                    .map(|r| r.effective_q(now))
                    .unwrap_or(0.0);
                q_a.partial_cmp(&q_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.name.cmp(&a.name))
            }) {
                selected.push(best.clone());
            }
        }

        selected
    }

    /// Record an execution outcome for `(state, tool)`.
    pub async fn update_success_rate(
        &self,
        tool: &str,
        state_key: &str,
        success: bool,
        execution_time_ms: Option<f64>,
    ) {
        let mut state = self.state.write().await;
        let record = state
            .matrix
            .entry(state_key.to_string())
            .or_default()
            .entry(tool.to_string())
            .or_default();

        record.attempts += 1;
        if success {
            record.successes += 1;
        } else {
            record.error_rate = 0.9 * record.error_rate + 0.1;
        }
        if let Some(time_ms) = execution_time_ms {
            record.avg_execution_time_ms = Some(match record.avg_execution_time_ms {
                Some(avg) => 0.8 * avg + 0.2 * time_ms,
                None => time_ms,
            });
        }
        let reward = if success { 1.0 } else { 0.0 };
        record.q_value += self.learning_rate * (reward - record.q_value);
        record.q_value = record.q_value.clamp(0.0, 1.0);
        record.last_used = Some(Utc::now());
    }

    /// Periodic exploration-rate adaptation from aggregate outcomes.
    pub async fn adapt_exploration_rate(&self, success_rate: f64, diversity_score: f64) {
        let mut state = self.state.write().await;
        if success_rate > 0.8 && diversity_score < 0.3 {
            state.exploration_rate = (state.exploration_rate * 0.9).max(EXPLORATION_FLOOR);
        } else if success_rate < 0.6 {
            state.exploration_rate = (state.exploration_rate * 1.1).min(EXPLORATION_CEILING);
        }
    }

    /// Current exploration rate.
    pub async fn exploration_rate(&self) -> f64 {
        self.state.read().await.exploration_rate
    }

    /// Record for a `(state, tool)` pair, if any.
    pub async fn record(&self, state_key: &str, tool: &str) -> Option<ToolSuccessRecord> {
        let state = self.state.read().await;
        state
            .matrix
            .get(state_key)
            .and_then(|tools| tools.get(tool))
            .cloned()
    }

    /// Historical success rate of a tool across all states.
    pub async fn tool_success_rate(&self, tool: &str) -> Option<f64> {
        let state = self.state.read().await;
        let mut successes = 0u64;
        let mut attempts = 0u64;
        for tools in state.matrix.values() {
            if let Some(record) = tools.get(tool) {
                successes += record.successes;
                attempts += record.attempts;
            }
        }
        if attempts == 0 {
            None
        } else {
            Some(successes as f64 / attempts as f64)
        }
    }

    /// Persist the matrix as `{matrix, contextHistory, metadata}`.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.store_path else {
            return Ok(());
        };
        let state = self.state.read().await;
        let persisted = PersistedMatrix {
            matrix: state.matrix.clone(),
            context_history: state.context_history.clone(),
            metadata: MatrixMetadata {
                updated_at: Some(Utc::now()),
                exploration_rate: state.exploration_rate,
            },
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(&persisted)?)?;
        Ok(())
    }

    /// Load a persisted matrix, if the store file exists.
    pub async fn load(&self) -> Result<bool> {
        let Some(path) = &self.store_path else {
            return Ok(false);
        };
        if !path.exists() {
            return Ok(false);
        }
        let bytes = fs::read(path)?;
        let persisted: PersistedMatrix = serde_json::from_slice(&bytes)?;
        let mut state = self.state.write().await;
        state.matrix = persisted.matrix;
        state.context_history = persisted.context_history;
        if persisted.metadata.exploration_rate > 0.0 {
            state.exploration_rate = persisted.metadata.exploration_rate;
        }
        Ok(true)
    }
}

/// Fixed complement mapping: request category to preferred tool categories.
fn preferred_categories(category: RequestCategory) -> &'static [&'static str] {
    match category {
        RequestCategory::Refactoring => &["code_analysis", "transformation"],
        RequestCategory::Testing => &["testing"],
        RequestCategory::Debugging => &["code_analysis", "debugging"],
        RequestCategory::FeatureAddition => &["generation", "code_analysis"],
        RequestCategory::Optimization => &["profiling", "code_analysis"],
        RequestCategory::Documentation => &["documentation"],
        RequestCategory::General => &["code_analysis"],
    }
}

/// Deterministic draw in `[0, 1)` from the draw context.
fn hash_unit(state: &str, tool: &str, counter: u64, salt: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(state.as_bytes());
    hasher.update(tool.as_bytes());
    hasher.update(counter.to_le_bytes());
    hasher.update(salt.as_bytes());
    let digest = hasher.finalize();
    let raw = u64::from_le_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ]);
    raw as f64 / u64::MAX as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::plan::RequestComplexity;

    const STATE: &str = "refactoring:nodejs:typescript:medium";

    fn selector() -> ToolSelector {
        ToolSelector::new(ToolSelectorConfig::default())
    }

    fn tools() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new("grep_search", "search code", "code_analysis"),
            ToolDescriptor::new("ast_refactor", "transform code", "transformation"),
            ToolDescriptor::new("test_runner", "run tests", "testing"),
        ]
    }

    fn classification() -> Classification {
        Classification::New {
            category: RequestCategory::Refactoring,
            complexity: RequestComplexity::Medium,
        }
    }

    #[test]
    fn test_state_key_format() {
        let context = ProjectContext {
            project_type: "nodejs".into(),
            language: "typescript".into(),
            ..Default::default()
        };
        assert_eq!(ToolSelector::state_key(&classification(), &context), STATE);
    }

    #[tokio::test]
    async fn test_selection_never_empty() {
        let selector = selector();
        let context = ProjectContext::default();
        let selected = selector
            .select_tools(&classification(), &context, &tools())
            .await;
        assert!(!selected.is_empty());
        let mut names: Vec<&str> = selected.iter().map(|t| t.name.as_str()).collect();
        let before = names.len();
        names.dedup();
        assert_eq!(names.len(), before);
    }

    #[tokio::test]
    async fn test_category_complement_prefers_matching_categories() {
        let selector = selector();
        let context = ProjectContext::default();
        let selected = selector
            .select_tools(&classification(), &context, &tools())
            .await;
        // Refactoring prefers code_analysis and transformation tools.
        let names: Vec<&str> = selected.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"grep_search"));
        assert!(names.contains(&"ast_refactor"));
    }

    #[tokio::test]
    async fn test_q_learning_ranks_successful_tool_highest() {
        let selector = selector();
        for _ in 0..6 {
            selector
                .update_success_rate("winner", STATE, true, Some(120.0))
                .await;
        }
        for _ in 0..4 {
            selector
                .update_success_rate("loser", STATE, false, Some(500.0))
                .await;
        }

        let winner = selector.record(STATE, "winner").await.unwrap();
        let loser = selector.record(STATE, "loser").await.unwrap();
        assert!(winner.q_value > loser.q_value);
        assert_eq!(winner.successes, 6);
        assert_eq!(winner.attempts, 6);
        assert_eq!(loser.successes, 0);
        assert_eq!(loser.attempts, 4);
    }

    #[tokio::test]
    async fn test_failures_decrease_q_monotonically() {
        let selector = selector();
        let mut previous = 0.5;
        for _ in 0..5 {
            selector.update_success_rate("flaky", STATE, false, None).await;
            let record = selector.record(STATE, "flaky").await.unwrap();
            assert!(record.q_value < previous);
            assert!(record.q_value >= 0.0);
            previous = record.q_value;
        }
    }

    #[tokio::test]
    async fn test_q_stays_in_unit_interval() {
        let selector = ToolSelector::new(ToolSelectorConfig {
            learning_rate: 1.0,
            ..Default::default()
        });
        for success in [true, true, false, true, false, false, true] {
            selector.update_success_rate("t", STATE, success, None).await;
            let record = selector.record(STATE, "t").await.unwrap();
            assert!((0.0..=1.0).contains(&record.q_value));
        }
    }

    #[tokio::test]
    async fn test_error_rate_decays_toward_failures() {
        let selector = selector();
        selector.update_success_rate("e", STATE, false, None).await;
        let first = selector.record(STATE, "e").await.unwrap().error_rate;
        selector.update_success_rate("e", STATE, false, None).await;
        let second = selector.record(STATE, "e").await.unwrap().error_rate;
        assert!((first - 0.1).abs() < 1e-9);
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_adapt_exploration_rate() {
        let selector = selector();
        selector.adapt_exploration_rate(0.9, 0.1).await;
        assert!((selector.exploration_rate().await - 0.09).abs() < 1e-9);

        selector.adapt_exploration_rate(0.5, 0.5).await;
        assert!((selector.exploration_rate().await - 0.099).abs() < 1e-9);

        for _ in 0..100 {
            selector.adapt_exploration_rate(0.9, 0.1).await;
        }
        assert!(selector.exploration_rate().await >= EXPLORATION_FLOOR);

        for _ in 0..100 {
            selector.adapt_exploration_rate(0.1, 0.9).await;
        }
        assert!(selector.exploration_rate().await <= EXPLORATION_CEILING);
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool_selection_matrix.json");
        {
            let selector = ToolSelector::new(ToolSelectorConfig {
                store_path: Some(path.clone()),
                ..Default::default()
            });
            selector.update_success_rate("saved", STATE, true, Some(50.0)).await;
            selector.save().await.unwrap();
        }

        let reloaded = ToolSelector::new(ToolSelectorConfig {
            store_path: Some(path),
            ..Default::default()
        });
        assert!(reloaded.load().await.unwrap());
        let record = reloaded.record(STATE, "saved").await.unwrap();
        assert_eq!(record.successes, 1);
        assert!(record.avg_execution_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_exploitation_after_learning() {
        let selector = selector();
        // Train grep_search well above the exploitation bar.
        for _ in 0..20 {
            selector
                .update_success_rate("grep_search", "refactoring:unknown:unknown:medium", true, None)
                .await;
        }
        let context = ProjectContext {
            project_type: "unknown".into(),
            language: "unknown".into(),
            ..Default::default()
        };
        let selected = selector
            .select_tools(&classification(), &context, &tools())
            .await;
        assert!(selected.iter().any(|t| t.name == "grep_search"));
    }
}
