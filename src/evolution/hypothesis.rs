//! Hypothesis generation and ranking.
//!
//! Four sources feed the candidate pool: threshold analysis over the current
//! performance profile, reuse of recently successful hypothesis clusters,
//! external reasoning suggestions, and identified bottlenecks. Candidates
//! are ranked and the top slice is persisted to the append-only history.

use chrono::{Duration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::llm::{ModelClient, ReasonRequest};

use super::types::{
    Bottleneck, GeneratedBy, Hypothesis, HypothesisKind, PerformanceProfile, Priority, RiskLevel,
    Severity,
};

/// Generator thresholds and limits.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub max_hypotheses_per_cycle: usize,
    /// Response time above this (ms) triggers a caching/batching hypothesis.
    pub response_time_threshold_ms: f64,
    /// Accuracy below this triggers a prompt/model-selection hypothesis.
    pub accuracy_threshold: f64,
    /// Token efficiency below this triggers a chunking hypothesis.
    pub token_efficiency_threshold: f64,
    /// Memory utilization above this triggers a memory hypothesis.
    pub memory_threshold: f64,
    /// Ranking weights for impact, feasibility, and risk.
    pub weights: (f64, f64, f64),
    /// Append-only history file (`hypotheses.json`).
    pub history_path: Option<PathBuf>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_hypotheses_per_cycle: 5,
            response_time_threshold_ms: 2000.0,
            accuracy_threshold: 0.8,
            token_efficiency_threshold: 0.6,
            memory_threshold: 0.8,
            weights: (0.5, 0.3, 0.2),
            history_path: None,
        }
    }
}

/// Inputs to one generation pass.
#[derive(Debug, Clone, Default)]
pub struct GenerationContext {
    pub cycle_id: String,
    pub current_metrics: PerformanceProfile,
    /// Prior hypotheses (typically the last 30 days of history).
    pub historical: Vec<Hypothesis>,
    /// `(kind, target_component)` pairs that failed recently.
    pub recent_failures: Vec<(HypothesisKind, String)>,
    pub bottlenecks: Vec<Bottleneck>,
}

/// Emits ranked improvement hypotheses.
pub struct HypothesisGenerator {
    config: GeneratorConfig,
    /// Optional reasoning endpoint for model-suggested hypotheses.
    client: Option<Arc<dyn ModelClient>>,
}

impl HypothesisGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Generate, rank, and persist hypotheses for a cycle.
    pub async fn generate(&self, context: &GenerationContext) -> Result<Vec<Hypothesis>> {
        let mut candidates = Vec::new();

        candidates.extend(self.from_thresholds(&context.current_metrics));
        candidates.extend(self.from_patterns(context));
        candidates.extend(self.from_reasoning(context).await);
        candidates.extend(self.from_bottlenecks(&context.bottlenecks));

        for hypothesis in &mut candidates {
            hypothesis.cycle_id = Some(context.cycle_id.clone());
        }

        candidates.sort_by(|a, b| {
            self.rank_score(b)
                .partial_cmp(&self.rank_score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(self.config.max_hypotheses_per_cycle);

        self.append_history(&candidates)?;
        tracing::info!(count = candidates.len(), cycle = %context.cycle_id, "hypotheses generated");
        Ok(candidates)
    }

    /// Ranking: `priority * (w_i * impact + w_f * feasibility + w_r * risk)`.
    /// Impact clamps at 1 for expected improvements over 100%.
    pub fn rank_score(&self, hypothesis: &Hypothesis) -> f64 {
        let (w_impact, w_feasibility, w_risk) = self.config.weights;
        let impact = (hypothesis.expected_improvement / 100.0).min(1.0);
        let feasibility = (1.0 - hypothesis.estimated_duration_min as f64 / 480.0).max(0.0);
        let risk = hypothesis.risk_level.score();
        hypothesis.priority.score() * (w_impact * impact + w_feasibility * feasibility + w_risk * risk)
    }

    /// Source 1: algorithmic thresholds over the performance profile.
    fn from_thresholds(&self, profile: &PerformanceProfile) -> Vec<Hypothesis> {
        let mut out = Vec::new();

        if profile.response_time_ms > self.config.response_time_threshold_ms {
            let mut hypothesis = Hypothesis::new(
                "Reduce response time with more aggressive caching and request batching",
                HypothesisKind::ParameterTuning,
                "core/cache",
            );
            hypothesis.proposed_changes =
                HashMap::from([("cacheTtl".to_string(), Value::from(7200))]);
            hypothesis.expected_improvement = 8.0;
            hypothesis.priority = Priority::High;
            hypothesis.risk_level = RiskLevel::Low;
            hypothesis.estimated_duration_min = 45;
            out.push(hypothesis);
        }

        if profile.accuracy < self.config.accuracy_threshold {
            let mut hypothesis = Hypothesis::new(
                "Improve accuracy through prompt refinement and model selection",
                HypothesisKind::PromptOptimization,
                "core/prompts",
            );
            hypothesis.proposed_changes =
                HashMap::from([("improvePrompts".to_string(), Value::from(true))]);
            hypothesis.expected_improvement = 10.0;
            hypothesis.priority = Priority::High;
            hypothesis.risk_level = RiskLevel::Medium;
            hypothesis.estimated_duration_min = 60;
            out.push(hypothesis);
        }

        if profile.token_efficiency < self.config.token_efficiency_threshold {
            let mut hypothesis = Hypothesis::new(
                "Raise token efficiency with tighter chunking and window compression",
                HypothesisKind::ParameterTuning,
                "core/chunking",
            );
            hypothesis.proposed_changes =
                HashMap::from([("chunkSize".to_string(), Value::from(1500))]);
            hypothesis.expected_improvement = 6.0;
            hypothesis.priority = Priority::Medium;
            hypothesis.risk_level = RiskLevel::Low;
            hypothesis.estimated_duration_min = 30;
            out.push(hypothesis);
        }

        if profile.memory_utilization > self.config.memory_threshold {
            let mut hypothesis = Hypothesis::new(
                "Trim memory utilization by tightening store capacities",
                HypothesisKind::ParameterTuning,
                "core/memory",
            );
            hypothesis.proposed_changes =
                HashMap::from([("maxEntries".to_string(), Value::from(500))]);
            hypothesis.expected_improvement = 4.0;
            hypothesis.priority = Priority::Medium;
            hypothesis.risk_level = RiskLevel::Low;
            hypothesis.estimated_duration_min = 30;
            out.push(hypothesis);
        }

        out
    }

    /// Source 2: reuse clusters of recently successful hypotheses, with
    /// perturbed parameters and discounted expectations. Clusters matching a
    /// recent failure are suppressed.
    fn from_patterns(&self, context: &GenerationContext) -> Vec<Hypothesis> {
        let cutoff = Utc::now() - Duration::days(30);
        let failures: HashSet<(HypothesisKind, &str)> = context
            .recent_failures
            .iter()
            .map(|(kind, target)| (*kind, target.as_str()))
            .collect();

        let mut clusters: HashMap<(HypothesisKind, String), Vec<&Hypothesis>> = HashMap::new();
        for hypothesis in &context.historical {
            if hypothesis.created_at < cutoff || hypothesis.succeeded != Some(true) {
                continue;
            }
            clusters
                .entry((hypothesis.kind, hypothesis.target_component.clone()))
                .or_default()
                .push(hypothesis);
        }

        let mut out = Vec::new();
        for ((kind, target), members) in clusters {
            if members.len() < 2 {
                continue;
            }
            if failures.contains(&(kind, target.as_str())) {
                tracing::debug!(kind = %kind, target = %target, "suppressing pattern hypothesis after recent failure");
                continue;
            }

            let representative = members[members.len() - 1];
            let mean_improvement: f64 = members
                .iter()
                .map(|h| h.expected_improvement)
                .sum::<f64>()
                / members.len() as f64;

            let mut variant = Hypothesis::new(
                format!("Reapply proven change pattern: {}", representative.description),
                kind,
                target,
            );
            variant.generated_by = GeneratedBy::Pattern;
            variant.proposed_changes = perturb_changes(&representative.proposed_changes);
            variant.expected_improvement = mean_improvement * 0.8;
            variant.priority = representative.priority;
            variant.risk_level = representative.risk_level;
            variant.estimated_duration_min = representative.estimated_duration_min;
            out.push(variant);
        }
        out
    }

    /// Source 3: external reasoning suggestions, mapped leniently. Steps
    /// that do not carry a recognizable suggestion are ignored.
    async fn from_reasoning(&self, context: &GenerationContext) -> Vec<Hypothesis> {
        let Some(client) = &self.client else {
            return Vec::new();
        };

        let prompt = format!(
            "Current system metrics: response_time={:.0}ms accuracy={:.2} token_efficiency={:.2} memory={:.2}.\n\
             Suggest improvement hypotheses as steps typed 'hypothesis' with description 'kind: target: detail'.",
            context.current_metrics.response_time_ms,
            context.current_metrics.accuracy,
            context.current_metrics.token_efficiency,
            context.current_metrics.memory_utilization,
        );

        let response = match client
            .reason(ReasonRequest {
                prompt,
                system: None,
                tools: Vec::new(),
            })
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "reasoning endpoint unavailable for hypothesis generation");
                return Vec::new();
            }
        };

        response
            .plan_data
            .steps
            .into_iter()
            .filter(|step| step.step_type == "hypothesis")
            .filter_map(|step| {
                let mut parts = step.description.splitn(3, ':');
                let kind = parse_kind(parts.next()?.trim())?;
                let target = parts.next()?.trim().to_string();
                let detail = parts.next().unwrap_or("").trim().to_string();

                let mut hypothesis = Hypothesis::new(detail, kind, target);
                hypothesis.generated_by = GeneratedBy::Llm;
                hypothesis.expected_improvement = 5.0;
                Some(hypothesis)
            })
            .collect()
    }

    /// Source 4: tailored hypotheses per identified bottleneck.
    fn from_bottlenecks(&self, bottlenecks: &[Bottleneck]) -> Vec<Hypothesis> {
        bottlenecks
            .iter()
            .map(|bottleneck| {
                let mut hypothesis = Hypothesis::new(
                    format!(
                        "Relieve {} bottleneck in {}: {}",
                        bottleneck.kind, bottleneck.component, bottleneck.description
                    ),
                    HypothesisKind::ParameterTuning,
                    bottleneck.component.clone(),
                );
                hypothesis.priority = match bottleneck.severity {
                    Severity::Low => Priority::Low,
                    Severity::Medium => Priority::Medium,
                    Severity::High => Priority::High,
                };
                hypothesis.risk_level = match bottleneck.severity {
                    Severity::Low => RiskLevel::Low,
                    Severity::Medium => RiskLevel::Low,
                    Severity::High => RiskLevel::Medium,
                };
                hypothesis.expected_improvement = match bottleneck.severity {
                    Severity::Low => 2.0,
                    Severity::Medium => 5.0,
                    Severity::High => 10.0,
                };
                hypothesis
            })
            .collect()
    }

    /// Append the ranked set to the history file, keyed by cycle timestamp.
    fn append_history(&self, hypotheses: &[Hypothesis]) -> Result<()> {
        let Some(path) = &self.config.history_path else {
            return Ok(());
        };

        let mut history: BTreeMap<String, Vec<Hypothesis>> = if path.exists() {
            serde_json::from_slice(&fs::read(path)?).unwrap_or_default()
        } else {
            BTreeMap::new()
        };

        history.insert(Utc::now().to_rfc3339(), hypotheses.to_vec());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(&history)?)?;
        Ok(())
    }
}

/// Perturb numeric proposed changes by ±10%, deterministically by key.
fn perturb_changes(changes: &HashMap<String, Value>) -> HashMap<String, Value> {
    changes
        .iter()
        .map(|(key, value)| {
            let perturbed = match value.as_f64() {
                Some(number) => {
                    let sign = if key.len() % 2 == 0 { 1.0 } else { -1.0 };
                    let scaled = number * (1.0 + sign * 0.1);
                    if value.is_i64() || value.is_u64() {
                        Value::from(scaled.round() as i64)
                    } else {
                        Value::from(scaled)
                    }
                }
                None => value.clone(),
            };
            (key.clone(), perturbed)
        })
        .collect()
}

fn parse_kind(raw: &str) -> Option<HypothesisKind> {
    match raw {
        "parameter-tuning" => Some(HypothesisKind::ParameterTuning),
        "architecture-change" => Some(HypothesisKind::ArchitectureChange),
        "prompt-optimization" => Some(HypothesisKind::PromptOptimization),
        "model-optimization" => Some(HypothesisKind::ModelOptimization),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_profile() -> PerformanceProfile {
        PerformanceProfile {
            response_time_ms: 500.0,
            accuracy: 0.95,
            token_efficiency: 0.9,
            memory_utilization: 0.4,
        }
    }

    fn generator() -> HypothesisGenerator {
        HypothesisGenerator::new(GeneratorConfig::default())
    }

    #[tokio::test]
    async fn test_healthy_profile_yields_nothing() {
        let generator = generator();
        let context = GenerationContext {
            cycle_id: "c1".into(),
            current_metrics: healthy_profile(),
            ..Default::default()
        };
        let hypotheses = generator.generate(&context).await.unwrap();
        assert!(hypotheses.is_empty());
    }

    #[tokio::test]
    async fn test_slow_system_triggers_caching_hypothesis() {
        let generator = generator();
        let context = GenerationContext {
            cycle_id: "c1".into(),
            current_metrics: PerformanceProfile {
                response_time_ms: 3500.0,
                ..healthy_profile()
            },
            ..Default::default()
        };
        let hypotheses = generator.generate(&context).await.unwrap();
        assert_eq!(hypotheses.len(), 1);
        assert_eq!(hypotheses[0].kind, HypothesisKind::ParameterTuning);
        assert_eq!(hypotheses[0].target_component, "core/cache");
        assert_eq!(hypotheses[0].cycle_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_low_accuracy_triggers_prompt_hypothesis() {
        let generator = generator();
        let context = GenerationContext {
            cycle_id: "c1".into(),
            current_metrics: PerformanceProfile {
                accuracy: 0.6,
                ..healthy_profile()
            },
            ..Default::default()
        };
        let hypotheses = generator.generate(&context).await.unwrap();
        assert!(hypotheses
            .iter()
            .any(|h| h.kind == HypothesisKind::PromptOptimization));
    }

    #[tokio::test]
    async fn test_pattern_reuse_needs_two_successes() {
        let generator = generator();

        let mut prior = Hypothesis::new("tune cache ttl", HypothesisKind::ParameterTuning, "core/cache");
        prior.proposed_changes = HashMap::from([("ttl".to_string(), Value::from(1000))]);
        prior.expected_improvement = 10.0;
        prior.succeeded = Some(true);

        let mut single = GenerationContext {
            cycle_id: "c1".into(),
            current_metrics: healthy_profile(),
            historical: vec![prior.clone()],
            ..Default::default()
        };
        assert!(generator.generate(&single).await.unwrap().is_empty());

        let mut second = prior.clone();
        second.id = "other".into();
        single.historical.push(second);
        let hypotheses = generator.generate(&single).await.unwrap();
        assert_eq!(hypotheses.len(), 1);
        assert_eq!(hypotheses[0].generated_by, GeneratedBy::Pattern);
        assert!((hypotheses[0].expected_improvement - 8.0).abs() < 1e-9);

        // Perturbed within ±10% of the original value.
        let perturbed = hypotheses[0].proposed_changes["ttl"].as_i64().unwrap();
        assert!((900..=1100).contains(&perturbed));
        assert_ne!(perturbed, 1000);
    }

    #[tokio::test]
    async fn test_recent_failure_suppresses_pattern() {
        let generator = generator();
        let mut prior = Hypothesis::new("tune cache ttl", HypothesisKind::ParameterTuning, "core/cache");
        prior.succeeded = Some(true);
        prior.expected_improvement = 10.0;
        let mut second = prior.clone();
        second.id = "other".into();

        let context = GenerationContext {
            cycle_id: "c1".into(),
            current_metrics: healthy_profile(),
            historical: vec![prior, second],
            recent_failures: vec![(HypothesisKind::ParameterTuning, "core/cache".to_string())],
            ..Default::default()
        };
        assert!(generator.generate(&context).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bottlenecks_map_severity() {
        let generator = generator();
        let context = GenerationContext {
            cycle_id: "c1".into(),
            current_metrics: healthy_profile(),
            bottlenecks: vec![Bottleneck {
                component: "core/orchestrator".into(),
                kind: "latency".into(),
                severity: Severity::High,
                impact: "slow plans".into(),
                description: "plan creation dominates request time".into(),
            }],
            ..Default::default()
        };
        let hypotheses = generator.generate(&context).await.unwrap();
        assert_eq!(hypotheses.len(), 1);
        assert_eq!(hypotheses[0].priority, Priority::High);
        assert_eq!(hypotheses[0].risk_level, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn test_ranking_clamps_impact_and_truncates() {
        let generator = HypothesisGenerator::new(GeneratorConfig {
            max_hypotheses_per_cycle: 2,
            ..Default::default()
        });

        let mut huge = Hypothesis::new("huge", HypothesisKind::ParameterTuning, "a");
        huge.expected_improvement = 250.0;
        let mut normal = huge.clone();
        normal.expected_improvement = 100.0;
        normal.id = "normal".into();
        // Clamped impact makes the two rank equally.
        assert!((generator.rank_score(&huge) - generator.rank_score(&normal)).abs() < 1e-12);

        let context = GenerationContext {
            cycle_id: "c1".into(),
            current_metrics: PerformanceProfile::default(), // trips accuracy + token efficiency
            ..Default::default()
        };
        let hypotheses = generator.generate(&context).await.unwrap();
        assert_eq!(hypotheses.len(), 2);
    }

    #[tokio::test]
    async fn test_history_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hypotheses.json");
        let generator = HypothesisGenerator::new(GeneratorConfig {
            history_path: Some(path.clone()),
            ..Default::default()
        });

        let context = GenerationContext {
            cycle_id: "c1".into(),
            current_metrics: PerformanceProfile {
                response_time_ms: 3000.0,
                ..healthy_profile()
            },
            ..Default::default()
        };
        generator.generate(&context).await.unwrap();
        generator.generate(&context).await.unwrap();

        let history: BTreeMap<String, Vec<Hypothesis>> =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.values().all(|v| v.len() == 1));
    }
}
