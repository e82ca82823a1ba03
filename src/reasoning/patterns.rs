//! Learned request patterns with keyword fallback classification.
//!
//! Despite the name, the decision tree is a flat pattern set matched by
//! embedding similarity; requests with no close pattern fall back to
//! keyword-derived category and complexity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;

use super::plan::{ExecutionPlan, PlanStructure, RequestCategory, RequestComplexity};
use super::{cosine_similarity, stable_hash};

const CLASSIFY_THRESHOLD: f64 = 0.9;
const MERGE_THRESHOLD: f64 = 0.98;

/// A learned request pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    /// Stable hash of the representative request.
    pub id: String,
    pub representative_request: String,
    pub embedding: Vec<f32>,
    /// Abbreviated plan: step types, tool names, descriptions.
    pub plan_structure: PlanStructure,
    pub usage_count: u64,
    pub last_used: DateTime<Utc>,
    pub category: RequestCategory,
    pub complexity: RequestComplexity,
    pub tool_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_success_rate: Option<f64>,
}

/// Outcome of classifying a request.
#[derive(Debug, Clone)]
pub enum Classification {
    /// A stored pattern matched at or above the similarity threshold.
    Matched {
        pattern_id: String,
        category: RequestCategory,
        complexity: RequestComplexity,
        structure: PlanStructure,
    },
    /// No match; category and complexity derived from keyword rules.
    New {
        category: RequestCategory,
        complexity: RequestComplexity,
    },
}

impl Classification {
    pub fn category(&self) -> RequestCategory {
        match self {
            Self::Matched { category, .. } | Self::New { category, .. } => *category,
        }
    }

    pub fn complexity(&self) -> RequestComplexity {
        match self {
            Self::Matched { complexity, .. } | Self::New { complexity, .. } => *complexity,
        }
    }

    pub fn pattern_id(&self) -> Option<&str> {
        match self {
            Self::Matched { pattern_id, .. } => Some(pattern_id),
            Self::New { .. } => None,
        }
    }

    pub fn is_new_pattern(&self) -> bool {
        matches!(self, Self::New { .. })
    }
}

/// Flat set of learned patterns with similarity classification.
pub struct PatternSet {
    patterns: Arc<RwLock<Vec<LearnedPattern>>>,
    max_patterns: usize,
    store_path: Option<PathBuf>,
}

impl PatternSet {
    pub fn new(max_patterns: usize) -> Self {
        Self {
            patterns: Arc::new(RwLock::new(Vec::new())),
            max_patterns,
            store_path: None,
        }
    }

    /// Create a set persisted at `dir/<name>.json`.
    pub fn with_store(dir: impl AsRef<Path>, name: &str, max_patterns: usize) -> Self {
        Self {
            patterns: Arc::new(RwLock::new(Vec::new())),
            max_patterns,
            store_path: Some(dir.as_ref().join(format!("{name}.json"))),
        }
    }

    /// Load persisted patterns, if the store file exists.
    pub async fn load(&self) -> Result<usize> {
        let Some(path) = &self.store_path else {
            return Ok(0);
        };
        if !path.exists() {
            return Ok(0);
        }
        let bytes = fs::read(path)?;
        let loaded: Vec<LearnedPattern> = serde_json::from_slice(&bytes)?;
        let count = loaded.len();
        *self.patterns.write().await = loaded;
        Ok(count)
    }

    /// Persist the current pattern set.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.store_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let patterns = self.patterns.read().await;
        fs::write(path, serde_json::to_vec_pretty(&*patterns)?)?;
        Ok(())
    }

    /// Classify a request against stored patterns, falling back to keyword
    /// rules when nothing clears the similarity threshold.
    pub async fn classify(&self, request: &str, embedding: Option<&[f32]>) -> Classification {
        if let Some(embedding) = embedding {
            let patterns = self.patterns.read().await;
            let best = patterns
                .iter()
                .map(|p| (p, cosine_similarity(embedding, &p.embedding)))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            if let Some((pattern, similarity)) = best {
                if similarity >= CLASSIFY_THRESHOLD {
                    return Classification::Matched {
                        pattern_id: pattern.id.clone(),
                        category: pattern.category,
                        complexity: pattern.complexity,
                        structure: pattern.plan_structure.clone(),
                    };
                }
            }
        }

        Classification::New {
            category: categorize(request),
            complexity: assess_complexity(request),
        }
    }

    /// Learn from an executed plan: merge into a near-identical pattern or
    /// append a new one, pruning by recency-weighted usage when over capacity.
    pub async fn learn(&self, request: &str, embedding: Vec<f32>, plan: &ExecutionPlan) {
        let structure = plan.structure();
        let tool_types: Vec<String> = structure.tool_names.clone();
        let mut patterns = self.patterns.write().await;

        let merge_target = patterns
            .iter_mut()
            .map(|p| {
                let similarity = cosine_similarity(&embedding, &p.embedding);
                (p, similarity)
            })
            .filter(|(_, similarity)| *similarity > MERGE_THRESHOLD)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((pattern, _)) = merge_target {
            pattern.usage_count += 1;
            pattern.last_used = Utc::now();
            pattern.complexity = assess_complexity(request);
            let mut merged: HashSet<String> = pattern.tool_types.iter().cloned().collect();
            merged.extend(tool_types);
            pattern.tool_types = merged.into_iter().collect();
            pattern.tool_types.sort();
            return;
        }

        patterns.push(LearnedPattern {
            id: stable_hash(request),
            representative_request: request.to_string(),
            embedding,
            plan_structure: structure,
            usage_count: 1,
            last_used: Utc::now(),
            category: categorize(request),
            complexity: assess_complexity(request),
            tool_types,
            avg_success_rate: None,
        });

        if patterns.len() > self.max_patterns {
            let now = Utc::now();
            patterns.sort_by(|a, b| {
                prune_score(b, now)
                    .partial_cmp(&prune_score(a, now))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            patterns.truncate(self.max_patterns);
        }
    }

    /// Number of stored patterns.
    pub async fn len(&self) -> usize {
        self.patterns.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.patterns.read().await.is_empty()
    }
}

/// Retention score: frequently used and recently used patterns survive.
/// Age enters in days so the two terms stay comparable.
fn prune_score(pattern: &LearnedPattern, now: DateTime<Utc>) -> f64 {
    let age_days = (now - pattern.last_used).num_milliseconds() as f64 / 86_400_000.0;
    0.7 * pattern.usage_count as f64 - 0.3 * age_days
}

const CATEGORY_KEYWORDS: &[(RequestCategory, &[&str])] = &[
    (
        RequestCategory::Refactoring,
        &["refactor", "restructure", "reorganize", "clean up", "cleanup", "rewrite", "simplify"],
    ),
    (
        RequestCategory::Testing,
        &["test", "tests", "coverage", "spec", "assert", "unit test"],
    ),
    (
        RequestCategory::Debugging,
        &["debug", "bug", "fix", "error", "crash", "broken", "failing", "issue"],
    ),
    (
        RequestCategory::FeatureAddition,
        &["add", "implement", "create", "build", "support", "introduce", "new feature"],
    ),
    (
        RequestCategory::Optimization,
        &["optimize", "performance", "speed up", "slow", "faster", "memory", "latency"],
    ),
    (
        RequestCategory::Documentation,
        &["document", "documentation", "docs", "readme", "comment", "explain"],
    ),
];

/// Keyword-rule category fallback.
pub(crate) fn categorize(request: &str) -> RequestCategory {
    let lowered = request.to_lowercase();
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|k| lowered.contains(k)) {
            return *category;
        }
    }
    RequestCategory::General
}

/// Word-count and estimated-step complexity rule.
pub(crate) fn assess_complexity(request: &str) -> RequestComplexity {
    let word_count = request.split_whitespace().count();
    let step_count = estimate_steps(request);

    if word_count < 10 && step_count <= 2 {
        RequestComplexity::Simple
    } else if word_count < 25 && step_count <= 5 {
        RequestComplexity::Medium
    } else {
        RequestComplexity::Complex
    }
}

/// Rough step estimate: sentences plus sequencing connectors.
fn estimate_steps(request: &str) -> usize {
    let sentences = request
        .split(['.', '!', '?', ';'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1);
    let lowered = request.to_lowercase();
    let connectors = lowered.matches(" and ").count() + lowered.matches(" then ").count();
    sentences + connectors
}
