//! Reasoning and orchestration layer.
//!
//! Four subsystems feed [`ReasoningOrchestrator::create_execution_plan`]:
//! the similarity-keyed [`ReasoningCache`], the learned-pattern set
//! ([`PatternSet`]), the parametric [`TemplateLibrary`], and the Q-learning
//! [`ToolSelector`]. Each subsystem owns its persisted file and is the sole
//! writer to it.

mod cache;
mod orchestrator;
mod patterns;
mod plan;
mod templates;
mod tools;

pub use cache::{CachedReasoningItem, ReasoningCache};
pub use orchestrator::{OrchestratorConfig, ReasoningOrchestrator};
pub use patterns::{Classification, LearnedPattern, PatternSet};
pub use plan::{
    ExecutionPlan, PlanStep, PlanStructure, ProjectContext, RequestCategory, RequestComplexity,
};
pub use templates::{PlanTemplate, TemplateLibrary, TemplatePlan, TemplateStep, VariableSpec};
pub use tools::{ToolSelector, ToolSelectorConfig, ToolSuccessRecord};

/// Cosine similarity between two vectors of equal dimension.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Hex-encoded SHA-256 of a request, used as a stable store key.
pub(crate) fn stable_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_dimension_mismatch() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_stable_hash_is_stable() {
        assert_eq!(stable_hash("abc"), stable_hash("abc"));
        assert_ne!(stable_hash("abc"), stable_hash("abd"));
    }
}
