//! Execution plans and request classification types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::llm::ToolDescriptor;

/// Category a request falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestCategory {
    Refactoring,
    Testing,
    Debugging,
    FeatureAddition,
    Optimization,
    Documentation,
    General,
}

impl RequestCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refactoring => "refactoring",
            Self::Testing => "testing",
            Self::Debugging => "debugging",
            Self::FeatureAddition => "feature_addition",
            Self::Optimization => "optimization",
            Self::Documentation => "documentation",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for RequestCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Complexity bucket for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestComplexity {
    Simple,
    Medium,
    Complex,
}

impl RequestComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
        }
    }
}

impl std::fmt::Display for RequestComplexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One step of an execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Step type, e.g. `tool_use`, `analysis`, `synthesis`.
    #[serde(rename = "type")]
    pub step_type: String,
    pub description: String,
    /// Tool name for `tool_use` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

impl PlanStep {
    pub fn tool_use(tool: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            step_type: "tool_use".to_string(),
            description: description.into(),
            tool: Some(tool.into()),
        }
    }

    pub fn analysis(description: impl Into<String>) -> Self {
        Self {
            step_type: "analysis".to_string(),
            description: description.into(),
            tool: None,
        }
    }
}

/// A complete plan for executing a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: String,
    pub request: String,
    pub steps: Vec<PlanStep>,
    /// Estimated duration in minutes.
    pub estimated_duration_min: u32,
    /// Mean per-step confidence in `[0, 1]`.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning_trace: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Stamped when a cached plan is adapted for reuse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapted_at: Option<DateTime<Utc>>,
}

impl ExecutionPlan {
    pub fn new(request: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request: request.into(),
            steps,
            estimated_duration_min: 0,
            confidence: 0.0,
            reasoning_trace: Vec::new(),
            template_id: None,
            pattern_id: None,
            created_at: Utc::now(),
            adapted_at: None,
        }
    }

    /// Abbreviate to the structure stored in learned patterns.
    pub fn structure(&self) -> PlanStructure {
        PlanStructure {
            step_types: self.steps.iter().map(|s| s.step_type.clone()).collect(),
            tool_names: self
                .steps
                .iter()
                .filter_map(|s| s.tool.clone())
                .collect(),
            descriptions: self.steps.iter().map(|s| s.description.clone()).collect(),
        }
    }
}

/// Abbreviated plan shape kept in a learned pattern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanStructure {
    pub step_types: Vec<String>,
    pub tool_names: Vec<String>,
    pub descriptions: Vec<String>,
}

/// Project context a request executes in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    /// Project type inferred from dependency manifests, e.g. `nodejs`.
    pub project_type: String,
    /// Dominant code language, e.g. `typescript`.
    pub language: String,
    /// Short free-text summary passed to the reasoning model.
    #[serde(default)]
    pub summary: String,
    /// Tools available to plans in this context.
    #[serde(default)]
    pub available_tools: Vec<ToolDescriptor>,
}

impl ProjectContext {
    /// Infer project type and dominant language from manifests and file
    /// extensions under `root`.
    pub fn infer(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();

        let project_type = if root.join("package.json").exists() {
            "nodejs"
        } else if root.join("Cargo.toml").exists() {
            "rust"
        } else if root.join("pyproject.toml").exists() || root.join("requirements.txt").exists() {
            "python"
        } else if root.join("pom.xml").exists() || root.join("build.gradle").exists() {
            "java"
        } else {
            "unknown"
        };

        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        count_extensions(root, &mut counts, 0);
        let language = counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(lang, _)| lang)
            .unwrap_or("unknown");

        Self {
            project_type: project_type.to_string(),
            language: language.to_string(),
            summary: String::new(),
            available_tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.available_tools = tools;
        self
    }
}

fn count_extensions(dir: &Path, counts: &mut HashMap<&'static str, usize>, depth: usize) {
    if depth > 4 {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.is_dir() {
            if !name.starts_with('.') && name != "node_modules" && name != "target" {
                count_extensions(&path, counts, depth + 1);
            }
            continue;
        }
        let language = match path.extension().and_then(|e| e.to_str()) {
            Some("ts") | Some("tsx") => "typescript",
            Some("js") | Some("jsx") => "javascript",
            Some("py") => "python",
            Some("rs") => "rust",
            Some("java") => "java",
            _ => continue,
        };
        *counts.entry(language).or_default() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_structure_abbreviation() {
        let plan = ExecutionPlan::new(
            "fix the bug",
            vec![
                PlanStep::analysis("look around"),
                PlanStep::tool_use("grep_search", "find the fault"),
            ],
        );
        let structure = plan.structure();
        assert_eq!(structure.step_types, vec!["analysis", "tool_use"]);
        assert_eq!(structure.tool_names, vec!["grep_search"]);
        assert_eq!(structure.descriptions.len(), 2);
    }

    #[test]
    fn test_infer_project_context() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.ts"), "").unwrap();
        std::fs::write(dir.path().join("b.ts"), "").unwrap();
        std::fs::write(dir.path().join("c.py"), "").unwrap();

        let context = ProjectContext::infer(dir.path());
        assert_eq!(context.project_type, "nodejs");
        assert_eq!(context.language, "typescript");
    }
}
