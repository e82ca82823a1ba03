//! Parametric plan templates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;

use super::plan::{ExecutionPlan, PlanStep, RequestCategory, RequestComplexity};
use super::patterns::Classification;

/// One templated step; `{{variable}}` placeholders are substituted at
/// instantiation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateStep {
    #[serde(rename = "type")]
    pub step_type: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

/// The plan body of a template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplatePlan {
    pub steps: Vec<TemplateStep>,
    /// Estimated duration in minutes.
    pub estimated_duration: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rollback_steps: Vec<TemplateStep>,
}

/// Declared template variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    #[serde(rename = "type")]
    pub var_type: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A parametric plan template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: RequestCategory,
    pub keywords: Vec<String>,
    pub complexity: RequestComplexity,
    pub plan: TemplatePlan,
    #[serde(default)]
    pub variables: HashMap<String, VariableSpec>,
    #[serde(default)]
    pub metadata: TemplateMetadata,
}

/// Catalog of templates loaded from a directory, with built-ins as fallback.
pub struct TemplateLibrary {
    templates: Arc<RwLock<Vec<PlanTemplate>>>,
    directory: Option<PathBuf>,
}

const MATCH_MINIMUM: i32 = 10;

impl TemplateLibrary {
    /// Load every `*.json` template under `dir`; when none load, the
    /// built-in set is materialized instead.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut templates = Vec::new();

        if dir.is_dir() {
            let pattern = dir.join("*.json");
            for entry in glob::glob(&pattern.to_string_lossy())
                .map_err(|e| crate::error::Error::Config(e.to_string()))?
            {
                let Ok(path) = entry else { continue };
                match fs::read(&path).map_err(crate::error::Error::from).and_then(|bytes| {
                    serde_json::from_slice::<PlanTemplate>(&bytes).map_err(Into::into)
                }) {
                    Ok(template) => templates.push(template),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable template");
                    }
                }
            }
        }

        if templates.is_empty() {
            templates = builtin_templates();
            tracing::debug!(count = templates.len(), "using built-in plan templates");
        }

        Ok(Self {
            templates: Arc::new(RwLock::new(templates)),
            directory: Some(dir.to_path_buf()),
        })
    }

    /// Library containing only the built-in set.
    pub fn builtin() -> Self {
        Self {
            templates: Arc::new(RwLock::new(builtin_templates())),
            directory: None,
        }
    }

    /// Persist all templates back to the directory, one file per template.
    pub async fn save(&self) -> Result<()> {
        let Some(dir) = &self.directory else {
            return Ok(());
        };
        fs::create_dir_all(dir)?;
        let templates = self.templates.read().await;
        for template in templates.iter() {
            let path = dir.join(format!("{}.json", template.id));
            fs::write(path, serde_json::to_vec_pretty(template)?)?;
        }
        Ok(())
    }

    /// Find the best-scoring template for a classified request.
    ///
    /// Scoring: category match +50, complexity match +20, each keyword hit
    /// +10, name/description substring +15, pattern string in the id +25.
    /// Returns the top template with score >= 10 and bumps its usage count.
    pub async fn find_match(
        &self,
        classification: &Classification,
        request: &str,
    ) -> Option<PlanTemplate> {
        let lowered = request.to_lowercase();
        let category = classification.category();
        let complexity = classification.complexity();

        let mut templates = self.templates.write().await;
        let mut best: Option<(usize, i32)> = None;

        for (i, template) in templates.iter().enumerate() {
            let mut score = 0;
            if template.category == category {
                score += 50;
            }
            if template.complexity == complexity {
                score += 20;
            }
            for keyword in &template.keywords {
                if lowered.contains(keyword.as_str()) {
                    score += 10;
                }
            }
            if lowered.contains(&template.name.to_lowercase())
                || template.description.to_lowercase().contains(category.as_str())
            {
                score += 15;
            }
            if template.id.contains(category.as_str()) {
                score += 25;
            }

            if score >= MATCH_MINIMUM && best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }

        let (index, score) = best?;
        templates[index].metadata.usage_count += 1;
        tracing::debug!(template = %templates[index].id, score, "plan template matched");
        Some(templates[index].clone())
    }

    /// Number of templates in the catalog.
    pub async fn len(&self) -> usize {
        self.templates.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.templates.read().await.is_empty()
    }
}

/// Instantiate a template into an execution plan, substituting `{{variable}}`
/// occurrences. Unknown placeholders are left intact and logged.
pub fn instantiate(
    template: &PlanTemplate,
    request: &str,
    values: &HashMap<String, String>,
) -> ExecutionPlan {
    let mut resolved = values.clone();
    for (name, spec) in &template.variables {
        if !resolved.contains_key(name) {
            if let Some(default) = &spec.default {
                resolved.insert(name.clone(), default.clone());
            } else if spec.required {
                tracing::warn!(template = %template.id, variable = %name, "required template variable missing");
            }
        }
    }

    let steps = template
        .plan
        .steps
        .iter()
        .map(|step| PlanStep {
            step_type: step.step_type.clone(),
            description: substitute(&step.description, &resolved, &template.id),
            tool: step.tool.clone(),
        })
        .collect();

    let mut plan = ExecutionPlan::new(request, steps);
    plan.estimated_duration_min = template.plan.estimated_duration;
    plan.template_id = Some(template.id.clone());
    plan
}

fn substitute(text: &str, values: &HashMap<String, String>, template_id: &str) -> String {
    let mut out = text.to_string();
    for (name, value) in values {
        out = out.replace(&format!("{{{{{name}}}}}"), value);
    }
    if out.contains("{{") {
        tracing::warn!(template = %template_id, text = %out, "unresolved template placeholder");
    }
    out
}

fn builtin_templates() -> Vec<PlanTemplate> {
    fn step(step_type: &str, description: &str, tool: Option<&str>) -> TemplateStep {
        TemplateStep {
            step_type: step_type.to_string(),
            description: description.to_string(),
            tool: tool.map(|t| t.to_string()),
        }
    }

    fn variable(var_type: &str, required: bool) -> VariableSpec {
        VariableSpec {
            var_type: var_type.to_string(),
            required,
            default: None,
        }
    }

    vec![
        PlanTemplate {
            id: "refactor_component".to_string(),
            name: "Refactor component".to_string(),
            description: "Restructure a component for refactoring without changing behavior".to_string(),
            category: RequestCategory::Refactoring,
            keywords: vec!["refactor".into(), "restructure".into(), "clean".into()],
            complexity: RequestComplexity::Medium,
            plan: TemplatePlan {
                steps: vec![
                    step("analysis", "Map the current structure of {{component}}", None),
                    step("tool_use", "Locate all usages of {{component}}", Some("grep_search")),
                    step("transformation", "Apply the refactoring to {{component}}", None),
                    step("tool_use", "Run the test suite", Some("test_runner")),
                ],
                estimated_duration: 45,
                rollback_steps: vec![step("revert", "Restore {{component}} from version control", None)],
            },
            variables: HashMap::from([("component".to_string(), variable("string", true))]),
            metadata: TemplateMetadata::default(),
        },
        PlanTemplate {
            id: "add_feature".to_string(),
            name: "Add feature".to_string(),
            description: "Implement a new feature with feature_addition scaffolding and tests".to_string(),
            category: RequestCategory::FeatureAddition,
            keywords: vec!["add".into(), "implement".into(), "feature".into()],
            complexity: RequestComplexity::Medium,
            plan: TemplatePlan {
                steps: vec![
                    step("analysis", "Design the interface for {{feature}}", None),
                    step("generation", "Generate the implementation of {{feature}}", None),
                    step("tool_use", "Write tests covering {{feature}}", Some("test_runner")),
                ],
                estimated_duration: 60,
                rollback_steps: vec![step("revert", "Remove generated code for {{feature}}", None)],
            },
            variables: HashMap::from([("feature".to_string(), variable("string", true))]),
            metadata: TemplateMetadata::default(),
        },
        PlanTemplate {
            id: "debug_issue".to_string(),
            name: "Debug issue".to_string(),
            description: "Isolate and fix a reported defect (debugging)".to_string(),
            category: RequestCategory::Debugging,
            keywords: vec!["debug".into(), "fix".into(), "bug".into(), "error".into()],
            complexity: RequestComplexity::Medium,
            plan: TemplatePlan {
                steps: vec![
                    step("analysis", "Reproduce the issue: {{symptom}}", None),
                    step("tool_use", "Search for related code paths", Some("grep_search")),
                    step("transformation", "Apply the fix", None),
                    step("tool_use", "Verify with the failing case", Some("test_runner")),
                ],
                estimated_duration: 30,
                rollback_steps: vec![step("revert", "Revert the fix", None)],
            },
            variables: HashMap::from([("symptom".to_string(), variable("string", false))]),
            metadata: TemplateMetadata::default(),
        },
        PlanTemplate {
            id: "optimize_performance".to_string(),
            name: "Optimize performance".to_string(),
            description: "Profile and optimize a hot path (optimization)".to_string(),
            category: RequestCategory::Optimization,
            keywords: vec!["optimize".into(), "performance".into(), "slow".into(), "speed".into()],
            complexity: RequestComplexity::Complex,
            plan: TemplatePlan {
                steps: vec![
                    step("tool_use", "Profile {{target}} under load", Some("profiler")),
                    step("analysis", "Identify the dominant cost in {{target}}", None),
                    step("transformation", "Apply the optimization", None),
                    step("tool_use", "Re-profile and compare", Some("profiler")),
                ],
                estimated_duration: 90,
                rollback_steps: vec![step("revert", "Revert the optimization", None)],
            },
            variables: HashMap::from([("target".to_string(), variable("string", true))]),
            metadata: TemplateMetadata::default(),
        },
    ]
}
