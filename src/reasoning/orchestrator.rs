//! Coordinates the reasoning subsystems into an execution plan.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::llm::{ModelClient, ReasonRequest};

use super::cache::ReasoningCache;
use super::patterns::PatternSet;
use super::plan::{ExecutionPlan, PlanStep, ProjectContext};
use super::templates::{instantiate, TemplateLibrary};
use super::tools::ToolSelector;

/// Orchestrator knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Confidence assigned to non-tool steps.
    pub base_step_confidence: f64,
    /// Confidence assumed for tools with no history.
    pub unknown_tool_confidence: f64,
    /// Minutes budgeted per step when no template provides an estimate.
    pub minutes_per_step: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            base_step_confidence: 0.8,
            unknown_tool_confidence: 0.5,
            minutes_per_step: 5,
        }
    }
}

/// Produces execution plans by consulting, in order: the reasoning cache,
/// the learned pattern set, the template library, and the reasoning model.
pub struct ReasoningOrchestrator {
    client: Arc<dyn ModelClient>,
    cache: ReasoningCache,
    patterns: PatternSet,
    templates: TemplateLibrary,
    selector: ToolSelector,
    config: OrchestratorConfig,
}

impl ReasoningOrchestrator {
    pub fn new(
        client: Arc<dyn ModelClient>,
        cache: ReasoningCache,
        patterns: PatternSet,
        templates: TemplateLibrary,
        selector: ToolSelector,
    ) -> Self {
        Self {
            client,
            cache,
            patterns,
            templates,
            selector,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Access the tool selector (for post-execution feedback).
    pub fn selector(&self) -> &ToolSelector {
        &self.selector
    }

    /// Access the reasoning cache (for post-execution feedback).
    pub fn cache(&self) -> &ReasoningCache {
        &self.cache
    }

    /// Create an execution plan for a request.
    pub async fn create_execution_plan(
        &self,
        request: &str,
        context: &ProjectContext,
    ) -> Result<ExecutionPlan> {
        // Embed once; every similarity consumer reuses this vector. Embedding
        // failure degrades to keyword classification rather than failing the
        // request.
        let embedding = match self.cache.embedding_for(request, self.client.as_ref()).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                tracing::warn!(error = %e, "embedding unavailable, degrading to keyword classification");
                None
            }
        };

        if let Some(embedding) = &embedding {
            if let Some(cached) = self.cache.find_similar(embedding).await {
                return Ok(self.adapt_cached_plan(cached, context));
            }
        }

        let classification = self.patterns.classify(request, embedding.as_deref()).await;
        let selected = self
            .selector
            .select_tools(&classification, context, &context.available_tools)
            .await;

        let mut plan = match self.templates.find_match(&classification, request).await {
            Some(template) => {
                let values: HashMap<String, String> = template
                    .variables
                    .keys()
                    .map(|name| (name.clone(), summarize_request(request)))
                    .collect();
                instantiate(&template, request, &values)
            }
            None => self.plan_via_model(request, context, &selected).await,
        };

        plan.pattern_id = classification.pattern_id().map(|s| s.to_string());
        if plan.estimated_duration_min == 0 {
            plan.estimated_duration_min = plan.steps.len() as u32 * self.config.minutes_per_step;
        }
        plan.confidence = self.plan_confidence(&plan).await;

        if let Some(embedding) = embedding {
            tokio::join!(
                self.cache.store(request, embedding.clone(), plan.clone()),
                self.patterns.learn(request, embedding, &plan)
            );
        }

        Ok(plan)
    }

    /// Reuse a cached plan: steps whose tool is no longer available degrade
    /// to analysis steps, and the adaptation is timestamped.
    fn adapt_cached_plan(&self, mut plan: ExecutionPlan, context: &ProjectContext) -> ExecutionPlan {
        let available: std::collections::HashSet<&str> = context
            .available_tools
            .iter()
            .map(|t| t.name.as_str())
            .collect();

        for step in &mut plan.steps {
            if let Some(tool) = &step.tool {
                if !available.is_empty() && !available.contains(tool.as_str()) {
                    tracing::debug!(tool = %tool, "cached plan references unavailable tool");
                    step.step_type = "analysis".to_string();
                    step.tool = None;
                }
            }
        }
        plan.adapted_at = Some(Utc::now());
        plan
    }

    async fn plan_via_model(
        &self,
        request: &str,
        context: &ProjectContext,
        selected: &[crate::llm::ToolDescriptor],
    ) -> ExecutionPlan {
        let tool_lines: Vec<String> = selected
            .iter()
            .map(|t| format!("- {} ({}): {}", t.name, t.category, t.description))
            .collect();
        let prompt = format!(
            "Plan the execution of this request.\n\nRequest: {request}\n\nProject: {} ({})\n{}\n\nAvailable tools:\n{}",
            context.project_type,
            context.language,
            context.summary,
            tool_lines.join("\n"),
        );

        let response = self
            .client
            .reason(ReasonRequest {
                prompt,
                system: None,
                tools: selected.to_vec(),
            })
            .await;

        match response {
            Ok(response) => {
                let steps: Vec<PlanStep> = response
                    .plan_data
                    .steps
                    .into_iter()
                    .map(|s| PlanStep {
                        step_type: s.step_type,
                        description: s.description,
                        tool: s.tool,
                    })
                    .collect();
                let mut plan = ExecutionPlan::new(request, steps);
                plan.reasoning_trace = response.reasoning_trace;
                if let Some(reasoning) = response.plan_data.reasoning {
                    plan.reasoning_trace.push(reasoning);
                }
                plan
            }
            Err(e) => {
                tracing::warn!(error = %e, "reasoning model unavailable, building plan from selected tools");
                let mut steps = vec![PlanStep::analysis("Analyze the request and gather context")];
                steps.extend(
                    selected
                        .iter()
                        .map(|t| PlanStep::tool_use(&t.name, format!("Apply {}", t.name))),
                );
                steps.push(PlanStep {
                    step_type: "synthesis".to_string(),
                    description: "Synthesize results into a response".to_string(),
                    tool: None,
                });
                ExecutionPlan::new(request, steps)
            }
        }
    }

    /// Mean per-step confidence: tool steps use the tool's historical
    /// success rate, other steps a fixed base.
    async fn plan_confidence(&self, plan: &ExecutionPlan) -> f64 {
        if plan.steps.is_empty() {
            return 0.0;
        }
        let mut total = 0.0;
        for step in &plan.steps {
            total += match &step.tool {
                Some(tool) => self
                    .selector
                    .tool_success_rate(tool)
                    .await
                    .unwrap_or(self.config.unknown_tool_confidence),
                None => self.config.base_step_confidence,
            };
        }
        total / plan.steps.len() as f64
    }
}

/// Short request summary used as a template variable value.
fn summarize_request(request: &str) -> String {
    let trimmed = request.trim();
    if trimmed.chars().count() <= 60 {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(57).collect();
        format!("{head}...")
    }
}
