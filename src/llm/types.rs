//! Wire types for the model adapter seam.

use serde::{Deserialize, Serialize};

/// A tool made available to the reasoning model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name as referenced in plan steps.
    pub name: String,
    /// Short description shown to the reasoning model.
    pub description: String,
    /// Category the tool belongs to (e.g. `code_analysis`).
    pub category: String,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: category.into(),
        }
    }
}

/// Request to the reasoning endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonRequest {
    /// The full prompt.
    pub prompt: String,
    /// Optional system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Tools the model may reference in its plan.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDescriptor>,
}

/// One step in a structured plan returned by the reasoning endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStepData {
    /// Step type, e.g. `tool_use` or `analysis`.
    #[serde(rename = "type")]
    pub step_type: String,
    /// Human-readable description of the step.
    pub description: String,
    /// Tool name for `tool_use` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

/// Structured plan payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanData {
    pub steps: Vec<PlanStepData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Response from the reasoning endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasonResponse {
    /// The structured plan.
    #[serde(rename = "planData")]
    pub plan_data: PlanData,
    /// Optional trace of intermediate reasoning.
    #[serde(
        rename = "reasoningTrace",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub reasoning_trace: Vec<String>,
}

/// Request to the text generation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}
