//! Model client trait and implementations.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::error::{Error, Result};

use super::types::{GenerateRequest, PlanData, PlanStepData, ReasonRequest, ReasonResponse};

/// Client for the three opaque model endpoints.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Embed a batch of texts. Returns one vector per input text.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Produce a structured plan for a prompt.
    async fn reason(&self, request: ReasonRequest) -> Result<ReasonResponse>;

    /// Generate free-form text.
    async fn generate(&self, request: GenerateRequest) -> Result<String>;

    /// Embedding dimension this client produces.
    fn dimension(&self) -> usize;
}

/// Configuration for HTTP-backed model clients.
#[derive(Debug, Clone)]
pub struct ModelClientConfig {
    /// API key sent as a bearer token.
    pub api_key: String,
    /// Endpoint base URL.
    pub base_url: String,
    /// Embedding dimension the endpoint produces.
    pub dimension: usize,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Max retries on transient failure.
    pub max_retries: u32,
}

impl ModelClientConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            dimension: 384,
            timeout_secs: 120,
            max_retries: 3,
        }
    }

    /// Build from `EVO_MODEL_API_KEY` and `EVO_MODEL_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("EVO_MODEL_API_KEY")
            .map_err(|_| Error::Config("EVO_MODEL_API_KEY is not set".into()))?;
        let base_url = std::env::var("EVO_MODEL_URL")
            .map_err(|_| Error::Config("EVO_MODEL_URL is not set".into()))?;
        Ok(Self::new(api_key, base_url))
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// HTTP JSON transport to a model provider.
pub struct HttpModelClient {
    config: ModelClientConfig,
    http: Client,
}

#[derive(Serialize)]
struct EmbedBody<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbedReply {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct GenerateReply {
    text: String,
}

impl HttpModelClient {
    pub fn new(config: ModelClientConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(250 * 2u64.pow(attempt - 1))).await;
            }

            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<R>()
                        .await
                        .map_err(|e| Error::external("model", e.to_string()));
                }
                Ok(resp) if resp.status().is_server_error() => {
                    tracing::warn!(status = %resp.status(), attempt, "model endpoint returned server error, retrying");
                    last_err = Some(Error::external("model", format!("status {}", resp.status())));
                }
                Ok(resp) => {
                    return Err(Error::external("model", format!("status {}", resp.status())));
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "model request failed, retrying");
                    last_err = Some(Error::external("model", e.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::external("model", "request failed")))
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let reply: EmbedReply = self.post_json("embed", &EmbedBody { texts }).await?;
        if reply.embeddings.len() != texts.len() {
            return Err(Error::external(
                "model",
                format!(
                    "embedding count mismatch: sent {}, got {}",
                    texts.len(),
                    reply.embeddings.len()
                ),
            ));
        }
        Ok(reply.embeddings)
    }

    async fn reason(&self, request: ReasonRequest) -> Result<ReasonResponse> {
        self.post_json("reason", &request).await
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let reply: GenerateReply = self.post_json("generate", &request).await?;
        Ok(reply.text)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

/// Deterministic model client with no external dependencies.
///
/// Embeddings are derived from repeated SHA-256 over the input text and
/// unit-normalized, so similarity scores are stable across calls within a
/// process and across processes. `reason` returns a minimal analyze-execute
/// plan; `generate` echoes the prompt tail.
pub struct HashEmbeddingClient {
    dimension: usize,
}

impl HashEmbeddingClient {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut values = Vec::with_capacity(self.dimension);
        let mut counter: u32 = 0;

        while values.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(counter.to_le_bytes());
            hasher.update(text.as_bytes());
            let digest = hasher.finalize();
            for chunk in digest.chunks(4) {
                if values.len() >= self.dimension {
                    break;
                }
                let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                // Map to [-1, 1]
                values.push((raw as f32 / u32::MAX as f32) * 2.0 - 1.0);
            }
            counter += 1;
        }

        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        values
    }
}

impl Default for HashEmbeddingClient {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl ModelClient for HashEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn reason(&self, request: ReasonRequest) -> Result<ReasonResponse> {
        let tool = request.tools.first().map(|t| t.name.clone());
        let mut steps = vec![PlanStepData {
            step_type: "analysis".to_string(),
            description: "Analyze the request and gather context".to_string(),
            tool: None,
        }];
        if let Some(name) = tool {
            steps.push(PlanStepData {
                step_type: "tool_use".to_string(),
                description: format!("Execute {name} against the request"),
                tool: Some(name),
            });
        }
        steps.push(PlanStepData {
            step_type: "synthesis".to_string(),
            description: "Synthesize results into a response".to_string(),
            tool: None,
        });

        Ok(ReasonResponse {
            plan_data: PlanData {
                steps,
                reasoning: Some("fallback plan".to_string()),
            },
            reasoning_trace: Vec::new(),
        })
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let tail: String = request.prompt.chars().rev().take(64).collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        Ok(tail)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
