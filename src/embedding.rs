//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIEmbedder`]**: calls an OpenAI-compatible `/embeddings` endpoint.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Embedders are built once per process by [`create_embedder`] and shared
//! behind an `Arc`; each holds its own `reqwest::Client` connection pool and
//! is safe to call concurrently.
//!
//! # Retry Strategy
//!
//! Both HTTP providers run each request through a [`RetryPolicy`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Timeouts and connection errors → retry
//!
//! The vector size is whatever the model returns. When `embedding.dims` is
//! configured, responses of a different size are rejected.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{self, RagError, Result, Stage};
use crate::retry::RetryPolicy;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Maps text to a fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

// ============ Disabled Provider ============

/// A no-op embedder that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::Configuration(
            "embedding provider is disabled; set [embedding] provider in config".into(),
        ))
    }
}

// ============ OpenAI Provider ============

/// Embedder using an OpenAI-compatible embeddings API.
///
/// Calls `POST {url}/embeddings`. The API key is read once, at construction,
/// from the environment variable named by `embedding.api_key_env`.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: Option<usize>,
    retry: RetryPolicy,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig, retry: RetryPolicy) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;
        Self::with_api_key(config, api_key, retry)
    }

    /// Like [`new`](Self::new) with an explicit key instead of the environment.
    pub fn with_api_key(
        config: &EmbeddingConfig,
        api_key: impl Into<String>,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string());

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model,
            dims: config.dims,
            retry,
        })
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| error::from_reqwest(Stage::Embed, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(error::from_status(Stage::Embed, "OpenAI", status, &body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| error::from_reqwest(Stage::Embed, e))?;
        let vector = parse_openai_response(&json)?;
        check_dims(self.dims, vector)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = "openai", model = %self.model, text_len = text.len(), "embedding text");
        self.retry.run("embed", || self.embed_once(text)).await
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts `data[0].embedding`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let first = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .ok_or_else(|| {
            RagError::upstream(Stage::Embed, "invalid OpenAI response: missing data array")
        })?;

    let embedding = first
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| RagError::upstream(Stage::Embed, "invalid OpenAI response: missing embedding"))?;

    to_vector(embedding)
}

// ============ Ollama Provider ============

/// Embedder using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
/// Requires an embedding model to be pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: Option<usize>,
    retry: RetryPolicy,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig, retry: RetryPolicy) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims: config.dims,
            retry,
        })
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                RagError::transient(
                    Stage::Embed,
                    format!("Ollama connection error (is Ollama running at {}?): {}", self.url, e),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(error::from_status(Stage::Embed, "Ollama", status, &body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| error::from_reqwest(Stage::Embed, e))?;
        let vector = parse_ollama_response(&json)?;
        check_dims(self.dims, vector)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = "ollama", model = %self.model, text_len = text.len(), "embedding text");
        self.retry.run("embed", || self.embed_once(text)).await
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let first = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .ok_or_else(|| {
            RagError::upstream(Stage::Embed, "invalid Ollama response: missing embeddings array")
        })?;

    let values = first.as_array().ok_or_else(|| {
        RagError::upstream(Stage::Embed, "invalid Ollama response: embedding is not an array")
    })?;

    to_vector(values)
}

// ============ Helpers ============

fn http_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn to_vector(values: &[serde_json::Value]) -> Result<Vec<f32>> {
    let vector = values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| RagError::upstream(Stage::Embed, "non-numeric embedding value"))
        })
        .collect::<Result<Vec<f32>>>()?;

    if vector.is_empty() {
        return Err(RagError::upstream(Stage::Embed, "empty embedding returned"));
    }
    Ok(vector)
}

fn check_dims(expected: Option<usize>, vector: Vec<f32>) -> Result<Vec<f32>> {
    match expected {
        Some(dims) if dims != vector.len() => Err(RagError::upstream(
            Stage::Embed,
            format!("expected {} dimensions, model returned {}", dims, vector.len()),
        )),
        _ => Ok(vector),
    }
}

/// Create the [`Embedder`] selected by `embedding.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(
    config: &EmbeddingConfig,
    retry: RetryPolicy,
) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config, retry)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config, retry)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, and zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
