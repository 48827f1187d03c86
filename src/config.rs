//! TOML configuration parsing and validation.
//!
//! All settings live in one file (default `./config/docqa.toml`). API keys are
//! never read from the file; each external client names the environment
//! variable it takes its key from.
//!
//! ```toml
//! [db]
//! path = "./data/docqa.sqlite"
//!
//! [chunking]
//! size = 500
//! overlap = 50
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//!
//! [index]
//! provider = "pinecone"
//! host = "https://docs-abc123.svc.us-east-1.pinecone.io"
//!
//! [llm]
//! provider = "openai"
//! model = "llama-3.3-70b-versatile"
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Fixed-size window chunking, measured in characters.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Expected vector size. When set, responses of any other size are rejected.
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible servers, or the Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    /// Maximum in-flight embedding calls per ingestion.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_embedding_key_env(),
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_concurrency() -> usize {
    8
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `memory` or `pinecone`.
    #[serde(default = "default_index_provider")]
    pub provider: String,
    /// Data-plane host of the Pinecone index.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_index_key_env")]
    pub api_key_env: String,
    /// Records per upsert request.
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: default_index_provider(),
            host: None,
            namespace: None,
            api_key_env: default_index_key_env(),
            upsert_batch_size: default_upsert_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_index_provider() -> String {
    "memory".to_string()
}
fn default_index_key_env() -> String {
    "PINECONE_API_KEY".to_string()
}
fn default_upsert_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `openai` (any OpenAI-compatible chat completions API) or `disabled`.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: default_llm_url(),
            api_key_env: default_llm_key_env(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "disabled".to_string()
}
fn default_llm_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_llm_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_llm_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Upper bound on the assembled context handed to the LLM.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_context_chars() -> usize {
    12_000
}

/// Bounded exponential backoff for calls to external services.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Largest accepted upload body.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

impl Config {
    /// Defaults everywhere except the database path; used by tests.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            llm: LlmConfig::default(),
            retrieval: RetrievalConfig::default(),
            retry: RetryConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.size == 0 {
        bail!("chunking.size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.size {
        bail!(
            "chunking.overlap ({}) must be smaller than chunking.size ({})",
            config.chunking.overlap,
            config.chunking.size
        );
    }

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_context_chars == 0 {
        bail!("retrieval.max_context_chars must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0 when set");
    }
    if config.embedding.concurrency == 0 {
        bail!("embedding.concurrency must be >= 1");
    }

    // Validate index
    match config.index.provider.as_str() {
        "memory" => {}
        "pinecone" => {
            if config.index.host.is_none() {
                bail!("index.host must be specified when provider is 'pinecone'");
            }
        }
        other => bail!(
            "Unknown index provider: '{}'. Must be memory or pinecone.",
            other
        ),
    }
    if config.index.upsert_batch_size == 0 {
        bail!("index.upsert_batch_size must be >= 1");
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        bail!("retry.max_delay_ms must be >= retry.base_delay_ms");
    }

    Ok(())
}
