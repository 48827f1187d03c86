//! Chat completion client used to synthesize answers.
//!
//! [`OpenAIChat`] talks to any OpenAI-compatible `/chat/completions` endpoint
//! (Groq by default). Each call sends one `user` message and returns the
//! content of the first choice. Requests go through the shared
//! [`RetryPolicy`]; 429 and 5xx are retried, other errors are not.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{self, RagError, Result, Stage};
use crate::retry::RetryPolicy;

/// A model that completes a single prompt.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Returned when `llm.provider = "disabled"`.
pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(RagError::Configuration(
            "llm provider is disabled; set [llm] provider in config".into(),
        ))
    }
}

pub struct OpenAIChat {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig, retry: RetryPolicy) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;
        Self::with_api_key(config, api_key, retry)
    }

    pub fn with_api_key(
        config: &LlmConfig,
        api_key: impl Into<String>,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
            retry,
        })
    }

    async fn complete_once(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| error::from_reqwest(Stage::Complete, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(error::from_status(Stage::Complete, "LLM", status, &body_text));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| error::from_reqwest(Stage::Complete, e))?;
        first_choice(body)
    }
}

fn first_choice(body: ChatResponse) -> Result<String> {
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| RagError::upstream(Stage::Complete, "LLM response has no choices"))
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!(model = %self.model, prompt_len = prompt.len(), "chat completion");
        self.retry
            .run("chat completion", || self.complete_once(prompt))
            .await
    }
}

/// Create the [`ChatModel`] selected by `llm.provider`.
pub fn create_chat_model(
    config: &LlmConfig,
    retry: RetryPolicy,
) -> anyhow::Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChat)),
        "openai" => Ok(Arc::new(OpenAIChat::new(config, retry)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
