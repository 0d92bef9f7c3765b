//! Text-completion service.
//!
//! [`CompletionService`] is the seam between the evaluator and the model:
//! one prompt in, one raw reply out, or a service error. [`OpenAiClient`]
//! implements it against any OpenAI-compatible `/chat/completions` endpoint.

use crate::config::Config;
use crate::error::{OptionExt, ReviewError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Accepts a prompt and returns the model's raw text.
///
/// Any `Err` is a service-level failure; the caller does not retry it.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// LLM client configuration
#[derive(Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl From<&Config> for LlmConfig {
    fn from(c: &Config) -> Self {
        Self {
            base_url: c.base_url.clone(),
            api_key: c.api_key.clone(),
            model: c.model.clone(),
            max_tokens: c.max_tokens,
            temperature: c.temperature,
        }
    }
}

/// OpenAI-compatible API response structures
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Chat-completions client
pub struct OpenAiClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ReviewError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request_body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens
        });

        debug!(model = %self.config.model, "Sending completion request");

        let response = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request_body)
            .send()
            .await
            .map_err(ReviewError::Network)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ReviewError::Api {
                code: status.as_u16(),
                message: format!("LLM API error: {} - {}", status, error_text),
            });
        }

        let api_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ReviewError::Parse(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(usage) = &api_response.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Completion usage"
            );
        }

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_parse("LLM response contained no message content")
    }
}
