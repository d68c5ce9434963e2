//! LLM collaborators behind an OpenAI-compatible chat-completions endpoint
//!
//! - `ChatClient`: one request, one answer; non-2xx become `Upstream`
//! - `LlmClassifier`: YES/NO relevance decisions
//! - `LlmRefiner`: rewrites a filtering prompt from owner feedback

pub mod classifier;
pub mod refiner;

pub use classifier::{Classifier, LlmClassifier, Verdict};
pub use refiner::{LlmRefiner, PromptRefiner};

use crate::error::{PipelineError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_LLM_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "anthropic/claude-3.5-sonnet";
pub const DEFAULT_APP_NAME: &str = "Veritas";

/// Connection settings for the chat endpoint
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    /// Sent as `X-Title`
    pub app_name: String,
    /// Sent as `HTTP-Referer`
    pub referer: String,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: DEFAULT_LLM_API_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            referer: "https://github.com/cuelabs/veritas".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AnswerMessage,
}

#[derive(Debug, Deserialize)]
struct AnswerMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Sampling parameters for one completion
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub max_tokens: u32,
    pub temperature: f32,
}

pub struct ChatClient {
    client: Client,
    config: LlmConfig,
}

impl ChatClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Http {
                url: config.api_url.clone(),
                source: e,
            })?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send one chat turn and return the trimmed answer text.
    ///
    /// An answer with no choices or no content comes back as an empty string.
    pub async fn complete(
        &self,
        system: Option<&str>,
        user: &str,
        params: Completion,
    ) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user,
        });

        let request = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };

        let url = &self.config.api_url;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.app_name)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Http {
                url: url.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Upstream {
                url: url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| PipelineError::Http {
            url: url.clone(),
            source: e,
        })?;
        let parsed: ChatResponse = serde_json::from_str(&body)?;

        let answer = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default()
            .trim()
            .to_string();

        debug!("LLM answered {} chars", answer.len());
        Ok(answer)
    }
}
