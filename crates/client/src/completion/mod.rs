//! Completion service client.
//!
//! Two capabilities are consumed from an OpenAI-compatible chat endpoint:
//!
//! - **direct**: the model reads the cleaned page and replies with the record as JSON
//! - **codegen**: the model replies with an extraction program that the
//!   [`crate::sandbox::Sandbox`] runs against the page
//!
//! Requests are sent at temperature 0. Replies wrapped in markdown code fences
//! are unwrapped before use.

pub mod error;
pub mod request;
pub mod response;

pub use error::CompletionError;
pub use request::ExtractionHints;
pub use response::strip_code_fences;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pagesift_core::{AppConfig, Error};
use serde_json::Value;
use url::Url;

use request::{ChatMessage, ChatRequest, ResponseFormat};
use response::ChatResponse;

/// Default model.
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default base URL for the OpenAI API.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Per-request timeout. The pipeline deadline usually fires first.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// The model-completion capability the pipeline depends on.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Extract a record from cleaned page content.
    async fn extract(&self, cleaned: &str, base_url: &Url, hints: &ExtractionHints) -> Result<Value, Error>;

    /// Write an extraction program for cleaned page content.
    async fn synthesize_program(&self, cleaned: &str, base_url: &Url, hints: &ExtractionHints)
    -> Result<String, Error>;
}

/// Completion client configuration.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// API key; calls fail with [`CompletionError::MissingApiKey`] without one.
    pub api_key: Option<String>,
    /// Base URL (default: https://api.openai.com/v1).
    pub base_url: String,
    /// Model identifier (default: gpt-4o-mini).
    pub model: String,
    /// Request timeout (default: 60s).
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl CompletionConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            api_key: config.completion_api_key.clone().filter(|k| !k.trim().is_empty()),
            base_url: config.completion_base_url.trim_end_matches('/').to_string(),
            model: config.completion_model.clone(),
            ..Default::default()
        }
    }
}

/// OpenAI-compatible chat completion client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    config: CompletionConfig,
}

impl OpenAiClient {
    pub fn new(config: CompletionConfig) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CompletionError::Network(Arc::new(e)))?;

        Ok(Self { http, config })
    }

    /// Set the chat model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Set a custom base URL (for OpenRouter, proxies, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send one system + user exchange and return the reply text.
    async fn chat(&self, system: String, user: String, json_reply: bool) -> Result<String, CompletionError> {
        let api_key = self.config.api_key.as_deref().ok_or(CompletionError::MissingApiKey)?;

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: 0.0,
            response_format: json_reply.then(ResponseFormat::json_object),
        };

        let start = Instant::now();
        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == 401 || status == 403 {
            return Err(CompletionError::AuthError);
        }
        if status == 429 {
            return Err(CompletionError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { status: status.as_u16(), body });
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| CompletionError::Parse(e.to_string()))?;
        let content = chat_response.into_content()?;

        tracing::debug!(
            model = %self.config.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            reply_chars = content.len(),
            "completion finished"
        );
        Ok(content)
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn extract(&self, cleaned: &str, base_url: &Url, hints: &ExtractionHints) -> Result<Value, Error> {
        let system = request::direct_system_prompt(hints);
        let user = request::page_prompt(cleaned, base_url, "Extract the record now.");
        let reply = self.chat(system, user, true).await?;
        Ok(response::parse_json_reply(&reply)?)
    }

    async fn synthesize_program(
        &self, cleaned: &str, base_url: &Url, hints: &ExtractionHints,
    ) -> Result<String, Error> {
        let system = request::program_system_prompt(hints);
        let user = request::page_prompt(cleaned, base_url, "Write the extraction program now.");
        let reply = self.chat(system, user, false).await?;
        Ok(strip_code_fences(&reply).to_string())
    }
}
