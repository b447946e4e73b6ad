//! LLM backend abstraction
//!
//! Supports OpenAI-compatible APIs (OpenAI, OpenRouter, local servers) and
//! Anthropic Claude.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// LLM backend errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Empty response")]
    EmptyResponse,
}

impl LlmError {
    /// Classify a provider error message
    pub fn from_api_message(message: String) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("rate_limit")
            || lower.contains("too many requests")
        {
            LlmError::RateLimited(message)
        } else {
            LlmError::Api(message)
        }
    }
}

impl From<OpenAIError> for LlmError {
    fn from(err: OpenAIError) -> Self {
        LlmError::from_api_message(err.to_string())
    }
}

/// Which kind of provider a backend talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    OpenRouter,
    Anthropic,
    /// Self-hosted OpenAI-compatible server (Ollama, llama.cpp)
    Local,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Local => "local",
        };
        f.write_str(name)
    }
}

/// Local model families known to handle structured tool calls
const TOOL_CAPABLE_LOCAL_MODELS: &[&str] = &["llama3.1", "llama3.2", "mistral", "mixtral", "qwen2.5"];

/// How a backend can invoke tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSupport {
    /// Provider-side structured tool calls
    Native,
    /// Tools described in the prompt; the model replies with a JSON call
    Prompted,
    /// Plain text generation only
    Unsupported,
}

impl ToolSupport {
    /// Decide once per session from provider and model name
    pub fn negotiate(provider: ProviderKind, model: &str) -> Self {
        match provider {
            ProviderKind::OpenAI | ProviderKind::OpenRouter | ProviderKind::Anthropic => ToolSupport::Native,
            ProviderKind::Local => {
                let model = model.to_lowercase();
                if TOOL_CAPABLE_LOCAL_MODELS.iter().any(|m| model.contains(m)) {
                    ToolSupport::Native
                } else if model.is_empty() {
                    ToolSupport::Unsupported
                } else {
                    ToolSupport::Prompted
                }
            }
        }
    }

    pub fn supports_tools(&self) -> bool {
        !matches!(self, ToolSupport::Unsupported)
    }
}

/// Generic LLM backend trait
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generate a completion with system prompt
    async fn generate(&self, system: &str, user: &str) -> Result<String, LlmError>;

    /// Get the model name
    fn model_name(&self) -> &str;

    fn provider(&self) -> ProviderKind;

    fn tool_support(&self) -> ToolSupport {
        ToolSupport::negotiate(self.provider(), self.model_name())
    }
}

/// OpenAI-compatible backend configuration
#[derive(Debug, Clone)]
pub struct OpenAIBackendConfig {
    /// API key
    pub api_key: String,
    /// Base URL (for OpenRouter, local servers, etc.)
    pub base_url: Option<String>,
    /// Model name
    pub model: String,
    /// Temperature (0.0 - 2.0)
    pub temperature: f32,
    /// Max tokens
    pub max_tokens: u16,
    pub provider: ProviderKind,
}

impl Default for OpenAIBackendConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 4096,
            provider: ProviderKind::OpenAI,
        }
    }
}

impl OpenAIBackendConfig {
    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            ..Default::default()
        }
    }

    pub fn openrouter(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: Some("https://openrouter.ai/api/v1".to_string()),
            model: model.to_string(),
            provider: ProviderKind::OpenRouter,
            ..Default::default()
        }
    }

    pub fn local(base_url: &str, model: &str) -> Self {
        Self {
            api_key: "sk-local".to_string(),
            base_url: Some(base_url.to_string()),
            model: model.to_string(),
            provider: ProviderKind::Local,
            ..Default::default()
        }
    }
}

/// OpenAI-compatible LLM backend
pub struct OpenAIBackend {
    client: Client<OpenAIConfig>,
    config: OpenAIBackendConfig,
}

impl OpenAIBackend {
    pub fn new(config: OpenAIBackendConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() && config.provider != ProviderKind::Local {
            return Err(LlmError::Config(format!("missing API key for {}", config.provider)));
        }

        let mut openai_config = OpenAIConfig::new().with_api_key(&config.api_key);

        if let Some(base_url) = &config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        let client = Client::with_config(openai_config);

        Ok(Self { client, config })
    }
}

#[async_trait]
impl LlmBackend for OpenAIBackend {
    async fn generate(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user)
                    .build()?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .messages(messages)
            .temperature(self.config.temperature)
            .max_tokens(self.config.max_tokens)
            .build()?;

        debug!("Sending completion to {} ({})", self.config.provider, self.config.model);
        let response = self.client.chat().create(request).await?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or(LlmError::EmptyResponse)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn provider(&self) -> ProviderKind {
        self.config.provider
    }
}

/// Anthropic Claude backend configuration
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key
    pub api_key: String,
    /// Model name (e.g., claude-3-5-sonnet-20241022)
    pub model: String,
    /// Max tokens
    pub max_tokens: u32,
}

impl AnthropicConfig {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens: 4096,
        }
    }
}

/// Anthropic Claude backend
pub struct AnthropicBackend {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicBackend {
    pub fn new(config: AnthropicConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::Config("missing API key for anthropic".to_string()));
        }
        let client = reqwest::Client::new();
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn generate(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let request_body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": system,
            "messages": [
                {"role": "user", "content": user}
            ]
        });

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited(format!("Anthropic API returned {}", status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_api_message(format!(
                "Anthropic API error {}: {}",
                status, text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;

        json["content"]
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|block| block["text"].as_str())
            .map(|s| s.to_string())
            .ok_or(LlmError::EmptyResponse)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }
}

/// Thread-safe reference to an LLM backend
pub type SharedBackend = Arc<dyn LlmBackend>;

/// Create a shared OpenAI-compatible backend
pub fn create_backend(config: OpenAIBackendConfig) -> Result<SharedBackend, LlmError> {
    Ok(Arc::new(OpenAIBackend::new(config)?))
}

/// Create a shared Anthropic backend
pub fn create_anthropic_backend(config: AnthropicConfig) -> Result<SharedBackend, LlmError> {
    Ok(Arc::new(AnthropicBackend::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_classification() {
        assert!(matches!(
            LlmError::from_api_message("HTTP 429 Too Many Requests".into()),
            LlmError::RateLimited(_)
        ));
        assert!(matches!(
            LlmError::from_api_message("rate_limit_exceeded: slow down".into()),
            LlmError::RateLimited(_)
        ));
        assert!(matches!(
            LlmError::from_api_message("invalid api key".into()),
            LlmError::Api(_)
        ));
    }

    #[test]
    fn test_tool_support_negotiation() {
        assert_eq!(ToolSupport::negotiate(ProviderKind::Anthropic, "claude-3-5-sonnet"), ToolSupport::Native);
        assert_eq!(ToolSupport::negotiate(ProviderKind::OpenRouter, "any/model"), ToolSupport::Native);
        assert_eq!(ToolSupport::negotiate(ProviderKind::Local, "Llama3.1:8b"), ToolSupport::Native);
        assert_eq!(ToolSupport::negotiate(ProviderKind::Local, "gemma2:9b"), ToolSupport::Prompted);
        assert_eq!(ToolSupport::negotiate(ProviderKind::Local, ""), ToolSupport::Unsupported);
        assert!(!ToolSupport::Unsupported.supports_tools());
    }

    #[test]
    fn test_missing_api_key_rejected() {
        assert!(matches!(
            OpenAIBackend::new(OpenAIBackendConfig::openai("", "gpt-4o-mini")),
            Err(LlmError::Config(_))
        ));
        assert!(OpenAIBackend::new(OpenAIBackendConfig::local("http://localhost:11434/v1", "llama3.1")).is_ok());
    }
}
