//! 服务商抽象层：统一的聊天补全接口、注册表与错误分类
//!
//! Provider abstraction. Every backend implements [`ChatProvider`]: send an ordered list of
//! messages, get back a [`ChatCompletionResponse`] or an error from the shared taxonomy
//! (`Validation`, `RateLimit`, `Api`, plus `Configuration` for rejected credentials).
//!
//! Providers are created by name through the [`ProviderRegistry`], which is an ordinary
//! value handed to the batch runner rather than a global.

pub mod anthropic;
pub mod classify;
pub mod http;
pub mod openai;
pub mod registry;
pub mod retrying;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::types::{ChatCompletionResponse, ChatMessage, ResponseFormat};
use crate::{Error, ErrorContext, Result};

pub use anthropic::AnthropicProvider;
pub use classify::{FailureCategory, ProviderFailure};
pub use openai::OpenAiProvider;
pub use registry::{ProviderFactory, ProviderRegistry};
pub use retrying::RetryingProvider;

/// One chat-completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    /// 0.0 – 1.0
    pub temperature: Option<f64>,
    pub response_format: Option<ResponseFormat>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: None,
            temperature: None,
            response_format: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn wants_json(&self) -> bool {
        self.response_format == Some(ResponseFormat::Json)
    }

    /// Reject requests no provider could serve, before any network traffic.
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(Error::validation_with_context(
                "at least one message is required",
                ErrorContext::new()
                    .with_field_path("messages")
                    .with_source("request_validator"),
            ));
        }
        if let Some(i) = self.messages.iter().position(|m| m.content.trim().is_empty()) {
            return Err(Error::validation_with_context(
                "message content must not be empty",
                ErrorContext::new()
                    .with_field_path(format!("messages[{}].content", i))
                    .with_source("request_validator"),
            ));
        }
        if let Some(t) = self.temperature {
            if !t.is_finite() || !(0.0..=1.0).contains(&t) {
                return Err(Error::validation_with_context(
                    "temperature must be within 0.0..=1.0",
                    ErrorContext::new()
                        .with_field_path("temperature")
                        .with_details(format!("got {}", t))
                        .with_source("request_validator"),
                ));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(Error::validation_with_context(
                "max_tokens must be positive",
                ErrorContext::new()
                    .with_field_path("max_tokens")
                    .with_source("request_validator"),
            ));
        }
        Ok(())
    }
}

/// Construction parameters for a provider: credential, model, and keyword options.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    /// Extra request-body fields merged into every call (e.g. `top_p`).
    pub options: Map<String, Value>,
}

impl ProviderSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// The credential, or a configuration error naming the provider.
    pub(crate) fn require_api_key(&self, provider: &str) -> Result<String> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key.to_string()),
            _ => Err(Error::configuration_with_context(
                format!("no API key configured for provider '{}'", provider),
                ErrorContext::new()
                    .with_field_path(format!("providers.{}.api_key_env", provider))
                    .with_details(format!("set {}_API_KEY", provider.to_uppercase()))
                    .with_source("provider_settings"),
            )),
        }
    }

    pub(crate) fn require_model(&self, provider: &str) -> Result<String> {
        let model = self.model.trim();
        if model.is_empty() {
            return Err(Error::configuration_with_context(
                format!("no model configured for provider '{}'", provider),
                ErrorContext::new()
                    .with_field_path(format!("providers.{}.model", provider))
                    .with_source("provider_settings"),
            ));
        }
        Ok(model.to_string())
    }
}

/// Uniform chat-completion contract.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Registry name, lowercase.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<ChatCompletionResponse>;
}

/// Merge keyword options into a request body without overriding fields already set.
pub(crate) fn merge_options(body: &mut Value, options: &Map<String, Value>) {
    if let Value::Object(map) = body {
        for (k, v) in options {
            map.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}
