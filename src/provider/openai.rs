//! OpenAI Chat Completions driver. Also serves OpenAI-compatible backends (DeepSeek,
//! Moonshot, local gateways) when registered under another name with a `base_url`.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::http::HttpTransport;
use super::{merge_options, ChatProvider, CompletionRequest, ProviderSettings};
use crate::structured::preview;
use crate::types::{ChatCompletionResponse, Usage};
use crate::{Error, Result};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    name: String,
    model: String,
    api_key: String,
    base_url: String,
    options: Map<String, Value>,
    transport: HttpTransport,
}

impl OpenAiProvider {
    pub fn new(name: &str, settings: ProviderSettings) -> Result<Self> {
        let api_key = settings.require_api_key(name)?;
        let model = settings.require_model(name)?;
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            name: name.to_string(),
            model,
            api_key,
            base_url,
            transport: HttpTransport::new(name, settings.timeout)?,
            options: settings.options,
        })
    }

    pub fn build_body(&self, request: &CompletionRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(mt) = request.max_tokens {
            body["max_tokens"] = json!(mt);
        }
        if request.wants_json() {
            body["response_format"] = json!({ "type": "json_object" });
        }
        merge_options(&mut body, &self.options);
        body
    }

    pub fn parse_response(&self, body: &Value) -> Result<ChatCompletionResponse> {
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ResponseParsing {
                message: format!("{} response has no choices[0].message.content", self.name),
                preview: preview(&body.to_string()),
            })?;
        let finish_reason = body
            .pointer("/choices/0/finish_reason")
            .and_then(|v| v.as_str())
            .map(String::from);
        let usage = body
            .get("usage")
            .map(|u| {
                Usage::new(
                    u["prompt_tokens"].as_u64().unwrap_or(0),
                    u["completion_tokens"].as_u64().unwrap_or(0),
                )
            })
            .unwrap_or_default();
        let model = body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(self.model.as_str())
            .to_string();

        Ok(ChatCompletionResponse {
            content: content.to_string(),
            model,
            provider: self.name.clone(),
            finish_reason,
            usage,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ChatCompletionResponse> {
        request.validate()?;
        let body = self.build_body(request);
        let url = format!("{}/chat/completions", self.base_url);
        let headers = [("authorization", format!("Bearer {}", self.api_key))];
        let resp = self.transport.post_json(&url, &headers, &body).await?;
        self.parse_response(&resp)
    }
}
