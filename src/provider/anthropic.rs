//! Anthropic Messages API driver. Handles the key differences from OpenAI:
//! - System messages are a top-level `system` parameter, not part of `messages`.
//! - `max_tokens` is required, not optional.
//! - There is no native JSON mode; JSON output is requested through the system prompt.
//! - Response text lives in `content[0].text`, usage in `input_tokens`/`output_tokens`.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::http::HttpTransport;
use super::{merge_options, ChatProvider, CompletionRequest, ProviderSettings};
use crate::structured::preview;
use crate::types::{ChatCompletionResponse, ChatMessage, MessageRole, Usage};
use crate::{Error, Result};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const JSON_INSTRUCTION: &str =
    "Respond with a single JSON object only. Do not wrap it in code fences or add commentary.";

pub struct AnthropicProvider {
    name: String,
    model: String,
    api_key: String,
    base_url: String,
    options: Map<String, Value>,
    transport: HttpTransport,
}

impl AnthropicProvider {
    pub fn new(name: &str, settings: ProviderSettings) -> Result<Self> {
        let api_key = settings.require_api_key(name)?;
        let model = settings.require_model(name)?;
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string())
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

    fn split_system(messages: &[ChatMessage]) -> (Vec<&str>, Vec<Value>) {
        let mut system = Vec::new();
        let mut turns = Vec::new();
        for m in messages {
            match m.role {
                MessageRole::System => system.push(m.content.as_str()),
                MessageRole::User | MessageRole::Assistant => turns.push(json!({
                    "role": m.role.as_str(),
                    "content": [{ "type": "text", "text": m.content }],
                })),
            }
        }
        (system, turns)
    }

    pub fn build_body(&self, request: &CompletionRequest) -> Value {
        let (mut system, turns) = Self::split_system(&request.messages);
        if request.wants_json() {
            system.push(JSON_INSTRUCTION);
        }

        let mut body = json!({
            "model": self.model,
            "messages": turns,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if !system.is_empty() {
            body["system"] = Value::String(system.join("\n\n"));
        }
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        merge_options(&mut body, &self.options);
        body
    }

    pub fn parse_response(&self, body: &Value) -> Result<ChatCompletionResponse> {
        let content: Vec<&str> = body
            .get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect()
            })
            .unwrap_or_default();
        if content.is_empty() {
            return Err(Error::ResponseParsing {
                message: format!("{} response has no text content block", self.name),
                preview: preview(&body.to_string()),
            });
        }

        // Normalize stop_reason → finish_reason
        let finish_reason = body
            .get("stop_reason")
            .and_then(|v| v.as_str())
            .map(|r| match r {
                "end_turn" | "stop_sequence" => "stop".to_string(),
                "max_tokens" => "length".to_string(),
                other => other.to_string(),
            });
        let usage = body
            .get("usage")
            .map(|u| {
                Usage::new(
                    u["input_tokens"].as_u64().unwrap_or(0),
                    u["output_tokens"].as_u64().unwrap_or(0),
                )
            })
            .unwrap_or_default();
        let model = body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(self.model.as_str())
            .to_string();

        Ok(ChatCompletionResponse {
            content: content.concat(),
            model,
            provider: self.name.clone(),
            finish_reason,
            usage,
        })
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ChatCompletionResponse> {
        request.validate()?;
        let body = self.build_body(request);
        let url = format!("{}/messages", self.base_url);
        let headers = [
            ("x-api-key", self.api_key.clone()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ];
        let resp = self.transport.post_json(&url, &headers, &body).await?;
        self.parse_response(&resp)
    }
}
