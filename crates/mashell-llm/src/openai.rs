//! Adapter for the OpenAI-compatible `chat/completions` wire format.
//!
//! The same payload shape serves OpenAI, Azure OpenAI deployments and Ollama's
//! compatibility endpoint; only the URL layout and auth header differ.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::errors::{ConfigurationError, SDKError};
use crate::provider::ProviderAdapter;
use crate::types::{
    FinishReason, Message, Request, Response, Role, ToolCall, ToolDefinition, Usage,
};

const AZURE_API_VERSION: &str = "2024-02-15-preview";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderFlavor {
    OpenAi,
    Azure,
    Ollama,
}

impl ProviderFlavor {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "azure" => Some(Self::Azure),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::Ollama => "ollama",
        }
    }

    pub fn supported() -> &'static [&'static str] {
        &["openai", "azure", "ollama"]
    }

    /// Preset endpoint used when neither flag, env nor profile gives one.
    pub fn default_url(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Azure => None,
            Self::Ollama => Some("http://localhost:11434"),
        }
    }

    pub fn default_model(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("gpt-4o"),
            Self::Azure => None,
            Self::Ollama => Some("qwen2.5:14b"),
        }
    }

    pub fn requires_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

#[derive(Clone)]
pub struct OpenAiCompatibleAdapter {
    flavor: ProviderFlavor,
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl OpenAiCompatibleAdapter {
    pub fn new(
        flavor: ProviderFlavor,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, SDKError> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ConfigurationError::new(format!(
                "provider '{}' requires an endpoint URL",
                flavor.as_str()
            ))
            .into());
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| SDKError::Transport(error.to_string()))?;
        Ok(Self {
            flavor,
            base_url,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            http,
        })
    }

    pub fn flavor(&self) -> ProviderFlavor {
        self.flavor
    }

    pub fn endpoint(&self, model: &str) -> String {
        match self.flavor {
            ProviderFlavor::OpenAi => format!("{}/chat/completions", self.base_url),
            ProviderFlavor::Azure => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url, model, AZURE_API_VERSION
            ),
            ProviderFlavor::Ollama => {
                if self.base_url.ends_with("/v1") {
                    format!("{}/chat/completions", self.base_url)
                } else {
                    format!("{}/v1/chat/completions", self.base_url)
                }
            }
        }
    }

    pub fn build_payload(&self, request: &Request) -> Value {
        let mut payload = Map::new();
        payload.insert("model".to_string(), Value::from(request.model.clone()));
        payload.insert(
            "messages".to_string(),
            Value::Array(request.messages.iter().map(format_message).collect()),
        );
        if let Some(tools) = request.tools.as_ref().filter(|tools| !tools.is_empty()) {
            payload.insert(
                "tools".to_string(),
                Value::Array(tools.iter().map(format_tool).collect()),
            );
            let choice = request
                .tool_choice
                .as_ref()
                .map(|choice| choice.mode.clone())
                .unwrap_or_else(|| "auto".to_string());
            payload.insert("tool_choice".to_string(), Value::from(choice));
        }
        if let Some(temperature) = request.temperature {
            payload.insert("temperature".to_string(), Value::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            payload.insert("max_tokens".to_string(), Value::from(max_tokens));
        }
        Value::Object(payload)
    }

    pub fn parse_response(&self, data: Value) -> Result<Response, SDKError> {
        let choice = data
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .ok_or_else(|| SDKError::InvalidResponse("response has no choices".to_string()))?;
        let message = choice
            .get("message")
            .ok_or_else(|| SDKError::InvalidResponse("choice has no message".to_string()))?;

        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tool_calls = match message.get("tool_calls").and_then(Value::as_array) {
            Some(raw_calls) => raw_calls
                .iter()
                .enumerate()
                .map(|(index, raw)| parse_tool_call(index, raw))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let finish_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .unwrap_or("stop")
            .to_string();

        let usage = data.get("usage").map(parse_usage).unwrap_or_default();

        Ok(Response {
            id: data
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            model: data
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            provider: self.flavor.as_str().to_string(),
            message: Message::assistant_with_tool_calls(content, tool_calls),
            finish_reason: FinishReason {
                reason: finish_reason.clone(),
                raw: Some(finish_reason),
            },
            usage,
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn name(&self) -> &str {
        self.flavor.as_str()
    }

    async fn complete(&self, request: Request) -> Result<Response, SDKError> {
        let url = self.endpoint(&request.model);
        let payload = self.build_payload(&request);
        debug!(provider = self.flavor.as_str(), url = %url, "sending chat completion");

        let mut builder = self.http.post(&url).json(&payload);
        if let Some(key) = &self.api_key {
            builder = match self.flavor {
                ProviderFlavor::Azure => builder.header("api-key", key),
                ProviderFlavor::OpenAi | ProviderFlavor::Ollama => builder.bearer_auth(key),
            };
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SDKError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let data: Value = response.json().await?;
        self.parse_response(data)
    }
}

fn format_message(message: &Message) -> Value {
    let mut formatted = Map::new();
    formatted.insert("role".to_string(), Value::from(message.role.as_str()));

    if message.role == Role::Assistant && !message.tool_calls.is_empty() {
        if message.content.is_empty() {
            formatted.insert("content".to_string(), Value::Null);
        } else {
            formatted.insert("content".to_string(), Value::from(message.content.clone()));
        }
        let calls = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call
                            .raw_arguments
                            .clone()
                            .unwrap_or_else(|| call.arguments.to_string()),
                    }
                })
            })
            .collect();
        formatted.insert("tool_calls".to_string(), Value::Array(calls));
    } else {
        formatted.insert("content".to_string(), Value::from(message.content.clone()));
    }

    if let Some(tool_call_id) = &message.tool_call_id {
        formatted.insert("tool_call_id".to_string(), Value::from(tool_call_id.clone()));
    }
    Value::Object(formatted)
}

fn format_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn parse_tool_call(index: usize, raw: &Value) -> Result<ToolCall, SDKError> {
    let function = raw
        .get("function")
        .ok_or_else(|| SDKError::InvalidResponse(format!("tool call {index} has no function")))?;
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| SDKError::InvalidResponse(format!("tool call {index} has no name")))?;
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("call_{index}"));

    let (arguments, raw_arguments) = match function.get("arguments") {
        Some(Value::String(text)) => (
            serde_json::from_str::<Value>(text).unwrap_or(Value::Null),
            Some(text.clone()),
        ),
        Some(other) => (other.clone(), None),
        None => (Value::Object(Map::new()), None),
    };

    Ok(ToolCall {
        id,
        name: name.to_string(),
        arguments,
        raw_arguments,
    })
}

fn parse_usage(raw: &Value) -> Usage {
    let field = |key: &str| raw.get(key).and_then(Value::as_u64).unwrap_or(0);
    Usage {
        input_tokens: field("prompt_tokens"),
        output_tokens: field("completion_tokens"),
        total_tokens: field("total_tokens"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolChoice;

    fn adapter(flavor: ProviderFlavor, url: &str) -> OpenAiCompatibleAdapter {
        OpenAiCompatibleAdapter::new(flavor, url, Some("secret".to_string()))
            .expect("adapter should build")
    }

    #[test]
    fn endpoints_follow_each_flavor_layout() {
        assert_eq!(
            adapter(ProviderFlavor::OpenAi, "https://api.openai.com/v1/").endpoint("gpt-4o"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            adapter(ProviderFlavor::Azure, "https://res.openai.azure.com").endpoint("dep"),
            "https://res.openai.azure.com/openai/deployments/dep/chat/completions?api-version=2024-02-15-preview"
        );
        assert_eq!(
            adapter(ProviderFlavor::Ollama, "http://localhost:11434").endpoint("qwen"),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(
            adapter(ProviderFlavor::Ollama, "http://localhost:11434/v1").endpoint("qwen"),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn empty_url_is_rejected() {
        let error = OpenAiCompatibleAdapter::new(ProviderFlavor::Azure, "  ", None)
            .err()
            .expect("empty url should fail");
        assert!(matches!(error, SDKError::Configuration(_)));
    }

    #[test]
    fn payload_carries_tool_calls_and_tool_results() {
        let request = Request {
            model: "gpt-4o".to_string(),
            messages: vec![
                Message::user("list files"),
                Message::assistant_with_tool_calls(
                    "",
                    vec![ToolCall {
                        id: "call-1".to_string(),
                        name: "execute_command".to_string(),
                        arguments: json!({"command": "ls"}),
                        raw_arguments: Some("{\"command\":\"ls\"}".to_string()),
                    }],
                ),
                Message::tool_result("call-1", json!({"success": true})),
            ],
            tools: Some(vec![ToolDefinition {
                name: "execute_command".to_string(),
                description: "run".to_string(),
                parameters: json!({"type": "object"}),
            }]),
            tool_choice: Some(ToolChoice::auto()),
            ..Request::default()
        };

        let payload = adapter(ProviderFlavor::OpenAi, "https://x").build_payload(&request);
        let messages = payload["messages"].as_array().expect("messages array");
        assert_eq!(messages[1]["content"], Value::Null);
        assert_eq!(messages[1]["tool_calls"][0]["function"]["name"], "execute_command");
        assert_eq!(
            messages[1]["tool_calls"][0]["function"]["arguments"],
            "{\"command\":\"ls\"}"
        );
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call-1");
        assert_eq!(payload["tools"][0]["type"], "function");
        assert_eq!(payload["tool_choice"], "auto");
    }

    #[test]
    fn response_parsing_keeps_raw_arguments_and_usage() {
        let data = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "a", "type": "function", "function": {"name": "read_file", "arguments": "{\"path\":\"x\"}"}},
                        {"id": "b", "type": "function", "function": {"name": "read_file", "arguments": "{not json"}}
                    ]
                }
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
        });

        let response = adapter(ProviderFlavor::OpenAi, "https://x")
            .parse_response(data)
            .expect("response should parse");
        let calls = response.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments["path"], "x");
        assert_eq!(calls[1].arguments, Value::Null);
        assert_eq!(calls[1].raw_arguments.as_deref(), Some("{not json"));
        assert_eq!(response.text(), "");
        assert_eq!(response.finish_reason.reason, "tool_calls");
        assert_eq!(response.usage.total_tokens, 12);
    }

    #[test]
    fn response_without_choices_is_invalid() {
        let error = adapter(ProviderFlavor::OpenAi, "https://x")
            .parse_response(json!({"choices": []}))
            .unwrap_err();
        assert!(matches!(error, SDKError::InvalidResponse(_)));
    }
}
