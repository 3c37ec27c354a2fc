//! LLM backend abstraction
//!
//! Backends stream chat completions as incremental content deltas.
//! Supports OpenAI-compatible APIs and Anthropic Claude.

use agora_core::{Message, Role};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
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

    #[error("Stream interrupted: {0}")]
    Stream(String),

    #[error("Empty response")]
    EmptyResponse,
}

/// Incremental content deltas of one completion, never empty strings
pub type ChatStream = BoxStream<'static, Result<String, LlmError>>;

/// Generic streaming LLM backend
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Open a streaming completion over an ordered message context
    async fn stream_chat(&self, messages: &[Message]) -> Result<ChatStream, LlmError>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible backend configuration
#[derive(Debug, Clone)]
pub struct OpenAIBackendConfig {
    /// API key
    pub api_key: String,
    /// Base URL (for ModelScope, OpenRouter, local servers, etc.)
    pub base_url: Option<String>,
    /// Model name
    pub model: String,
    /// Temperature (0.0 - 2.0)
    pub temperature: f32,
    /// Max tokens
    pub max_tokens: u16,
}

impl Default for OpenAIBackendConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
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
        Self::compatible("https://openrouter.ai/api/v1", api_key, model)
    }

    pub fn local(base_url: &str, model: &str) -> Self {
        Self::compatible(base_url, "sk-local", model)
    }

    /// Any OpenAI-compatible endpoint
    pub fn compatible(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: Some(base_url.to_string()),
            model: model.to_string(),
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
        if config.model.trim().is_empty() {
            return Err(LlmError::Config("model name is empty".to_string()));
        }

        let mut openai_config = OpenAIConfig::new().with_api_key(&config.api_key);

        if let Some(base_url) = &config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        let client = Client::with_config(openai_config);

        Ok(Self { client, config })
    }
}

fn to_openai_messages(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
    messages
        .iter()
        .map(|message| {
            let converted = match message.role {
                Role::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(message.content.as_str())
                        .build()
                        .map_err(|e| LlmError::Api(e.to_string()))?,
                ),
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(message.content.as_str())
                        .build()
                        .map_err(|e| LlmError::Api(e.to_string()))?,
                ),
                Role::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(message.content.as_str())
                        .build()
                        .map_err(|e| LlmError::Api(e.to_string()))?,
                ),
            };
            Ok(converted)
        })
        .collect()
}

#[async_trait]
impl LlmBackend for OpenAIBackend {
    async fn stream_chat(&self, messages: &[Message]) -> Result<ChatStream, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .messages(to_openai_messages(messages)?)
            .temperature(self.config.temperature)
            .max_tokens(self.config.max_tokens)
            .build()
            .map_err(|e| LlmError::Api(e.to_string()))?;

        debug!(
            "Opening {} stream with {} messages",
            self.config.model,
            messages.len()
        );

        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;

        let deltas = stream.filter_map(|item| async move {
            match item {
                Ok(response) => response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .filter(|content| !content.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(LlmError::Stream(e.to_string()))),
            }
        });

        Ok(deltas.boxed())
    }

    fn model_name(&self) -> &str {
        &self.config.model
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
        if config.api_key.trim().is_empty() {
            return Err(LlmError::Config("Anthropic API key is empty".to_string()));
        }
        let client = reqwest::Client::new();
        Ok(Self { client, config })
    }

    fn request_body(&self, messages: &[Message]) -> serde_json::Value {
        let system = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let turns: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": system,
            "messages": turns,
            "stream": true
        })
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn stream_chat(&self, messages: &[Message]) -> Result<ChatStream, LlmError> {
        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&self.request_body(messages))
            .send()
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("Anthropic API error {}: {}", status, text)));
        }

        let mut decoder = SseDecoder::default();
        let deltas = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder
                    .push(&bytes)
                    .iter()
                    .filter_map(|data| parse_anthropic_event(data))
                    .collect::<Vec<_>>(),
                Err(e) => vec![Err(LlmError::Stream(e.to_string()))],
            })
            .flat_map(stream::iter);

        Ok(deltas.boxed())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Splits a server-sent-events byte stream into `data` payloads
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        normalize_line_endings(&mut self.buffer);

        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let event: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let text = String::from_utf8_lossy(&event);
            let data: Vec<&str> = text
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(str::trim_start)
                .collect();
            if !data.is_empty() {
                payloads.push(data.join("\n"));
            }
        }
        payloads
    }
}

/// Rewrite `\r\n` as `\n`; a trailing `\r` waits for the next chunk
fn normalize_line_endings(buffer: &mut Vec<u8>) {
    if !buffer.windows(2).any(|w| w == b"\r\n") {
        return;
    }

    let mut normalized = Vec::with_capacity(buffer.len());
    let mut bytes = buffer.iter().copied().peekable();
    while let Some(byte) = bytes.next() {
        if byte == b'\r' && bytes.peek() == Some(&b'\n') {
            continue;
        }
        normalized.push(byte);
    }
    *buffer = normalized;
}

/// Map one Anthropic stream event to a content delta, if it carries one
fn parse_anthropic_event(data: &str) -> Option<Result<String, LlmError>> {
    let json: serde_json::Value = match serde_json::from_str(data) {
        Ok(json) => json,
        Err(e) => return Some(Err(LlmError::Stream(e.to_string()))),
    };

    match json["type"].as_str() {
        Some("content_block_delta") => json["delta"]["text"]
            .as_str()
            .filter(|text| !text.is_empty())
            .map(|text| Ok(text.to_string())),
        Some("error") => Some(Err(LlmError::Api(
            json["error"]["message"]
                .as_str()
                .unwrap_or("unknown stream error")
                .to_string(),
        ))),
        _ => None,
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
    fn test_openai_message_roles() {
        let messages = vec![
            Message::system("persona"),
            Message::user("hello"),
            Message::assistant("hi"),
        ];

        let converted = to_openai_messages(&messages).unwrap();
        assert_eq!(converted.len(), 3);
        assert!(matches!(converted[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(converted[1], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(converted[2], ChatCompletionRequestMessage::Assistant(_)));
    }

    #[test]
    fn test_empty_model_rejected() {
        let result = OpenAIBackend::new(OpenAIBackendConfig::local("http://localhost:8080/v1", " "));
        assert!(matches!(result, Err(LlmError::Config(_))));
    }

    #[test]
    fn test_compatible_config() {
        let config = OpenAIBackendConfig::compatible("https://api.example.com/v1", "key", "qwen");
        assert_eq!(config.base_url.as_deref(), Some("https://api.example.com/v1"));
        assert_eq!(config.model, "qwen");
    }

    #[test]
    fn test_anthropic_body_lifts_system() {
        let backend = AnthropicBackend::new(AnthropicConfig::new("key", "claude")).unwrap();
        let body = backend.request_body(&[Message::system("persona"), Message::user("hello")]);

        assert_eq!(body["system"], "persona");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_sse_decoder_handles_split_events() {
        let mut decoder = SseDecoder::default();

        assert!(decoder.push(b"event: content_block_delta\ndata: {\"a\"").is_empty());
        let payloads = decoder.push(b":1}\n\ndata: {\"b\":2}\n\n");

        assert_eq!(payloads, vec![r#"{"a":1}"#.to_string(), r#"{"b":2}"#.to_string()]);
    }

    #[test]
    fn test_sse_decoder_handles_crlf() {
        let mut decoder = SseDecoder::default();

        assert!(decoder.push(b"event: ping\r\ndata: {\"a\":1}\r").is_empty());
        let payloads = decoder.push(b"\n\r\ndata: {\"b\":2}\r\n\r\n");

        assert_eq!(payloads, vec![r#"{"a":1}"#.to_string(), r#"{"b":2}"#.to_string()]);
    }

    #[test]
    fn test_parse_anthropic_events() {
        let delta = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#;
        assert_eq!(parse_anthropic_event(delta).unwrap().unwrap(), "Hello");

        assert!(parse_anthropic_event(r#"{"type":"message_stop"}"#).is_none());

        let error = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert!(matches!(parse_anthropic_event(error), Some(Err(LlmError::Api(m))) if m == "Overloaded"));
    }
}
