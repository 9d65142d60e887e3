//! Language-model client.
//!
//! [`LanguageModel`] is the seam between the assistant and a chat-completion
//! service. [`OpenAIChat`] speaks the OpenAI `/chat/completions` protocol,
//! which Ollama also serves under `/v1`, so one client covers both. With
//! `stream = true` the response arrives as server-sent events; each token is
//! forwarded to an optional [`TokenSink`] and the assembled text is returned
//! as one string.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::LlmConfig;
use crate::embedding::send_with_retry;
use crate::error::ProviderError;
use crate::models::{Role, Turn};

/// Default system prompt for every conversation.
pub const SYSTEM_PROMPT: &str = "You are an AI Research Assistant. \
Provide detailed, well-structured responses and cite sources whenever you are given them. \
Use the earlier conversation for context.";

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// One message in the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A prompt plus the context it is asked in.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: String,
    /// Earlier turns, oldest first.
    pub history: Vec<Turn>,
    pub prompt: String,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: SYSTEM_PROMPT.to_string(),
            history: Vec::new(),
            prompt: prompt.into(),
        }
    }

    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }

    /// System message, then history, then the prompt as the final user message.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if !self.system.is_empty() {
            messages.push(ChatMessage::new("system", &self.system));
        }
        for turn in &self.history {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(ChatMessage::new(role, &turn.text));
        }
        messages.push(ChatMessage::new("user", &self.prompt));
        messages
    }
}

/// Receives streamed tokens as they arrive.
pub type TokenSink = Arc<dyn Fn(&str) + Send + Sync>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}

/// Always fails; used when `llm.provider = "disabled"`.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, ProviderError> {
        Err(ProviderError::Disabled {
            service: "language model",
        })
    }
}

/// OpenAI-compatible chat-completion client.
pub struct OpenAIChat {
    client: reqwest::Client,
    service: &'static str,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    stream: bool,
    timeout_secs: u64,
    sink: Option<TokenSink>,
}

impl OpenAIChat {
    /// OpenAI proper; reads `OPENAI_API_KEY`.
    pub fn openai(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| ProviderError::MissingApiKey {
            var: "OPENAI_API_KEY",
        })?;
        Self::build("openai", Some(api_key), OPENAI_BASE_URL, config)
    }

    /// A local Ollama server's OpenAI-compatible endpoint; no key.
    pub fn ollama(config: &LlmConfig) -> Result<Self> {
        Self::build("ollama", None, OLLAMA_BASE_URL, config)
    }

    fn build(
        service: &'static str,
        api_key: Option<String>,
        default_url: &str,
        config: &LlmConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            service,
            api_key,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| default_url.to_string()),
            model: config.model.clone(),
            temperature: config.temperature,
            stream: config.stream,
            timeout_secs: config.timeout_secs,
            sink: None,
        })
    }

    pub fn with_token_sink(mut self, sink: TokenSink) -> Self {
        self.sink = Some(sink);
        self
    }

    async fn read_stream(&self, response: reqwest::Response) -> Result<String, ProviderError> {
        let mut stream = Box::pin(response.bytes_stream());
        let mut buffer: Vec<u8> = Vec::new();
        let mut text = String::new();

        'outer: while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| ProviderError::from_reqwest(self.service, self.timeout_secs, e))?;
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                match parse_sse_line(self.service, &line)? {
                    Some(SseEvent::Delta(token)) => {
                        if let Some(sink) = &self.sink {
                            sink(&token);
                        }
                        text.push_str(&token);
                    }
                    Some(SseEvent::Done) => break 'outer,
                    None => {}
                }
            }
        }

        Ok(text)
    }
}

#[async_trait]
impl LanguageModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": request.messages(),
            "stream": self.stream,
        });
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        debug!(
            service = self.service,
            model = %self.model,
            history = request.history.len(),
            stream = self.stream,
            "requesting completion"
        );
        let response = send_with_retry(self.service, 0, self.timeout_secs, || {
            let req = self.client.post(&url).json(&body);
            match &self.api_key {
                Some(key) => req.bearer_auth(key),
                None => req,
            }
        })
        .await?;

        if self.stream {
            return self.read_stream(response).await;
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid(self.service, e.to_string()))?;
        parse_completion(self.service, &json)
    }
}

fn parse_completion(service: &'static str, json: &Value) -> Result<String, ProviderError> {
    json.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::invalid(service, "missing choices[0].message.content"))
}

#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Delta(String),
    Done,
}

/// Parse one server-sent-events line. Comments, blank lines and events
/// without content yield `None`.
fn parse_sse_line(service: &'static str, line: &str) -> Result<Option<SseEvent>, ProviderError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }

    let json: Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::invalid(service, format!("bad stream event: {}", e)))?;
    Ok(json
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|s| SseEvent::Delta(s.to_string())))
}

/// Create the [`LanguageModel`] named by `config.provider`. The sink only
/// receives tokens when streaming is enabled.
pub fn create_model(config: &LlmConfig, sink: Option<TokenSink>) -> Result<Box<dyn LanguageModel>> {
    let chat = match config.provider.as_str() {
        "disabled" => return Ok(Box::new(DisabledModel)),
        "openai" => OpenAIChat::openai(config)?,
        "ollama" => OpenAIChat::ollama(config)?,
        other => bail!("Unknown llm provider: {}", other),
    };
    Ok(match sink {
        Some(sink) => Box::new(chat.with_token_sink(sink)),
        None => Box::new(chat),
    })
}
