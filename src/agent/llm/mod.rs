//! LLM client abstraction layer.
//!
//! This module provides:
//! - [`LlmClient`], the seam the agent loop talks to
//! - [`ProviderClient`], a closed set of providers (Ollama, OpenRouter,
//!   Hugging Face) with per-attempt timeouts and retry on transient errors
//! - Streaming via [`ReplyStream`]
//!
//! # Adding a New Provider
//!
//! 1. Create a new file (e.g., `groq.rs`) with `new`, `chat` and `open_stream`
//! 2. Add a [`ProviderKind`] variant in `config.rs`
//! 3. Add a [`ProviderClient`] variant and wire it in the `match`es below

mod http;
pub mod huggingface;
pub mod ollama;
pub mod openrouter;
mod retry;
mod stream;
mod types;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::message::{Message, ToolCall};
use crate::config::{ConfigProvider, ProviderConfig, ProviderKind};
use crate::error::ProviderError;
use crate::tools::ToolSpec;

pub use huggingface::HuggingFaceClient;
pub use ollama::OllamaClient;
pub use openrouter::OpenRouterClient;
pub use retry::{with_retry, RetryPolicy};
pub use stream::{ReplyStream, StreamEvent};

/// One model response: text, tool calls, or both.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
    pub usage: Usage,
}

impl ModelReply {
    /// Create a simple text response.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        }
    }

    pub fn with_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            finish_reason: "tool_calls".to_string(),
            ..Self::text(text)
        }
    }

    /// Check if response has tool calls.
    #[inline]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// What the agent loop needs from a model.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name for logs and messages
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Send the history and tool specs, get one reply.
    async fn chat(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ModelReply, ProviderError>;

    /// Like [`chat`](Self::chat) but yields text as it arrives. Providers
    /// without streaming fall back to a single chunk.
    async fn stream(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ReplyStream, ProviderError> {
        Ok(ReplyStream::from_reply(self.chat(messages, tools).await?))
    }
}

/// The configured provider
pub enum ProviderClient {
    Ollama(OllamaClient),
    OpenRouter(OpenRouterClient),
    HuggingFace(HuggingFaceClient),
}

impl ProviderClient {
    /// Build the client for `config.kind`. Fails with `Auth` if a hosted
    /// provider has no API key.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        Ok(match config.kind {
            ProviderKind::Ollama => Self::Ollama(OllamaClient::new(config)?),
            ProviderKind::OpenRouter => Self::OpenRouter(OpenRouterClient::new(config)?),
            ProviderKind::HuggingFace => Self::HuggingFace(HuggingFaceClient::new(config)?),
        })
    }

    pub fn from_config_provider(source: &dyn ConfigProvider) -> crate::Result<Self> {
        Ok(Self::new(source.get()?)?)
    }

    pub fn config(&self) -> &ProviderConfig {
        match self {
            Self::Ollama(c) => c.config(),
            Self::OpenRouter(c) => c.config(),
            Self::HuggingFace(c) => c.config(),
        }
    }

    async fn attempt_chat(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ModelReply, ProviderError> {
        let limit = self.config().timeout;
        let call = async {
            match self {
                Self::Ollama(c) => c.chat(messages, tools).await,
                Self::OpenRouter(c) => c.chat(messages, tools).await,
                Self::HuggingFace(c) => c.chat(messages, tools).await,
            }
        };
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| ProviderError::timeout(self.name(), limit))?
    }

    async fn attempt_stream(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ReplyStream, ProviderError> {
        let limit = self.config().timeout;
        let open = async {
            match self {
                Self::Ollama(c) => c.open_stream(messages, tools).await,
                Self::OpenRouter(c) => c.open_stream(messages, tools).await,
                Self::HuggingFace(c) => c.open_stream(messages, tools).await,
            }
        };
        tokio::time::timeout(limit, open)
            .await
            .map_err(|_| ProviderError::timeout(self.name(), limit))?
    }
}

#[async_trait]
impl LlmClient for ProviderClient {
    fn name(&self) -> &str {
        self.config().kind.as_str()
    }

    fn model(&self) -> &str {
        &self.config().model
    }

    async fn chat(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ModelReply, ProviderError> {
        with_retry(&self.config().retry, || self.attempt_chat(messages, tools)).await
    }

    /// Only opening the stream is retried; a stream that breaks midway is
    /// reported as an error.
    async fn stream(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ReplyStream, ProviderError> {
        with_retry(&self.config().retry, || self.attempt_stream(messages, tools)).await
    }
}

/// Fake LLM client for testing.
#[cfg(test)]
pub struct FakeLlmClient {
    script: std::sync::Mutex<std::collections::VecDeque<Result<ModelReply, ProviderError>>>,
    seen: std::sync::Mutex<Vec<Vec<Message>>>,
    hang: bool,
}

#[cfg(test)]
impl FakeLlmClient {
    /// Create with predefined text responses.
    pub fn new(responses: Vec<&str>) -> Self {
        Self::scripted(responses.into_iter().map(|s| Ok(ModelReply::text(s))).collect())
    }

    /// Replies (or errors) in order.
    pub fn scripted(script: Vec<Result<ModelReply, ProviderError>>) -> Self {
        Self {
            script: std::sync::Mutex::new(script.into()),
            seen: std::sync::Mutex::new(Vec::new()),
            hang: false,
        }
    }

    /// Create with a single tool call followed by a text response.
    pub fn with_tool_call(name: &str, args: serde_json::Value, final_response: &str) -> Self {
        Self::scripted(vec![
            Ok(ModelReply::with_tool_calls("", vec![ToolCall::new("call_1", name, args)])),
            Ok(ModelReply::text(final_response)),
        ])
    }

    /// Never answers; for cancellation tests.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::scripted(Vec::new())
        }
    }

    /// How many times `chat` was called.
    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// History passed on the `n`th call.
    pub fn messages_at(&self, n: usize) -> Vec<Message> {
        self.seen.lock().unwrap()[n].clone()
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for FakeLlmClient {
    fn name(&self) -> &str {
        "fake"
    }

    fn model(&self) -> &str {
        "fake-model"
    }

    async fn chat(&self, messages: &[Message], _tools: &[ToolSpec]) -> Result<ModelReply, ProviderError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(ProviderError::decode("fake", "script exhausted"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_usage_add() {
        let mut total = Usage::default();
        total.add(Usage::new(10, 5));
        total.add(Usage::new(1, 1));
        assert_eq!(total, Usage { prompt_tokens: 11, completion_tokens: 6, total_tokens: 17 });
    }

    #[test]
    fn test_missing_key_is_auth_error() {
        let config = ProviderConfig {
            api_key: None,
            ..ProviderConfig::for_kind(ProviderKind::OpenRouter)
        };
        let err = ProviderClient::new(config).err().unwrap();
        assert_eq!(err.kind, crate::error::ProviderErrorKind::Auth);
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let client = ProviderClient::new(ProviderConfig::for_kind(ProviderKind::Ollama)).unwrap();
        assert_eq!(client.name(), "ollama");
        assert_eq!(client.model(), "qwen2.5-coder:7b");
        assert_eq!(client.config().timeout, Duration::from_secs(120));
    }
}
