//! Ollama - local models over the native `/api/chat` endpoint
//!
//! Tool calls are native. Arguments may arrive as an object or as a JSON
//! string, and calls carry no id, so one is synthesized.

use std::collections::HashMap;

use futures_util::stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::http::{build_client, read_json, send};
use super::stream::{LineReader, ReplyStream, StreamEvent};
use super::types::{parse_arguments, synthesize_call_id, wire_tools};
use super::{ModelReply, Usage};
use crate::agent::message::{Message, Role, ToolCall};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::tools::ToolSpec;

const NAME: &str = "ollama";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
    prompt_eval_count: Option<usize>,
    eval_count: Option<usize>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<NativeCall>,
}

#[derive(Debug, Deserialize)]
struct NativeCall {
    function: NativeFunction,
}

#[derive(Debug, Deserialize)]
struct NativeFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl NativeCall {
    fn into_tool_call(self) -> ToolCall {
        let arguments = match self.function.arguments {
            Value::String(raw) => parse_arguments(&raw),
            Value::Null => json!({}),
            other => other,
        };
        ToolCall::new(synthesize_call_id(), self.function.name, arguments)
    }
}

/// A model installed on the local server
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocalModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<LocalModel>,
}

/// One progress line from `/api/pull`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullProgress {
    #[serde(default)]
    pub status: String,
    pub completed: Option<u64>,
    pub total: Option<u64>,
    pub error: Option<String>,
}

pub struct OllamaClient {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            http: build_client(NAME)?,
            config,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.endpoint.trim_end_matches('/'))
    }

    fn request_body<'a>(&'a self, messages: &[Message], tools: &[ToolSpec], stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: native_messages(messages),
            tools: wire_tools(tools),
            stream,
        }
    }

    pub async fn chat(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ModelReply, ProviderError> {
        debug!(provider = NAME, model = %self.config.model, messages = messages.len(), "chat request");
        let request = self
            .http
            .post(self.url("/api/chat"))
            .json(&self.request_body(messages, tools, false));
        let chunk: ChatChunk = read_json(NAME, send(NAME, request).await?).await?;
        if let Some(error) = chunk.error {
            return Err(ProviderError::decode(NAME, error));
        }
        let usage = Usage::new(
            chunk.prompt_eval_count.unwrap_or(0),
            chunk.eval_count.unwrap_or(0),
        );
        let message = chunk.message.unwrap_or_default();
        let tool_calls: Vec<ToolCall> = message
            .tool_calls
            .into_iter()
            .map(NativeCall::into_tool_call)
            .collect();
        Ok(ModelReply {
            finish_reason: finish_reason(chunk.done_reason, !tool_calls.is_empty()),
            text: message.content,
            tool_calls,
            usage,
        })
    }

    pub async fn open_stream(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ReplyStream, ProviderError> {
        debug!(provider = NAME, model = %self.config.model, "stream request");
        let request = self
            .http
            .post(self.url("/api/chat"))
            .json(&self.request_body(messages, tools, true));
        let response = send(NAME, request).await?;
        let reader = LineReader::new(response, NAME, self.config.timeout);

        struct State {
            reader: LineReader,
            reply: Option<ModelReply>,
        }
        let state = State {
            reader,
            reply: Some(ModelReply::text("")),
        };

        Ok(ReplyStream::new(stream::unfold(state, |mut st| async move {
            st.reply.as_ref()?;
            loop {
                let line = match st.reader.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        st.reply = None;
                        return Some((Err(err), st));
                    }
                };
                let chunk: ChatChunk = match serde_json::from_str(&line) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        st.reply = None;
                        return Some((Err(ProviderError::decode(NAME, format!("bad stream line: {e}"))), st));
                    }
                };
                if let Some(error) = chunk.error {
                    st.reply = None;
                    return Some((Err(ProviderError::decode(NAME, error)), st));
                }
                let reply = st.reply.as_mut()?;
                let message = chunk.message.unwrap_or_default();
                reply
                    .tool_calls
                    .extend(message.tool_calls.into_iter().map(NativeCall::into_tool_call));
                if chunk.done {
                    reply.usage = Usage::new(
                        chunk.prompt_eval_count.unwrap_or(0),
                        chunk.eval_count.unwrap_or(0),
                    );
                    reply.finish_reason = finish_reason(chunk.done_reason, reply.has_tool_calls());
                }
                if !message.content.is_empty() {
                    reply.text.push_str(&message.content);
                    return Some((Ok(StreamEvent::Text(message.content)), st));
                }
                if chunk.done {
                    break;
                }
            }
            let reply = st.reply.take()?;
            Some((Ok(StreamEvent::Done(reply)), st))
        })))
    }

    /// Models installed on the server (`GET /api/tags`).
    pub async fn list_models(&self) -> Result<Vec<LocalModel>, ProviderError> {
        let request = self.http.get(self.url("/api/tags"));
        let call = async { read_json::<TagsResponse>(NAME, send(NAME, request).await?).await };
        let tags = tokio::time::timeout(self.config.timeout, call)
            .await
            .map_err(|_| ProviderError::timeout(NAME, self.config.timeout))??;
        Ok(tags.models)
    }

    /// Download a model, reporting each progress line.
    pub async fn pull(&self, model: &str, mut on_progress: impl FnMut(&PullProgress)) -> Result<(), ProviderError> {
        let request = self
            .http
            .post(self.url("/api/pull"))
            .json(&json!({"model": model, "stream": true}));
        let response = tokio::time::timeout(self.config.timeout, send(NAME, request))
            .await
            .map_err(|_| ProviderError::timeout(NAME, self.config.timeout))??;
        let mut reader = LineReader::new(response, NAME, self.config.timeout);
        while let Some(line) = reader.next_line().await? {
            let progress: PullProgress = serde_json::from_str(&line)
                .map_err(|e| ProviderError::decode(NAME, format!("bad progress line: {e}")))?;
            if let Some(error) = &progress.error {
                return Err(ProviderError::new(crate::error::ProviderErrorKind::BadRequest, NAME, error.clone()));
            }
            on_progress(&progress);
        }
        Ok(())
    }
}

fn finish_reason(done_reason: Option<String>, has_tools: bool) -> String {
    if has_tools {
        return "tool_calls".to_string();
    }
    done_reason.unwrap_or_else(|| "stop".to_string())
}

/// History in Ollama's native shape. Tool results carry the tool name,
/// looked up from the call they answer.
fn native_messages(messages: &[Message]) -> Vec<Value> {
    let mut names: HashMap<&str, &str> = HashMap::new();
    messages
        .iter()
        .map(|m| match m.role {
            Role::System => json!({"role": "system", "content": m.content}),
            Role::User => json!({"role": "user", "content": m.content}),
            Role::Assistant => {
                let mut value = json!({"role": "assistant", "content": m.content});
                if !m.tool_calls.is_empty() {
                    for call in &m.tool_calls {
                        names.insert(&call.id, &call.name);
                    }
                    value["tool_calls"] = m
                        .tool_calls
                        .iter()
                        .map(|c| json!({"function": {"name": c.name, "arguments": c.arguments}}))
                        .collect();
                }
                value
            }
            Role::Tool => {
                let mut value = json!({"role": "tool", "content": m.content});
                if let Some(name) = m.tool_call_id().and_then(|id| names.get(id)) {
                    value["tool_name"] = json!(name);
                }
                value
            }
        })
        .collect()
}
