//! Hugging Face - OpenAI-compatible router without native tool calling
//!
//! Tools are described in the system prompt and the model answers with
//! fenced ```` ```tool_call ```` blocks holding `{"name": .., "arguments": ..}`.
//! Those blocks are parsed out of the reply text and stripped from it.

use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::http::{build_client, read_json, send};
use super::stream::{sse_reply_stream, ReplyStream};
use super::types::{reply_from_response, synthesize_call_id, ChatRequest, ChatResponse, WireMessage};
use super::ModelReply;
use crate::agent::message::{Message, Role, ToolCall};
use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::tools::ToolSpec;

const NAME: &str = "huggingface";
const MAX_TOKENS: u32 = 4096;
const FENCE: &str = "```tool_call";

fn tool_call_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)```tool_call\s*\n?(\{.*?\})\s*\n?```").ok())
        .as_ref()
}

/// Pull tool-call blocks out of `text`. Returns the remaining text and the calls.
pub fn extract_tool_calls(text: &str) -> (String, Vec<ToolCall>) {
    let Some(pattern) = tool_call_pattern() else {
        return (text.trim().to_string(), Vec::new());
    };
    let mut calls = Vec::new();
    for capture in pattern.captures_iter(text) {
        let raw = &capture[1];
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => {
                let Some(name) = value.get("name").and_then(Value::as_str) else {
                    warn!(provider = NAME, block = raw, "tool_call block without a name");
                    continue;
                };
                let arguments = value.get("arguments").cloned().unwrap_or_else(|| json!({}));
                calls.push(ToolCall::new(synthesize_call_id(), name, arguments));
            }
            Err(e) => warn!(provider = NAME, error = %e, "unparseable tool_call block"),
        }
    }
    let cleaned = pattern.replace_all(text, "").trim().to_string();
    (cleaned, calls)
}

fn finish_with_extracted_calls(mut reply: ModelReply) -> ModelReply {
    let (text, calls) = extract_tool_calls(&reply.text);
    if !calls.is_empty() {
        reply.finish_reason = "tool_calls".to_string();
    }
    reply.text = text;
    reply.tool_calls = calls;
    reply
}

/// Streamed text is shown until a tool_call fence opens; from there on it is
/// withheld. A trailing partial fence is held until the next fragment decides it.
#[derive(Debug, Default)]
struct FenceGuard {
    pending: String,
    inside: bool,
}

impl FenceGuard {
    fn push(&mut self, chunk: &str) -> String {
        if self.inside {
            return String::new();
        }
        self.pending.push_str(chunk);
        if let Some(pos) = self.pending.find(FENCE) {
            self.inside = true;
            let shown = self.pending[..pos].to_string();
            self.pending.clear();
            return shown;
        }
        let len = self.pending.len();
        let keep = (1..FENCE.len())
            .rev()
            .find(|&n| {
                n <= len && self.pending.is_char_boundary(len - n) && FENCE.starts_with(&self.pending[len - n..])
            })
            .unwrap_or(0);
        self.pending.drain(..len - keep).collect()
    }

    fn finish(&mut self) -> String {
        if self.inside {
            String::new()
        } else {
            std::mem::take(&mut self.pending)
        }
    }
}

fn tools_prompt(tools: &[ToolSpec]) -> String {
    let mut out = String::from(
        "You have access to the following tools. To use a tool, respond with a block in exactly this format:\n\n\
         ```tool_call\n{\"name\": \"tool_name\", \"arguments\": {\"arg1\": \"value1\"}}\n```\n\n\
         You may emit several blocks to call several tools. Available tools:\n",
    );
    for tool in tools {
        let schema = serde_json::to_string_pretty(&tool.json_schema()).unwrap_or_default();
        let _ = write!(
            out,
            "\n### {}\n{}\n\nParameters:\n```json\n{}\n```\n",
            tool.name, tool.description, schema
        );
    }
    out.push_str(
        "\nWhen you need a tool, output the tool_call block and nothing after it. \
         The result comes back in the next user message.",
    );
    out
}

/// Render the history for a model that only understands text.
fn prompt_messages(messages: &[Message], tools: &[ToolSpec]) -> Vec<WireMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    let tool_text = (!tools.is_empty()).then(|| tools_prompt(tools));
    let mut injected = false;

    for message in messages {
        match message.role {
            Role::System => {
                let content = match (&tool_text, injected) {
                    (Some(tt), false) => format!("{}\n\n{tt}", message.content),
                    _ => message.content.clone(),
                };
                injected = true;
                out.push(WireMessage::text("system", content));
            }
            Role::User => out.push(WireMessage::text("user", &message.content)),
            Role::Assistant => {
                let mut content = message.content.clone();
                for call in &message.tool_calls {
                    let block = json!({"name": call.name, "arguments": call.arguments});
                    let _ = write!(content, "\n```tool_call\n{block}\n```");
                }
                out.push(WireMessage::text("assistant", content.trim_start()));
            }
            Role::Tool => {
                let id = message.tool_call_id().unwrap_or("unknown");
                out.push(WireMessage::text(
                    "user",
                    format!("Tool result ({id}):\n{}", message.content),
                ));
            }
        }
    }
    if let (Some(tt), false) = (tool_text, injected) {
        out.insert(0, WireMessage::text("system", tt));
    }
    out
}

pub struct HuggingFaceClient {
    config: ProviderConfig,
    api_key: String,
    http: reqwest::Client,
}

impl HuggingFaceClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::new(
                    ProviderErrorKind::Auth,
                    NAME,
                    "API token required. Get one at https://huggingface.co/settings/tokens",
                )
            })?;
        Ok(Self {
            http: build_client(NAME)?,
            api_key,
            config,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn request(&self, messages: &[Message], tools: &[ToolSpec], stream: bool) -> reqwest::RequestBuilder {
        let body = ChatRequest {
            model: &self.config.model,
            messages: prompt_messages(messages, tools),
            tools: Vec::new(),
            stream,
            max_tokens: Some(MAX_TOKENS),
        };
        self.http
            .post(format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body)
    }

    pub async fn chat(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ModelReply, ProviderError> {
        debug!(provider = NAME, model = %self.config.model, messages = messages.len(), "chat request");
        let response = send(NAME, self.request(messages, tools, false)).await?;
        let body: ChatResponse = read_json(NAME, response).await?;
        Ok(finish_with_extracted_calls(reply_from_response(NAME, body)?))
    }

    pub async fn open_stream(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ReplyStream, ProviderError> {
        debug!(provider = NAME, model = %self.config.model, "stream request");
        let response = send(NAME, self.request(messages, tools, true)).await?;
        let mut guard = FenceGuard::default();
        Ok(
            sse_reply_stream(response, NAME, self.config.timeout, finish_with_extracted_calls).filter_text(
                move |chunk| match chunk {
                    Some(text) => guard.push(text),
                    None => guard.finish(),
                },
            ),
        )
    }
}
