//! Shared wire types for OpenAI-compatible chat endpoints.
//!
//! OpenRouter speaks this dialect with native tool calling; the Hugging Face
//! router speaks it without tools (see `huggingface.rs`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ModelReply, Usage};
use crate::agent::message::{Message, Role, ToolCall};
use crate::error::ProviderError;
use crate::tools::ToolSpec;

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl WireMessage {
    pub fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    pub function: WireFunction,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireFunction {
    pub name: String,
    /// JSON-encoded argument object.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: WireMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct WireUsage {
    #[serde(default)]
    pub prompt_tokens: usize,
    #[serde(default)]
    pub completion_tokens: usize,
    #[serde(default)]
    pub total_tokens: usize,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Usage::new(u.prompt_tokens, u.completion_tokens)
    }
}

/// One `data:` payload of a streamed completion.
#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: u32,
    pub id: Option<String>,
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
pub struct FunctionDelta {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Parse a JSON-encoded argument string.
///
/// Empty means no arguments. Unparseable text is kept as a string so the
/// executor rejects it as invalid arguments and the model can correct itself.
pub fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Call id for providers that omit one.
pub fn synthesize_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Tool definitions in the `{"type": "function", ...}` shape.
pub fn wire_tools(tools: &[ToolSpec]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.json_schema(),
                }
            })
        })
        .collect()
}

/// History with native tool messages.
pub fn wire_messages(messages: &[Message]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|m| match m.role {
            Role::System => WireMessage::text("system", &m.content),
            Role::User => WireMessage::text("user", &m.content),
            Role::Assistant if m.tool_calls.is_empty() => WireMessage::text("assistant", &m.content),
            Role::Assistant => WireMessage {
                role: "assistant".to_string(),
                content: (!m.content.is_empty()).then(|| m.content.clone()),
                tool_calls: Some(
                    m.tool_calls
                        .iter()
                        .map(|c| WireToolCall {
                            id: c.id.clone(),
                            kind: function_type(),
                            function: WireFunction {
                                name: c.name.clone(),
                                arguments: c.arguments.to_string(),
                            },
                        })
                        .collect(),
                ),
                tool_call_id: None,
            },
            Role::Tool => WireMessage {
                tool_call_id: m.tool_call_id().map(str::to_string),
                ..WireMessage::text("tool", &m.content)
            },
        })
        .collect()
}

/// Convert a non-streamed response.
pub fn reply_from_response(provider: &str, response: ChatResponse) -> Result<ModelReply, ProviderError> {
    let usage = response.usage.map(Usage::from).unwrap_or_default();
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::decode(provider, "response contained no choices"))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| {
            let id = if c.id.is_empty() { synthesize_call_id() } else { c.id };
            ToolCall::new(id, c.function.name, parse_arguments(&c.function.arguments))
        })
        .collect();

    Ok(ModelReply {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
        usage,
    })
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Folds streamed deltas into a complete reply.
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    text: String,
    calls: BTreeMap<u32, PartialCall>,
    finish_reason: Option<String>,
    usage: Usage,
}

impl DeltaAccumulator {
    /// Absorb one chunk; returns the text it carried, if any.
    pub fn push(&mut self, chunk: StreamChunk) -> Option<String> {
        if let Some(usage) = chunk.usage {
            self.usage = usage.into();
        }
        let mut text = String::new();
        for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
            if let Some(content) = choice.delta.content {
                text.push_str(&content);
            }
            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let entry = self.calls.entry(delta.index).or_default();
                if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
                    entry.id = Some(id);
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(args) = function.arguments {
                        entry.arguments.push_str(&args);
                    }
                }
            }
        }
        self.text.push_str(&text);
        (!text.is_empty()).then_some(text)
    }

    pub fn finish(self) -> ModelReply {
        let tool_calls = self
            .calls
            .into_values()
            .filter(|c| !c.name.is_empty())
            .map(|c| {
                ToolCall::new(
                    c.id.unwrap_or_else(synthesize_call_id),
                    c.name,
                    parse_arguments(&c.arguments),
                )
            })
            .collect();
        ModelReply {
            text: self.text,
            tool_calls,
            finish_reason: self.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message::ToolResult;

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_arguments("{oops"), Value::String("{oops".into()));
    }

    #[test]
    fn test_wire_messages_roundtrip_tool_ids() {
        let messages = vec![
            Message::system("sys"),
            Message::user("list"),
            Message::assistant_with_tools("", vec![ToolCall::new("c1", "ls", json!({"path": "."}))]),
            Message::tool_result(ToolResult::ok("c1", "a.txt")),
        ];
        let wire = wire_messages(&messages);
        assert_eq!(wire[2].content, None);
        let calls = wire[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].function.arguments, r#"{"path":"."}"#);
        assert_eq!(wire[3].role, "tool");
        assert_eq!(wire[3].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_reply_from_response() {
        let body = r#"{
            "choices": [{
                "message": {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "ls", "arguments": "{\"path\":\"src\"}"}}
                ]},
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let response: ChatResponse = serde_json::from_str(body).unwrap();
        let reply = reply_from_response("openrouter", response).unwrap();
        assert_eq!(reply.tool_calls[0].id, "call_1");
        assert_eq!(reply.tool_calls[0].arguments, json!({"path": "src"}));
        assert_eq!(reply.usage.total_tokens, 15);
        assert_eq!(reply.finish_reason, "tool_calls");
    }

    #[test]
    fn test_empty_choices_is_decode_error() {
        let response: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        let err = reply_from_response("x", response).unwrap_err();
        assert_eq!(err.kind, crate::error::ProviderErrorKind::Decode);
    }

    #[test]
    fn test_accumulator_joins_fragments() {
        let mut acc = DeltaAccumulator::default();
        let chunks = [
            r#"{"choices":[{"delta":{"content":"Let me look"}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c9","function":{"name":"read_","arguments":"{\"pa"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":"file","arguments":"th\":\"a\"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":3,"completion_tokens":4,"total_tokens":7}}"#,
        ];
        let mut texts = Vec::new();
        for raw in chunks {
            if let Some(t) = acc.push(serde_json::from_str(raw).unwrap()) {
                texts.push(t);
            }
        }
        assert_eq!(texts, vec!["Let me look"]);
        let reply = acc.finish();
        assert_eq!(reply.text, "Let me look");
        assert_eq!(reply.tool_calls, vec![ToolCall::new("c9", "read_file", json!({"path": "a"}))]);
        assert_eq!(reply.usage.total_tokens, 7);
    }
}
