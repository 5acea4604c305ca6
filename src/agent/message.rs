//! Message types for agent communication

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ToolError, ToolErrorKind};
use crate::tools::ToolOutput;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// One-line rendering of the arguments for display.
    pub fn summary(&self) -> String {
        let Some(map) = self.arguments.as_object() else {
            return clip(&self.arguments.to_string(), 80);
        };
        map.iter()
            .map(|(key, value)| {
                let shown = match value {
                    Value::String(s) => s.replace('\n', "\\n"),
                    other => other.to_string(),
                };
                format!("{key}={}", clip(&shown, 60))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

/// Outcome of one tool call, fed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ToolResult {
    /// Successful result with plain text output
    pub fn ok(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: true,
            output: output.into(),
            error: None,
            exit_code: None,
        }
    }

    /// Result of a tool that ran to completion.
    ///
    /// Subprocesses that exit non-zero are reported as unsuccessful but keep
    /// their output, so the model sees both.
    pub fn from_output(call_id: impl Into<String>, output: ToolOutput) -> Self {
        Self {
            call_id: call_id.into(),
            success: output.exit_code.map_or(true, |code| code == 0),
            output: output.text,
            error: None,
            exit_code: output.exit_code,
        }
    }

    pub fn failure(call_id: impl Into<String>, error: ToolError) -> Self {
        Self {
            call_id: call_id.into(),
            success: false,
            output: error.message,
            error: Some(error.kind),
            exit_code: None,
        }
    }

    /// Text handed to the model for this result.
    pub fn content_for_model(&self) -> String {
        if let Some(kind) = self.error {
            return format!("Error ({kind}): {}", self.output);
        }
        match self.exit_code {
            Some(code) if code != 0 => format!("[exit code: {code}]\n{}", self.output),
            _ => self.output.clone(),
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,

    /// Tool calls made by assistant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Structured result (tool messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_result: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Create an assistant message with tool calls
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Create a tool result message
    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.content_for_model(),
            tool_calls: Vec::new(),
            tool_result: Some(result),
        }
    }

    /// Call id this message answers (tool messages only)
    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_result.as_ref().map(|r| r.call_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn test_tool_result_message_carries_call_id() {
        let msg = Message::tool_result(ToolResult::ok("call_7", "done"));
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id(), Some("call_7"));
        assert_eq!(msg.content, "done");
    }

    #[test]
    fn test_failure_content_names_kind() {
        let result = ToolResult::failure("c1", ToolError::path_escape("../x"));
        assert!(!result.success);
        assert_eq!(result.error, Some(ToolErrorKind::PathEscape));
        assert!(result.content_for_model().starts_with("Error (path outside workspace)"));
    }

    #[test]
    fn test_nonzero_exit_is_unsuccessful() {
        let result = ToolResult::from_output("c1", ToolOutput::process("boom", 2));
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(2));
        assert!(result.content_for_model().starts_with("[exit code: 2]"));
    }

    #[test]
    fn test_call_summary() {
        let call = ToolCall::new("1", "write_file", json!({"path": "a.txt", "content": "x\ny"}));
        let summary = call.summary();
        assert!(summary.contains("path=a.txt"));
        assert!(summary.contains("content=x\\ny"));
    }
}
