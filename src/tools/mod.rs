//! Tools module - what the model can do to the workspace
//!
//! Every tool declares a [`ToolSpec`] (name, typed parameters, side effect).
//! The [`ToolRunner`] validates arguments against that spec, asks for
//! confirmation on destructive calls and caps output before anything reaches
//! the model.

mod analysis;
mod confirm;
mod edit;
mod filesystem;
mod find;
mod git;
mod output;
mod runner;
mod sandbox;
mod search;
mod shell;
mod web;

pub use analysis::{CodeStatsTool, FindSymbolTool, TreeTool};
pub use confirm::{AutoApprove, AutoDeny, ConfirmationPrompt};
pub use edit::EditFileTool;
pub use filesystem::{CopyTool, DeleteTool, ListDirTool, MkdirTool, MoveTool, ReadFileTool, WriteFileTool};
pub use find::GlobTool;
pub use git::GitTool;
pub use output::truncate_output;
pub use runner::{ToolRunner, ToolSettings};
pub use sandbox::Workspace;
pub use search::GrepTool;
pub use shell::{BashTool, DEFAULT_BLOCKED_COMMANDS};
pub use web::{HttpRequestTool, WebFetchTool};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::ToolError;

/// JSON type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn json_name(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamType,
    pub required: bool,
    pub description: &'static str,
    /// Allowed values for string enums; empty means any.
    pub choices: &'static [&'static str],
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamType, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
            choices: &[],
        }
    }

    pub const fn optional(name: &'static str, kind: ParamType, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
            choices: &[],
        }
    }

    pub const fn one_of(mut self, choices: &'static [&'static str]) -> Self {
        self.choices = choices;
        self
    }
}

/// How much a tool can change the world
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SideEffect {
    ReadOnly,
    Mutating,
    /// Needs user confirmation before running.
    Destructive,
}

/// Declared capability of a tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    pub effect: SideEffect,
}

impl ToolSpec {
    /// JSON schema for the parameters, as providers expect it.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            let mut prop = json!({
                "type": param.kind.json_name(),
                "description": param.description,
            });
            if param.kind == ParamType::Array {
                prop["items"] = json!({"type": "string"});
            }
            if !param.choices.is_empty() {
                prop["enum"] = json!(param.choices);
            }
            properties.insert(param.name.to_string(), prop);
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check arguments against the declared parameters.
    ///
    /// Unknown keys are ignored; missing required keys, wrong types and
    /// values outside an enum are rejected.
    pub fn validate(&self, args: &Value) -> Result<(), ToolError> {
        let Some(map) = args.as_object() else {
            return Err(ToolError::invalid_args(format!(
                "arguments for '{}' must be a JSON object",
                self.name
            )));
        };
        for param in &self.params {
            match map.get(param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(ToolError::invalid_args(format!(
                        "missing required parameter '{}'",
                        param.name
                    )));
                }
                None | Some(Value::Null) => {}
                Some(value) if !param.kind.accepts(value) => {
                    return Err(ToolError::invalid_args(format!(
                        "parameter '{}' must be of type {}",
                        param.name,
                        param.kind.json_name()
                    )));
                }
                Some(value) => {
                    let text = value.as_str().unwrap_or_default();
                    if !param.choices.is_empty() && !param.choices.contains(&text) {
                        return Err(ToolError::invalid_args(format!(
                            "parameter '{}' must be one of: {}",
                            param.name,
                            param.choices.join(", ")
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Validated tool arguments with typed accessors
#[derive(Debug, Clone)]
pub struct Args(Value);

impl Args {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn str(&self, key: &str) -> Result<&str, ToolError> {
        self.opt_str(key)
            .ok_or_else(|| ToolError::invalid_args(format!("missing '{key}' parameter")))
    }

    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    pub fn object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.get(key).and_then(|v| v.as_object())
    }

    pub fn strings(&self, key: &str) -> Vec<String> {
        self.get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// What a tool produced
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    /// Set by subprocess tools.
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            exit_code: None,
        }
    }

    pub fn process(text: impl Into<String>, exit_code: i32) -> Self {
        Self {
            text: text.into(),
            exit_code: Some(exit_code),
        }
    }
}

/// Tool trait - interface for all agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Declared name, parameters and side effect
    fn spec(&self) -> ToolSpec;

    /// Side effect of this particular call. Tools whose risk depends on the
    /// arguments (overwriting move, `git push`) override this.
    fn effect_for(&self, _args: &Args) -> SideEffect {
        self.spec().effect
    }

    /// Checks that need no side effects, run before any confirmation is
    /// asked. Path-taking tools resolve their paths here.
    fn preflight(&self, _args: &Args) -> Result<(), ToolError> {
        Ok(())
    }

    /// Execute the tool with validated arguments
    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ToolSpec {
        ToolSpec {
            name: "demo",
            description: "demo tool",
            params: vec![
                ParamSpec::required("path", ParamType::String, "a path"),
                ParamSpec::optional("limit", ParamType::Integer, "a limit"),
                ParamSpec::optional("mode", ParamType::String, "a mode").one_of(&["fast", "slow"]),
            ],
            effect: SideEffect::ReadOnly,
        }
    }

    #[test]
    fn test_schema_lists_required() {
        let schema = spec().json_schema();
        assert_eq!(schema["required"], json!(["path"]));
        assert_eq!(schema["properties"]["limit"]["type"], "integer");
        assert_eq!(schema["properties"]["mode"]["enum"], json!(["fast", "slow"]));
    }

    #[test]
    fn test_validate_accepts_good_args() {
        assert!(spec().validate(&json!({"path": "a", "limit": 3, "extra": true})).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_and_mistyped() {
        let err = spec().validate(&json!({})).unwrap_err();
        assert_eq!(err.kind, crate::error::ToolErrorKind::InvalidArgs);
        assert!(err.message.contains("path"));

        let err = spec().validate(&json!({"path": 5})).unwrap_err();
        assert!(err.message.contains("string"));

        let err = spec().validate(&json!({"path": "a", "mode": "medium"})).unwrap_err();
        assert!(err.message.contains("fast, slow"));
    }

    #[test]
    fn test_validate_rejects_non_object() {
        assert!(spec().validate(&json!("path=a")).is_err());
    }

    #[test]
    fn test_args_accessors() {
        let args = Args::new(json!({"path": "x", "all": true, "n": 4, "list": ["a", "b"]}));
        assert_eq!(args.str("path").unwrap(), "x");
        assert!(args.str("nope").is_err());
        assert!(args.bool_or("all", false));
        assert_eq!(args.u64_or("n", 1), 4);
        assert_eq!(args.u64_or("m", 1), 1);
        assert_eq!(args.strings("list"), vec!["a", "b"]);
    }
}
