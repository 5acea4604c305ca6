//! Tool runner - registry and executor
//!
//! The runner never fails: whatever goes wrong becomes an unsuccessful
//! [`ToolResult`] that the model can read and react to.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::analysis::{CodeStatsTool, FindSymbolTool, TreeTool};
use super::confirm::ConfirmationPrompt;
use super::edit::EditFileTool;
use super::filesystem::{CopyTool, DeleteTool, ListDirTool, MkdirTool, MoveTool, ReadFileTool, WriteFileTool};
use super::find::GlobTool;
use super::git::GitTool;
use super::output::truncate_output;
use super::search::GrepTool;
use super::shell::{BashTool, DEFAULT_BLOCKED_COMMANDS};
use super::web::{HttpRequestTool, WebFetchTool};
use super::{Args, SideEffect, Tool, ToolSpec, Workspace};
use crate::agent::{ToolCall, ToolResult};
use crate::error::{ToolError, ToolErrorKind};

/// Knobs for the built-in tools
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub shell_timeout: Duration,
    pub blocked_commands: Vec<String>,
    pub max_output_bytes: usize,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            shell_timeout: Duration::from_secs(120),
            blocked_commands: DEFAULT_BLOCKED_COMMANDS.iter().map(|s| s.to_string()).collect(),
            max_output_bytes: 30_000,
        }
    }
}

/// Tool runner manages registered tools and executes them
pub struct ToolRunner {
    tools: BTreeMap<&'static str, Box<dyn Tool>>,
    confirm: Option<Box<dyn ConfirmationPrompt>>,
    max_output_bytes: usize,
}

impl Default for ToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRunner {
    /// Create an empty tool runner
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            confirm: None,
            max_output_bytes: ToolSettings::default().max_output_bytes,
        }
    }

    /// Create a tool runner with every built-in tool bound to `workspace`
    pub fn new_with_defaults(workspace: &Workspace, settings: &ToolSettings) -> Self {
        let mut runner = Self::new();
        runner.max_output_bytes = settings.max_output_bytes;

        runner.register(ReadFileTool::new(workspace.clone()));
        runner.register(WriteFileTool::new(workspace.clone()));
        runner.register(EditFileTool::new(workspace.clone()));
        runner.register(ListDirTool::new(workspace.clone()));
        runner.register(MkdirTool::new(workspace.clone()));
        runner.register(DeleteTool::new(workspace.clone()));
        runner.register(CopyTool::new(workspace.clone()));
        runner.register(MoveTool::new(workspace.clone()));
        runner.register(GlobTool::new(workspace.clone()));
        runner.register(GrepTool::new(workspace.clone()));
        runner.register(TreeTool::new(workspace.clone()));
        runner.register(FindSymbolTool::new(workspace.clone()));
        runner.register(CodeStatsTool::new(workspace.clone()));

        runner.register(WebFetchTool::new());
        runner.register(HttpRequestTool::new());

        runner.register(BashTool::new(
            workspace.clone(),
            settings.shell_timeout,
            settings.blocked_commands.clone(),
        ));
        runner.register(GitTool::new(workspace.clone(), settings.shell_timeout));

        runner
    }

    /// Gate destructive calls behind `prompt`. Without one they run unasked.
    pub fn with_confirmation(mut self, prompt: Box<dyn ConfirmationPrompt>) -> Self {
        self.confirm = Some(prompt);
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    /// Register a tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.spec().name, Box::new(tool));
    }

    /// Specs of every registered tool, sorted by name
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    /// Run one call end to end: lookup, validation, path checks,
    /// confirmation, execution, output capping.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.get(call.name.as_str()) else {
            warn!(tool = %call.name, "model asked for an unknown tool");
            return ToolResult::failure(
                &call.id,
                ToolError::new(
                    ToolErrorKind::UnknownTool,
                    format!(
                        "no tool named '{}'. Available: {}",
                        call.name,
                        self.tool_names().join(", ")
                    ),
                ),
            );
        };

        if let Err(err) = tool.spec().validate(&call.arguments) {
            debug!(tool = %call.name, error = %err, "rejected arguments");
            return ToolResult::failure(&call.id, err);
        }
        let args = Args::new(call.arguments.clone());
        if let Err(err) = tool.preflight(&args) {
            debug!(tool = %call.name, error = %err, "failed preflight");
            return ToolResult::failure(&call.id, err);
        }

        if tool.effect_for(&args) == SideEffect::Destructive {
            if let Some(prompt) = &self.confirm {
                if !prompt.ask(call) {
                    info!(tool = %call.name, "destructive call declined");
                    return ToolResult::failure(
                        &call.id,
                        ToolError::new(
                            ToolErrorKind::UserDeclined,
                            "the user declined this action; do not retry it, ask or choose another approach",
                        ),
                    );
                }
            }
        }

        debug!(tool = %call.name, id = %call.id, "executing tool");
        let mut result = match tool.execute(args).await {
            Ok(output) => ToolResult::from_output(&call.id, output),
            Err(err) => ToolResult::failure(&call.id, err),
        };
        result.output = truncate_output(result.output, self.max_output_bytes);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{AutoApprove, AutoDeny, ParamSpec, ParamType, ToolOutput};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Echoes `text` back; counts executions.
    struct EchoTool {
        effect: SideEffect,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo",
                description: "echo",
                params: vec![ParamSpec::required("text", ParamType::String, "text")],
                effect: self.effect,
            }
        }

        async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(ToolOutput::text(args.str("text")?))
        }
    }

    fn runner(effect: SideEffect) -> (ToolRunner, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut runner = ToolRunner::new();
        runner.register(EchoTool {
            effect,
            runs: runs.clone(),
        });
        (runner, runs)
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (runner, _) = runner(SideEffect::ReadOnly);
        let result = runner.execute(&ToolCall::new("c1", "nope", json!({}))).await;
        assert!(!result.success);
        assert_eq!(result.call_id, "c1");
        assert_eq!(result.error, Some(ToolErrorKind::UnknownTool));
        assert!(result.output.contains("echo"));
    }

    #[tokio::test]
    async fn test_invalid_args_never_execute() {
        let (runner, runs) = runner(SideEffect::ReadOnly);
        let result = runner.execute(&ToolCall::new("c1", "echo", json!({"text": 5}))).await;
        assert_eq!(result.error, Some(ToolErrorKind::InvalidArgs));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_destructive_declined() {
        let (runner, runs) = runner(SideEffect::Destructive);
        let runner = runner.with_confirmation(Box::new(AutoDeny));
        let result = runner.execute(&ToolCall::new("c1", "echo", json!({"text": "x"}))).await;
        assert_eq!(result.error, Some(ToolErrorKind::UserDeclined));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_destructive_approved() {
        let (runner, runs) = runner(SideEffect::Destructive);
        let runner = runner.with_confirmation(Box::new(AutoApprove));
        let result = runner.execute(&ToolCall::new("c1", "echo", json!({"text": "x"}))).await;
        assert!(result.success);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_readonly_skips_confirmation() {
        let (runner, _) = runner(SideEffect::ReadOnly);
        let runner = runner.with_confirmation(Box::new(AutoDeny));
        let result = runner.execute(&ToolCall::new("c1", "echo", json!({"text": "x"}))).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_output_truncated() {
        let (runner, _) = runner(SideEffect::ReadOnly);
        let runner = runner.with_max_output_bytes(10);
        let result = runner
            .execute(&ToolCall::new("c1", "echo", json!({"text": "x".repeat(50)})))
            .await;
        assert!(result.output.starts_with("xxxxxxxxxx\n"));
        assert!(result.output.contains("40 bytes omitted"));
    }

    #[tokio::test]
    async fn test_defaults_register_all_tools() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path()).unwrap();
        let runner = ToolRunner::new_with_defaults(&ws, &ToolSettings::default());
        assert_eq!(
            runner.tool_names(),
            vec![
                "bash",
                "code_stats",
                "copy",
                "delete",
                "edit_file",
                "find_symbol",
                "git",
                "glob",
                "grep",
                "http_request",
                "ls",
                "mkdir",
                "move",
                "read_file",
                "tree",
                "web_fetch",
                "write_file",
            ]
        );
    }

    /// Counts how often it was asked; always declines.
    struct CountingPrompt(Arc<AtomicUsize>);

    impl ConfirmationPrompt for CountingPrompt {
        fn ask(&self, _call: &ToolCall) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    #[tokio::test]
    async fn test_escaping_path_rejected_before_prompt() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("ws")).unwrap();
        std::fs::write(tmp.path().join("outside.txt"), "x").unwrap();
        let ws = Workspace::new(tmp.path().join("ws")).unwrap();
        let asked = Arc::new(AtomicUsize::new(0));
        let runner = ToolRunner::new_with_defaults(&ws, &ToolSettings::default())
            .with_confirmation(Box::new(CountingPrompt(asked.clone())));

        let result = runner
            .execute(&ToolCall::new("d1", "delete", json!({"path": "../outside.txt"})))
            .await;
        assert_eq!(result.error, Some(ToolErrorKind::PathEscape));
        assert_eq!(asked.load(Ordering::SeqCst), 0);
        assert!(tmp.path().join("outside.txt").exists());
    }

    #[tokio::test]
    async fn test_delete_declined_leaves_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("keep.txt"), "x").unwrap();
        let ws = Workspace::new(tmp.path()).unwrap();
        let runner = ToolRunner::new_with_defaults(&ws, &ToolSettings::default())
            .with_confirmation(Box::new(AutoDeny));
        let result = runner
            .execute(&ToolCall::new("d1", "delete", json!({"path": "keep.txt"})))
            .await;
        assert_eq!(result.error, Some(ToolErrorKind::UserDeclined));
        assert!(tmp.path().join("keep.txt").exists());
    }
}
