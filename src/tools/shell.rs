//! Shell tool - run commands in the workspace

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{Args, ParamSpec, ParamType, SideEffect, Tool, ToolOutput, ToolSpec, Workspace};
use crate::error::ToolError;

/// Commands that are refused outright, whatever the confirmation setting.
pub const DEFAULT_BLOCKED_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "rm -rf ~",
    "rm -rf $HOME",
    "> /dev/sda",
    "dd if=/dev/zero",
    "mkfs",
    ":(){:|:&};:",
    "chmod -R 777 /",
];

/// Upper bound for a per-call `timeout` argument.
const MAX_TIMEOUT_SECS: u64 = 600;

/// Run `command` to completion under `limit`, collecting stdout and stderr.
///
/// The child is killed if the limit passes. Shared with the git tool.
pub(crate) async fn run_process(mut command: Command, limit: Duration) -> Result<ToolOutput, ToolError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .map_err(|e| ToolError::execution(format!("failed to start process: {e}")))?;

    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| ToolError::execution(format!("process failed: {e}")))?,
        Err(_) => {
            warn!(timeout_secs = limit.as_secs(), "process timed out and was killed");
            return Err(ToolError::execution(format!(
                "command timed out after {}s and was killed",
                limit.as_secs()
            )));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut text = stdout.trim_end().to_string();
    if !stderr.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr.trim_end());
    }
    if text.is_empty() {
        text.push_str("(no output)");
    }
    Ok(ToolOutput::process(text, output.status.code().unwrap_or(-1)))
}

/// Execute shell commands
pub struct BashTool {
    workspace: Workspace,
    default_timeout: Duration,
    blocked: Vec<String>,
}

impl BashTool {
    pub fn new(workspace: Workspace, default_timeout: Duration, blocked: Vec<String>) -> Self {
        Self {
            workspace,
            default_timeout,
            blocked,
        }
    }

    fn blocked_pattern(&self, command: &str) -> Option<&str> {
        let normalized = command.split_whitespace().collect::<Vec<_>>().join(" ");
        self.blocked
            .iter()
            .map(String::as_str)
            .find(|pattern| normalized.contains(pattern) || command.contains(pattern))
    }
}

#[async_trait]
impl Tool for BashTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "bash",
            description: "Run a shell command in the working directory and return its combined output and exit code. \
                          Use for builds, tests and anything the file tools do not cover.",
            params: vec![
                ParamSpec::required("command", ParamType::String, "Shell command to execute"),
                ParamSpec::optional("timeout", ParamType::Integer, "Timeout in seconds (default 120, max 600)"),
            ],
            effect: SideEffect::Mutating,
        }
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let command = args.str("command")?;
        if command.trim().is_empty() {
            return Err(ToolError::invalid_args("command is empty"));
        }
        if let Some(pattern) = self.blocked_pattern(command) {
            return Err(ToolError::execution(format!(
                "command blocked for safety (matches '{pattern}')"
            )));
        }

        let secs = args
            .u64_or("timeout", self.default_timeout.as_secs())
            .clamp(1, MAX_TIMEOUT_SECS);
        debug!(command, timeout_secs = secs, "running shell command");

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };
        cmd.current_dir(self.workspace.root()).env("TERM", "dumb");
        run_process(cmd, Duration::from_secs(secs)).await
    }
}
