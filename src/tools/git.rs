//! Git tool - source control through a fixed set of operations

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::shell::run_process;
use super::{Args, ParamSpec, ParamType, SideEffect, Tool, ToolOutput, ToolSpec, Workspace};
use crate::error::ToolError;

const OPERATIONS: &[&str] = &[
    "status", "diff", "log", "add", "commit", "branch", "checkout", "init", "stash", "pull", "push",
    "reset", "merge", "remote", "tag", "clone",
];

fn require_target(target: Option<String>, op: &str, what: &str) -> Result<String, ToolError> {
    target.ok_or_else(|| ToolError::invalid_args(format!("'{op}' needs 'target' ({what})")))
}

/// Model supplied names go into argv as positionals; none may look like an option.
fn check_target(target: Option<&str>) -> Result<(), ToolError> {
    match target {
        Some(t) if t.trim_start().starts_with('-') => Err(ToolError::invalid_args(format!(
            "target '{t}' looks like an option; options are not accepted"
        ))),
        _ => Ok(()),
    }
}

/// Only network transports; `ext::` and friends can run commands.
fn check_clone_url(url: &str) -> Result<(), ToolError> {
    let allowed = ["https://", "http://", "ssh://", "git://", "git@"];
    if allowed.iter().any(|prefix| url.starts_with(prefix)) {
        Ok(())
    } else {
        Err(ToolError::invalid_args(format!(
            "clone needs an https, ssh or git URL, got '{url}'"
        )))
    }
}

/// Execute git operations. Arguments are passed as argv, never through a shell.
pub struct GitTool {
    workspace: Workspace,
    timeout: Duration,
}

impl GitTool {
    pub fn new(workspace: Workspace, timeout: Duration) -> Self {
        Self { workspace, timeout }
    }

    /// Paths are checked against the sandbox and passed relative to the root.
    fn paths(&self, args: &Args) -> Result<Vec<String>, ToolError> {
        args.strings("paths")
            .iter()
            .map(|raw| {
                let resolved = self.workspace.resolve(raw)?;
                Ok(self.workspace.display(&resolved))
            })
            .collect()
    }

    /// Checkout target naming an existing path rather than a ref.
    fn checkout_path(&self, args: &Args) -> Option<String> {
        if args.bool_or("create", false) {
            return None;
        }
        let raw = args.opt_str("target")?;
        let resolved = self.workspace.resolve(raw).ok()?;
        resolved.exists().then(|| self.workspace.display(&resolved))
    }

    fn argv(&self, op: &str, args: &Args) -> Result<Vec<String>, ToolError> {
        check_target(args.opt_str("target"))?;
        let target = args.opt_str("target").map(str::to_string);
        let message = args.opt_str("message").map(str::to_string);

        let mut argv: Vec<String> = vec![op.to_string()];
        match op {
            "status" => argv.extend(["--short".into(), "--branch".into()]),
            "diff" => {
                if args.bool_or("staged", false) {
                    argv.push("--staged".into());
                }
                let paths = self.paths(args)?;
                if !paths.is_empty() {
                    argv.push("--".into());
                    argv.extend(paths);
                }
            }
            "log" => {
                let count = args.u64_or("count", 10).clamp(1, 200);
                argv.extend(["--oneline".into(), "-n".into(), count.to_string()]);
            }
            "add" => {
                let paths = self.paths(args)?;
                if paths.is_empty() {
                    return Err(ToolError::invalid_args("'add' needs 'paths'"));
                }
                argv.push("--".into());
                argv.extend(paths);
            }
            "commit" => {
                let message = message.ok_or_else(|| ToolError::invalid_args("'commit' needs 'message'"))?;
                argv.extend(["-m".into(), message]);
            }
            "branch" => match target {
                Some(name) => argv.push(name),
                None => argv.push("--list".into()),
            },
            "checkout" => {
                let name = require_target(target, op, "branch, ref or path")?;
                if let Some(path) = self.checkout_path(args) {
                    argv.extend(["--".into(), path]);
                } else if args.bool_or("create", false) {
                    argv.extend(["-b".into(), name]);
                } else {
                    // trailing `--` keeps git from reading the name as a pathspec
                    argv.extend([name, "--".into()]);
                }
            }
            "init" => {}
            "stash" => {
                let action = target.unwrap_or_else(|| "push".to_string());
                if !["push", "pop", "list", "apply", "drop"].contains(&action.as_str()) {
                    return Err(ToolError::invalid_args(
                        "stash target must be one of: push, pop, list, apply, drop",
                    ));
                }
                let is_push = action == "push";
                argv.push(action);
                if let Some(message) = message.filter(|_| is_push) {
                    argv.extend(["-m".into(), message]);
                }
            }
            "pull" | "push" => {
                if let Some(remote) = target {
                    argv.push(remote);
                }
            }
            "reset" => {
                if args.bool_or("hard", false) {
                    argv.push("--hard".into());
                }
                if let Some(reference) = target {
                    argv.push(reference);
                }
            }
            "merge" => argv.push(require_target(target, op, "branch to merge")?),
            "remote" => argv.push("-v".into()),
            "tag" => match (target, message) {
                (Some(name), Some(message)) => argv.extend(["-a".into(), name, "-m".into(), message]),
                (Some(name), None) => argv.push(name),
                (None, _) => argv.push("--list".into()),
            },
            "clone" => {
                let url = require_target(target, op, "repository URL")?;
                check_clone_url(&url)?;
                argv.extend(["--".into(), url]);
                if let Some(raw) = args.opt_str("directory") {
                    let dir = self.workspace.resolve(raw)?;
                    if dir.exists() {
                        return Err(ToolError::execution(format!("{raw} already exists")));
                    }
                    argv.push(self.workspace.display(&dir));
                }
            }
            other => return Err(ToolError::invalid_args(format!("unknown git operation '{other}'"))),
        }
        Ok(argv)
    }
}

#[async_trait]
impl Tool for GitTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "git",
            description: "Run a git operation in the working directory. clone takes the URL as target. \
                          commit, push, reset and checkout of a path ask for confirmation.",
            params: vec![
                ParamSpec::required("operation", ParamType::String, "Git operation").one_of(OPERATIONS),
                ParamSpec::optional("paths", ParamType::Array, "Files for add/diff"),
                ParamSpec::optional("message", ParamType::String, "Message for commit, stash or annotated tag"),
                ParamSpec::optional(
                    "target",
                    ParamType::String,
                    "Branch, ref, path, remote, tag name, repository URL, or stash action depending on the operation",
                ),
                ParamSpec::optional("directory", ParamType::String, "clone: directory to clone into"),
                ParamSpec::optional("staged", ParamType::Boolean, "diff: show staged changes"),
                ParamSpec::optional("count", ParamType::Integer, "log: number of commits (default 10)"),
                ParamSpec::optional("create", ParamType::Boolean, "checkout: create the branch"),
                ParamSpec::optional("hard", ParamType::Boolean, "reset: discard working tree changes"),
            ],
            effect: SideEffect::Mutating,
        }
    }

    fn preflight(&self, args: &Args) -> Result<(), ToolError> {
        check_target(args.opt_str("target"))?;
        self.paths(args)?;
        if let Some(raw) = args.opt_str("directory") {
            self.workspace.resolve(raw)?;
        }
        Ok(())
    }

    fn effect_for(&self, args: &Args) -> SideEffect {
        match args.opt_str("operation") {
            Some("commit" | "push") => SideEffect::Destructive,
            Some("reset") if args.bool_or("hard", false) || args.opt_str("target").is_some() => {
                SideEffect::Destructive
            }
            Some("checkout") if self.checkout_path(args).is_some() => SideEffect::Destructive,
            Some("status" | "diff" | "log" | "remote") => SideEffect::ReadOnly,
            _ => SideEffect::Mutating,
        }
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let op = args.str("operation")?;
        let argv = self.argv(op, &args)?;
        debug!(?argv, "running git");

        let mut cmd = Command::new("git");
        cmd.args(&argv)
            .current_dir(self.workspace.root())
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_PAGER", "cat");
        run_process(cmd, self.timeout).await.map_err(|e| {
            if e.message.contains("failed to start") {
                ToolError::execution("git is not installed or not on PATH")
            } else {
                e
            }
        })
    }
}
