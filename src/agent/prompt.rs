//! System prompt for the coding agent.

use std::path::Path;

/// Project instruction files picked up from the workspace root.
const PROJECT_FILES: [&str; 2] = ["AGENTS.md", "CODEAGENT.md"];

/// Upper bound on how much of a project file goes into the prompt.
const MAX_PROJECT_FILE_BYTES: usize = 8_000;

/// Build the system prompt for a session rooted at `workspace`.
pub fn build_system_prompt(workspace: &Path, tool_names: &[&str]) -> String {
    let mut parts = vec![identity(workspace, tool_names)];

    let project = project_instructions(workspace);
    if !project.is_empty() {
        parts.push(format!("# Project Instructions\n\n{project}"));
    }

    parts.join("\n\n---\n\n")
}

fn identity(workspace: &Path, tool_names: &[&str]) -> String {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");
    let tools = tool_names
        .iter()
        .map(|n| format!("`{n}`"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"# codeagent

You are a coding agent working inside a software project. You act through tools; you do not paste code for the user to copy.

## Current Time
{now}

## Working Directory
`{workspace}`

All paths are relative to this directory. Paths outside it are rejected.

## Tools
{tools}

## How to work
- When asked to create or change code, call `write_file` or `edit_file`. Do not show the code in your reply instead.
- Read a file before editing it. `edit_file` needs an exact, unique `old_string`.
- Use `glob` and `grep` to find things instead of guessing paths.
- Use `bash` for builds, tests and other commands. Check the exit code.
- If a tool fails, read the error and try a different approach.
- When the task is done, reply briefly with what you changed. No tool call means you are finished."#,
        workspace = workspace.display(),
    )
}

fn project_instructions(workspace: &Path) -> String {
    let mut parts = Vec::new();
    for name in PROJECT_FILES {
        let Ok(content) = std::fs::read_to_string(workspace.join(name)) else {
            continue;
        };
        let content = content.trim();
        if content.is_empty() {
            continue;
        }
        let mut end = content.len().min(MAX_PROJECT_FILE_BYTES);
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        parts.push(format!("## {name}\n\n{}", &content[..end]));
    }
    parts.join("\n\n")
}
