//! Grep tool - regex search in files

use std::path::Path;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use super::find::{compile_glob, walk_files};
use super::{Args, ParamSpec, ParamType, SideEffect, Tool, ToolOutput, ToolSpec, Workspace};
use crate::error::ToolError;

/// Search file contents with a regular expression
pub struct GrepTool {
    workspace: Workspace,
}

impl GrepTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

fn search_file(path: &Path, shown: &str, pattern: &Regex, limit: usize, hits: &mut Vec<String>) {
    // binary or unreadable files are skipped
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };
    for (i, line) in content.lines().enumerate() {
        if hits.len() >= limit {
            return;
        }
        if pattern.is_match(line) {
            let text: String = line.trim().chars().take(300).collect();
            hits.push(format!("{shown}:{}: {text}", i + 1));
        }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "grep",
            description: "Search file contents with a regular expression. Returns path:line: text for each match.",
            params: vec![
                ParamSpec::required("pattern", ParamType::String, "Regular expression to search for"),
                ParamSpec::optional("path", ParamType::String, "File or directory to search (default: working directory)"),
                ParamSpec::optional("include", ParamType::String, "Only search files whose name matches this glob, e.g. '*.rs'"),
                ParamSpec::optional("ignore_case", ParamType::Boolean, "Case-insensitive search"),
                ParamSpec::optional("max_results", ParamType::Integer, "Maximum matches (default 50)"),
            ],
            effect: SideEffect::ReadOnly,
        }
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let query = args.str("pattern")?;
        let raw = args.opt_str("path").unwrap_or(".");
        let limit = args.u64_or("max_results", 50).max(1) as usize;
        let pattern = RegexBuilder::new(query)
            .case_insensitive(args.bool_or("ignore_case", false))
            .build()
            .map_err(|e| ToolError::invalid_args(format!("invalid regex: {e}")))?;
        let include = args.opt_str("include").map(compile_glob).transpose()?;

        let target = self.workspace.resolve(raw)?;
        if !target.exists() {
            return Err(ToolError::execution(format!("path not found: {raw}")));
        }

        let workspace = self.workspace.clone();
        let hits = tokio::task::spawn_blocking(move || {
            let mut hits = Vec::new();
            let files: Box<dyn Iterator<Item = _>> = if target.is_file() {
                Box::new(std::iter::once(target.clone()))
            } else {
                Box::new(walk_files(&target, false))
            };
            for file in files {
                if hits.len() >= limit {
                    break;
                }
                let name_ok = match (&include, file.file_name()) {
                    (Some(glob), Some(name)) => glob.is_match(name),
                    (Some(_), None) => false,
                    (None, _) => true,
                };
                if name_ok {
                    search_file(&file, &workspace.display(&file), &pattern, limit, &mut hits);
                }
            }
            hits
        })
        .await
        .map_err(|e| ToolError::execution(format!("search task failed: {e}")))?;

        if hits.is_empty() {
            return Ok(ToolOutput::text(format!("No matches found for pattern: {query}")));
        }
        let mut text = hits.join("\n");
        if hits.len() >= limit {
            text.push_str(&format!("\n\n... (showing first {limit} matches)"));
        }
        Ok(ToolOutput::text(text))
    }
}
