//! Glob tool - find files by pattern

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use globset::{Glob, GlobBuilder, GlobMatcher};
use walkdir::{DirEntry, WalkDir};

use super::{Args, ParamSpec, ParamType, SideEffect, Tool, ToolOutput, ToolSpec, Workspace};
use crate::error::ToolError;

/// Directories never descended into.
pub(crate) const IGNORED_DIRS: &[&str] = &[
    "__pycache__",
    ".git",
    "node_modules",
    ".venv",
    "venv",
    "dist",
    "build",
    "target",
];

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn is_ignored_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && IGNORED_DIRS.iter().any(|d| entry.file_name() == *d)
}

/// Files under `base`, skipping ignored directories and (optionally) hidden entries.
pub(crate) fn walk_files(base: &Path, include_hidden: bool) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(base)
        .follow_links(false)
        .into_iter()
        .filter_entry(move |e| {
            e.depth() == 0 || (!is_ignored_dir(e) && (include_hidden || !is_hidden(e)))
        })
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(DirEntry::into_path)
}

pub(crate) fn compile_glob(pattern: &str) -> Result<GlobMatcher, ToolError> {
    let glob: Glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| ToolError::invalid_args(format!("invalid glob '{pattern}': {e}")))?;
    Ok(glob.compile_matcher())
}

/// Find files by glob pattern
pub struct GlobTool {
    workspace: Workspace,
}

impl GlobTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "glob",
            description: "Find files matching a glob pattern such as '**/*.rs' or 'src/*.toml'. \
                          Skips .git, node_modules, target and other build directories.",
            params: vec![
                ParamSpec::required("pattern", ParamType::String, "Glob pattern, relative to path"),
                ParamSpec::optional("path", ParamType::String, "Directory to search (default: working directory)"),
                ParamSpec::optional("max_results", ParamType::Integer, "Maximum files to return (default 100)"),
                ParamSpec::optional("include_hidden", ParamType::Boolean, "Include hidden files"),
            ],
            effect: SideEffect::ReadOnly,
        }
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let pattern = args.str("pattern")?.to_string();
        let raw = args.opt_str("path").unwrap_or(".");
        let max_results = args.u64_or("max_results", 100).max(1) as usize;
        let include_hidden = args.bool_or("include_hidden", false);

        let base = self.workspace.resolve(raw)?;
        if !base.is_dir() {
            return Err(ToolError::execution(format!("{raw} is not a directory")));
        }
        let matcher = compile_glob(&pattern)?;

        let search_base = base.clone();
        let mut matches = tokio::task::spawn_blocking(move || {
            walk_files(&search_base, include_hidden)
                .filter(|path| {
                    path.strip_prefix(&search_base)
                        .map(|rel| matcher.is_match(rel))
                        .unwrap_or(false)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| ToolError::execution(format!("search task failed: {e}")))?;

        if matches.is_empty() {
            return Ok(ToolOutput::text(format!("No files match {pattern}")));
        }
        matches.sort();
        let total = matches.len();
        let mut lines: Vec<String> = matches
            .iter()
            .take(max_results)
            .map(|p| self.workspace.display(p))
            .collect();
        if total > max_results {
            lines.push(format!("\n... (limited to {max_results} of {total} results)"));
        }
        Ok(ToolOutput::text(lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        for path in ["src/main.rs", "src/lib/util.rs", "target/debug/x.rs", ".hidden/h.rs", "README.md"] {
            let full = tmp.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, "").unwrap();
        }
        tmp
    }

    #[tokio::test]
    async fn test_recursive_glob_skips_ignored_and_hidden() {
        let tmp = tree();
        let out = GlobTool::new(Workspace::new(tmp.path()).unwrap())
            .execute(Args::new(json!({"pattern": "**/*.rs"})))
            .await
            .unwrap();
        assert_eq!(out.text, "src/lib/util.rs\nsrc/main.rs");
    }

    #[tokio::test]
    async fn test_star_does_not_cross_directories() {
        let tmp = tree();
        let out = GlobTool::new(Workspace::new(tmp.path()).unwrap())
            .execute(Args::new(json!({"pattern": "*.md"})))
            .await
            .unwrap();
        assert_eq!(out.text, "README.md");
    }

    #[tokio::test]
    async fn test_hidden_included_on_request() {
        let tmp = tree();
        let out = GlobTool::new(Workspace::new(tmp.path()).unwrap())
            .execute(Args::new(json!({"pattern": "**/*.rs", "include_hidden": true})))
            .await
            .unwrap();
        assert!(out.text.contains(".hidden/h.rs"));
    }

    #[tokio::test]
    async fn test_max_results() {
        let tmp = tree();
        let out = GlobTool::new(Workspace::new(tmp.path()).unwrap())
            .execute(Args::new(json!({"pattern": "**/*.rs", "max_results": 1})))
            .await
            .unwrap();
        assert!(out.text.starts_with("src/lib/util.rs"));
        assert!(out.text.contains("limited to 1 of 2"));
    }
}
