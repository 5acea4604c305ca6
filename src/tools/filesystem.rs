//! Filesystem tools - read, write, list, create, delete, copy and move

use std::path::Path;

use async_trait::async_trait;
use tokio::fs;
use walkdir::WalkDir;

use super::{Args, ParamSpec, ParamType, SideEffect, Tool, ToolOutput, ToolSpec, Workspace};
use crate::error::ToolError;

const DEFAULT_READ_LIMIT: u64 = 2000;
const MAX_LINE_CHARS: usize = 2000;

fn io_failure(action: &str, shown: &str, err: std::io::Error) -> ToolError {
    ToolError::execution(format!("failed to {action} {shown}: {err}"))
}

/// Resolve every path argument named in `keys` that is present.
fn check_paths(workspace: &Workspace, args: &Args, keys: &[&str]) -> Result<(), ToolError> {
    for key in keys {
        if let Some(raw) = args.opt_str(key) {
            workspace.resolve(raw)?;
        }
    }
    Ok(())
}

/// Read file contents with line numbers
pub struct ReadFileTool {
    workspace: Workspace,
}

impl ReadFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file",
            description: "Read a text file. Lines are numbered starting at 1. Use offset and limit for large files.",
            params: vec![
                ParamSpec::required("path", ParamType::String, "File to read, relative to the working directory"),
                ParamSpec::optional("offset", ParamType::Integer, "First line to return (1-based, default 1)"),
                ParamSpec::optional("limit", ParamType::Integer, "Maximum number of lines (default 2000)"),
            ],
            effect: SideEffect::ReadOnly,
        }
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let raw = args.str("path")?;
        let path = self.workspace.resolve(raw)?;
        if path.is_dir() {
            return Err(ToolError::execution(format!("{raw} is a directory; use ls")));
        }
        let bytes = fs::read(&path).await.map_err(|e| io_failure("read", raw, e))?;
        let content = String::from_utf8(bytes)
            .map_err(|_| ToolError::execution(format!("{raw} is not a UTF-8 text file")))?;

        let total = content.lines().count();
        let offset = usize::try_from(args.u64_or("offset", 1).max(1)).unwrap_or(usize::MAX);
        let limit = usize::try_from(args.u64_or("limit", DEFAULT_READ_LIMIT).max(1))
            .unwrap_or(usize::MAX)
            .min(total.max(1));
        if total == 0 {
            return Ok(ToolOutput::text(format!("{raw} is empty")));
        }
        if offset > total {
            return Err(ToolError::invalid_args(format!(
                "offset {offset} is past the end of {raw} ({total} lines)"
            )));
        }

        let mut out = String::new();
        for (index, line) in content.lines().enumerate().skip(offset - 1).take(limit) {
            let shown: String = if line.chars().count() > MAX_LINE_CHARS {
                line.chars().take(MAX_LINE_CHARS).chain("...".chars()).collect()
            } else {
                line.to_string()
            };
            out.push_str(&format!("{:6}\t{}\n", index + 1, shown));
        }
        let last = (offset - 1).saturating_add(limit).min(total);
        if last < total {
            out.push_str(&format!(
                "\n[showing lines {offset}-{last} of {total}; use offset to read more]"
            ));
        }
        Ok(ToolOutput::text(out))
    }
}

/// Write content to a file
pub struct WriteFileTool {
    workspace: Workspace,
}

impl WriteFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "write_file",
            description: "Create or overwrite a file with the given content. Parent directories are created.",
            params: vec![
                ParamSpec::required("path", ParamType::String, "File to write"),
                ParamSpec::required("content", ParamType::String, "Full file content"),
            ],
            effect: SideEffect::Mutating,
        }
    }

    fn preflight(&self, args: &Args) -> Result<(), ToolError> {
        check_paths(&self.workspace, args, &["path"])
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let raw = args.str("path")?;
        let content = args.str("content")?;
        let path = self.workspace.resolve(raw)?;
        if path.is_dir() {
            return Err(ToolError::execution(format!("{raw} is a directory")));
        }
        let existed = path.exists();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("create directories for", raw, e))?;
        }
        fs::write(&path, content)
            .await
            .map_err(|e| io_failure("write", raw, e))?;
        let verb = if existed { "Updated" } else { "Created" };
        Ok(ToolOutput::text(format!(
            "{verb} {} ({} lines, {} bytes)",
            self.workspace.display(&path),
            content.lines().count(),
            content.len()
        )))
    }
}

/// List directory contents
pub struct ListDirTool {
    workspace: Workspace,
}

impl ListDirTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

fn human_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes}B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "ls",
            description: "List a directory. Directories end with '/', files show their size.",
            params: vec![
                ParamSpec::optional("path", ParamType::String, "Directory to list (default: working directory)"),
                ParamSpec::optional("all", ParamType::Boolean, "Include hidden entries"),
            ],
            effect: SideEffect::ReadOnly,
        }
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let raw = args.opt_str("path").unwrap_or(".");
        let show_hidden = args.bool_or("all", false);
        let path = self.workspace.resolve(raw)?;
        if !path.is_dir() {
            return Err(ToolError::execution(format!("{raw} is not a directory")));
        }

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut reader = fs::read_dir(&path)
            .await
            .map_err(|e| io_failure("list", raw, e))?;
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| io_failure("list", raw, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !show_hidden && name.starts_with('.') {
                continue;
            }
            match entry.metadata().await {
                Ok(meta) if meta.is_dir() => dirs.push(format!("{name}/")),
                Ok(meta) => files.push(format!("{name}  ({})", human_size(meta.len()))),
                Err(_) => files.push(name),
            }
        }
        dirs.sort();
        files.sort();

        if dirs.is_empty() && files.is_empty() {
            return Ok(ToolOutput::text(format!("{raw} is empty")));
        }
        let mut lines = dirs;
        lines.extend(files);
        Ok(ToolOutput::text(lines.join("\n")))
    }
}

/// Create a directory (and parents)
pub struct MkdirTool {
    workspace: Workspace,
}

impl MkdirTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for MkdirTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "mkdir",
            description: "Create a directory, including missing parents.",
            params: vec![ParamSpec::required("path", ParamType::String, "Directory to create")],
            effect: SideEffect::Mutating,
        }
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let raw = args.str("path")?;
        let path = self.workspace.resolve(raw)?;
        if path.is_dir() {
            return Ok(ToolOutput::text(format!("{raw} already exists")));
        }
        fs::create_dir_all(&path)
            .await
            .map_err(|e| io_failure("create", raw, e))?;
        Ok(ToolOutput::text(format!("Created {}/", self.workspace.display(&path))))
    }
}

/// Delete a file or directory
pub struct DeleteTool {
    workspace: Workspace,
}

impl DeleteTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for DeleteTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "delete",
            description: "Delete a file or an empty directory. Non-empty directories need recursive=true.",
            params: vec![
                ParamSpec::required("path", ParamType::String, "File or directory to delete"),
                ParamSpec::optional("recursive", ParamType::Boolean, "Remove a directory with everything in it"),
            ],
            effect: SideEffect::Destructive,
        }
    }

    fn preflight(&self, args: &Args) -> Result<(), ToolError> {
        check_paths(&self.workspace, args, &["path"])
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let raw = args.str("path")?;
        let recursive = args.bool_or("recursive", false);
        let path = self.workspace.resolve(raw)?;
        if path == self.workspace.root() {
            return Err(ToolError::execution("refusing to delete the working directory itself"));
        }
        let meta = fs::symlink_metadata(&path)
            .await
            .map_err(|e| io_failure("delete", raw, e))?;
        if !meta.is_dir() {
            fs::remove_file(&path)
                .await
                .map_err(|e| io_failure("delete", raw, e))?;
            return Ok(ToolOutput::text(format!("Deleted {}", self.workspace.display(&path))));
        }
        if recursive {
            fs::remove_dir_all(&path)
                .await
                .map_err(|e| io_failure("delete", raw, e))?;
        } else {
            let mut entries = fs::read_dir(&path)
                .await
                .map_err(|e| io_failure("delete", raw, e))?;
            let has_entries = entries
                .next_entry()
                .await
                .map_err(|e| io_failure("delete", raw, e))?
                .is_some();
            if has_entries {
                return Err(ToolError::execution(format!(
                    "directory not empty: {raw}. Use recursive=true to delete it with its contents"
                )));
            }
            fs::remove_dir(&path)
                .await
                .map_err(|e| io_failure("delete", raw, e))?;
        }
        Ok(ToolOutput::text(format!("Deleted {}/", self.workspace.display(&path))))
    }
}

/// Copy a file or directory tree
pub struct CopyTool {
    workspace: Workspace,
}

impl CopyTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry.path().strip_prefix(from).map_err(std::io::Error::other)?;
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[async_trait]
impl Tool for CopyTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "copy",
            description: "Copy a file or directory to a new location. The destination must not exist.",
            params: vec![
                ParamSpec::required("source", ParamType::String, "Existing file or directory"),
                ParamSpec::required("destination", ParamType::String, "Target path"),
            ],
            effect: SideEffect::Mutating,
        }
    }

    fn preflight(&self, args: &Args) -> Result<(), ToolError> {
        check_paths(&self.workspace, args, &["source", "destination"])
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let src_raw = args.str("source")?;
        let dst_raw = args.str("destination")?;
        let src = self.workspace.resolve(src_raw)?;
        let dst = self.workspace.resolve(dst_raw)?;
        if !src.exists() {
            return Err(ToolError::execution(format!("{src_raw} does not exist")));
        }
        if fs::symlink_metadata(&dst).await.is_ok() {
            return Err(ToolError::execution(format!("destination already exists: {dst_raw}")));
        }
        if src.is_dir() {
            if dst.starts_with(&src) {
                return Err(ToolError::execution("cannot copy a directory into itself"));
            }
            let (from, to) = (src.clone(), dst.clone());
            let copied = tokio::task::spawn_blocking(move || copy_tree(&from, &to))
                .await
                .map_err(|e| ToolError::execution(format!("copy task failed: {e}")))?
                .map_err(|e| io_failure("copy", src_raw, e))?;
            return Ok(ToolOutput::text(format!(
                "Copied {} -> {} ({copied} files)",
                self.workspace.display(&src),
                self.workspace.display(&dst)
            )));
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("create directories for", dst_raw, e))?;
        }
        fs::copy(&src, &dst)
            .await
            .map_err(|e| io_failure("copy", src_raw, e))?;
        Ok(ToolOutput::text(format!(
            "Copied {} -> {}",
            self.workspace.display(&src),
            self.workspace.display(&dst)
        )))
    }
}

/// Move or rename a file or directory
pub struct MoveTool {
    workspace: Workspace,
}

impl MoveTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for MoveTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "move",
            description: "Move or rename a file or directory. Overwriting an existing destination asks for confirmation.",
            params: vec![
                ParamSpec::required("source", ParamType::String, "Existing file or directory"),
                ParamSpec::required("destination", ParamType::String, "New path"),
            ],
            effect: SideEffect::Mutating,
        }
    }

    fn preflight(&self, args: &Args) -> Result<(), ToolError> {
        check_paths(&self.workspace, args, &["source", "destination"])
    }

    fn effect_for(&self, args: &Args) -> SideEffect {
        let overwrites = args
            .opt_str("destination")
            .and_then(|raw| self.workspace.resolve(raw).ok())
            .is_some_and(|dst| dst.exists());
        if overwrites {
            SideEffect::Destructive
        } else {
            SideEffect::Mutating
        }
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let src_raw = args.str("source")?;
        let dst_raw = args.str("destination")?;
        let src = self.workspace.resolve(src_raw)?;
        let dst = self.workspace.resolve(dst_raw)?;
        if !src.exists() {
            return Err(ToolError::execution(format!("{src_raw} does not exist")));
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("create directories for", dst_raw, e))?;
        }
        if dst.is_dir() && !src.is_dir() {
            return Err(ToolError::execution(format!(
                "{dst_raw} is a directory; give the full destination file path"
            )));
        }
        fs::rename(&src, &dst)
            .await
            .map_err(|e| io_failure("move", src_raw, e))?;
        Ok(ToolOutput::text(format!(
            "Moved {} -> {}",
            self.workspace.display(&src),
            self.workspace.display(&dst)
        )))
    }
}
