//! Workspace sandbox - every tool path is resolved through here
//!
//! A path is accepted only if, after joining onto the root, folding `..`
//! and resolving symlinks on the longest existing prefix, it still lies
//! under the canonical workspace root. Nothing is read or written before
//! that check passes.

use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::ToolError;

/// The directory the agent is allowed to touch
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().canonicalize()?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a user/model supplied path to an absolute path inside the root.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let expanded = expand_tilde(raw);
        let joined = if expanded.is_absolute() {
            expanded
        } else {
            self.root.join(expanded)
        };
        let normalized = normalize(&joined);
        if !normalized.starts_with(&self.root) {
            return Err(ToolError::path_escape(raw));
        }

        let resolved = resolve_existing_prefix(&normalized)
            .map_err(|e| ToolError::execution(format!("cannot resolve '{raw}': {e}")))?;
        if !resolved.starts_with(&self.root) {
            return Err(ToolError::path_escape(raw));
        }
        Ok(resolved)
    }

    /// Path relative to the root for display; `.` for the root itself.
    pub fn display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }
}

fn expand_tilde(raw: &str) -> PathBuf {
    if raw == "~" || raw.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(raw.trim_start_matches('~').trim_start_matches('/'));
        }
    }
    PathBuf::from(raw)
}

/// Lexically fold `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the deepest ancestor that exists and re-append the rest.
fn resolve_existing_prefix(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();
    while existing.symlink_metadata().is_err() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }
    let mut resolved = existing.canonicalize()?;
    for name in missing.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
