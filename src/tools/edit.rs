//! Edit tool - exact search and replace inside a file

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::fs;

use super::{Args, ParamSpec, ParamType, SideEffect, Tool, ToolOutput, ToolSpec, Workspace};
use crate::error::ToolError;

/// Replace an exact string in a file
pub struct EditFileTool {
    workspace: Workspace,
}

impl EditFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

fn bigrams(text: &str) -> HashSet<(char, char)> {
    let chars: Vec<char> = text.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Dice coefficient over character bigrams, 0.0..=1.0.
fn similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (bigrams(a), bigrams(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    2.0 * shared as f64 / (a.len() + b.len()) as f64
}

/// Lines that look like the first line of `needle`, to help the model retry.
fn similar_lines(content: &str, needle: &str) -> Vec<String> {
    let first = needle.lines().next().unwrap_or_default().trim();
    if first.is_empty() {
        return Vec::new();
    }
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| similarity(line.trim(), first) > 0.6)
        .take(3)
        .map(|(i, line)| {
            let shown: String = line.chars().take(80).collect();
            format!("Line {}: {shown}", i + 1)
        })
        .collect()
}

fn not_found_message(content: &str, needle: &str) -> String {
    let mut message = String::from("old_string not found in file.");
    let similar = similar_lines(content, needle);
    if !similar.is_empty() {
        message.push_str("\n\nDid you mean one of these?\n");
        message.push_str(&similar.join("\n"));
    } else if content.contains(needle.trim()) {
        message.push_str("\n\nThe text exists but whitespace doesn't match. Check indentation.");
    } else if content.replace('\n', "").contains(&needle.replace('\n', "")) {
        message.push_str("\n\nThe text exists but line breaks don't match.");
    }
    message
}

#[async_trait]
impl Tool for EditFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "edit_file",
            description: "Replace old_string with new_string in a file. old_string must match exactly, \
                          including whitespace, and be unique unless replace_all is true. Read the file first.",
            params: vec![
                ParamSpec::required("path", ParamType::String, "File to edit"),
                ParamSpec::required("old_string", ParamType::String, "Exact text to replace"),
                ParamSpec::required("new_string", ParamType::String, "Replacement text"),
                ParamSpec::optional("replace_all", ParamType::Boolean, "Replace every occurrence (default false)"),
            ],
            effect: SideEffect::Mutating,
        }
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let raw = args.str("path")?;
        let old = args.str("old_string")?;
        let new = args.str("new_string")?;
        let replace_all = args.bool_or("replace_all", false);

        if old.is_empty() {
            return Err(ToolError::invalid_args("old_string must not be empty"));
        }
        if old == new {
            return Err(ToolError::invalid_args(
                "old_string and new_string are identical. No changes made.",
            ));
        }

        let path = self.workspace.resolve(raw)?;
        if !path.is_file() {
            return Err(ToolError::execution(format!("file not found: {raw}")));
        }
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::execution(format!("failed to read {raw}: {e}")))?;

        let count = content.matches(old).count();
        if count == 0 {
            return Err(ToolError::execution(not_found_message(&content, old)));
        }
        if count > 1 && !replace_all {
            let lines: Vec<String> = content
                .match_indices(old)
                .map(|(pos, _)| format!("line {}", content[..pos].matches('\n').count() + 1))
                .collect();
            return Err(ToolError::execution(format!(
                "old_string appears {count} times ({}). Use replace_all=true or include more context.",
                lines.join(", ")
            )));
        }

        let updated = if replace_all {
            content.replace(old, new)
        } else {
            content.replacen(old, new, 1)
        };
        fs::write(&path, &updated)
            .await
            .map_err(|e| ToolError::execution(format!("failed to write {raw}: {e}")))?;

        let replaced = if replace_all { count } else { 1 };
        Ok(ToolOutput::text(format!(
            "Edited {}: replaced {replaced} occurrence(s), {} line(s) -> {} line(s)",
            self.workspace.display(&path),
            old.lines().count().max(1),
            new.lines().count().max(1)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup(content: &str) -> (TempDir, EditFileTool) {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("f.rs"), content).unwrap();
        let tool = EditFileTool::new(Workspace::new(tmp.path()).unwrap());
        (tmp, tool)
    }

    #[tokio::test]
    async fn test_unique_replace() {
        let (tmp, tool) = setup("let a = 1;\nlet b = 2;\n");
        tool.execute(Args::new(json!({
            "path": "f.rs", "old_string": "let b = 2;", "new_string": "let b = 3;"
        })))
        .await
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("f.rs")).unwrap(),
            "let a = 1;\nlet b = 3;\n"
        );
    }

    #[tokio::test]
    async fn test_ambiguous_match_rejected() {
        let (tmp, tool) = setup("x\nx\n");
        let err = tool
            .execute(Args::new(json!({"path": "f.rs", "old_string": "x", "new_string": "y"})))
            .await
            .unwrap_err();
        assert!(err.message.contains("appears 2 times"));
        assert!(err.message.contains("line 1, line 2"));
        assert_eq!(std::fs::read_to_string(tmp.path().join("f.rs")).unwrap(), "x\nx\n");
    }

    #[tokio::test]
    async fn test_replace_all() {
        let (tmp, tool) = setup("x\nx\n");
        tool.execute(Args::new(json!({
            "path": "f.rs", "old_string": "x", "new_string": "y", "replace_all": true
        })))
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(tmp.path().join("f.rs")).unwrap(), "y\ny\n");
    }

    #[tokio::test]
    async fn test_whitespace_hint() {
        let (_tmp, tool) = setup("fn main() {\n    call();\n}\n");
        let err = tool
            .execute(Args::new(json!({
                "path": "f.rs", "old_string": "call();  ", "new_string": "other();"
            })))
            .await
            .unwrap_err();
        assert!(err.message.contains("not found"));
        assert!(err.message.contains("Line 2") || err.message.contains("whitespace"));
    }

    #[tokio::test]
    async fn test_identical_strings_rejected() {
        let (_tmp, tool) = setup("abc");
        let err = tool
            .execute(Args::new(json!({"path": "f.rs", "old_string": "a", "new_string": "a"})))
            .await
            .unwrap_err();
        assert!(err.message.contains("identical"));
    }

    #[test]
    fn test_similarity_bounds() {
        assert!(similarity("let value = 1;", "let value = 2;") > 0.6);
        assert!(similarity("abc", "xyz") < 0.1);
    }
}
