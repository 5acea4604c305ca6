//! Code analysis tools - tree view, symbol lookup, line statistics

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use regex::Regex;

use super::find::{walk_files, IGNORED_DIRS};
use super::{Args, ParamSpec, ParamType, SideEffect, Tool, ToolOutput, ToolSpec, Workspace};
use crate::error::ToolError;

const TREE_DEFAULT_DEPTH: u64 = 5;
const TREE_MAX_DEPTH: u64 = 10;
const TREE_MAX_ENTRIES: usize = 500;
const SYMBOL_MAX_FILES: usize = 5000;

async fn blocking<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> Result<T, ToolError> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ToolError::execution(format!("analysis task failed: {e}")))
}

fn resolve_dir(workspace: &Workspace, raw: &str) -> Result<std::path::PathBuf, ToolError> {
    let path = workspace.resolve(raw)?;
    if !path.exists() {
        return Err(ToolError::execution(format!("path does not exist: {raw}")));
    }
    if !path.is_dir() {
        return Err(ToolError::execution(format!("{raw} is not a directory")));
    }
    Ok(path)
}

/// Show a directory as an indented tree
pub struct TreeTool {
    workspace: Workspace,
}

impl TreeTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

struct TreeWalk {
    lines: Vec<String>,
    entries: usize,
    max_depth: usize,
    show_hidden: bool,
    truncated: bool,
}

impl TreeWalk {
    fn visit(&mut self, dir: &Path, prefix: &str, depth: usize) {
        if depth > self.max_depth || self.truncated {
            return;
        }
        let Ok(reader) = std::fs::read_dir(dir) else {
            self.lines.push(format!("{prefix}[permission denied]"));
            return;
        };
        let mut children: Vec<(bool, String)> = reader
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let is_dir = entry.file_type().ok()?.is_dir();
                let hidden = name.starts_with('.') && !self.show_hidden;
                let ignored = is_dir && IGNORED_DIRS.contains(&name.as_str());
                (!hidden && !ignored).then_some((is_dir, name))
            })
            .collect();
        // directories first, then by name
        children.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.to_lowercase().cmp(&b.1.to_lowercase())));

        let count = children.len();
        for (i, (is_dir, name)) in children.into_iter().enumerate() {
            if self.entries >= TREE_MAX_ENTRIES {
                self.lines.push(format!("{prefix}... (truncated)"));
                self.truncated = true;
                return;
            }
            self.entries += 1;
            let last = i + 1 == count;
            let connector = if last { "└── " } else { "├── " };
            if is_dir {
                self.lines.push(format!("{prefix}{connector}{name}/"));
                let extension = if last { "    " } else { "│   " };
                self.visit(&dir.join(&name), &format!("{prefix}{extension}"), depth + 1);
            } else {
                self.lines.push(format!("{prefix}{connector}{name}"));
            }
        }
    }
}

#[async_trait]
impl Tool for TreeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "tree",
            description: "Show the directory structure as a tree. Skips .git, node_modules, target and \
                          other build directories.",
            params: vec![
                ParamSpec::optional("path", ParamType::String, "Directory to show (default: working directory)"),
                ParamSpec::optional("max_depth", ParamType::Integer, "Depth to descend (default 5, max 10)"),
                ParamSpec::optional("show_hidden", ParamType::Boolean, "Include hidden entries"),
            ],
            effect: SideEffect::ReadOnly,
        }
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let raw = args.opt_str("path").unwrap_or(".");
        let root = resolve_dir(&self.workspace, raw)?;
        let max_depth = args.u64_or("max_depth", TREE_DEFAULT_DEPTH).clamp(1, TREE_MAX_DEPTH) as usize;
        let show_hidden = args.bool_or("show_hidden", false);
        let title = match self.workspace.display(&root).as_str() {
            "." => root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| ".".to_string()),
            shown => shown.to_string(),
        };

        let walk = blocking(move || {
            let mut walk = TreeWalk {
                lines: Vec::new(),
                entries: 0,
                max_depth,
                show_hidden,
                truncated: false,
            };
            walk.visit(&root, "", 1);
            walk
        })
        .await?;

        let mut out = format!("{title}/\n{}", walk.lines.join("\n"));
        if walk.truncated {
            out.push_str(&format!("\n\n(showing the first {TREE_MAX_ENTRIES} entries)"));
        }
        Ok(ToolOutput::text(out.trim_end().to_string()))
    }
}

/// Definition patterns per file extension. `{symbol}` is replaced with the
/// escaped name.
fn definition_patterns(ext: &str) -> &'static [(&'static str, &'static str)] {
    match ext {
        "rs" => &[
            (r"^\s*(pub(\([^)]*\))?\s+)?(async\s+)?(unsafe\s+)?fn\s+{symbol}\s*[<(]", "function"),
            (r"^\s*(pub(\([^)]*\))?\s+)?struct\s+{symbol}\b", "struct"),
            (r"^\s*(pub(\([^)]*\))?\s+)?enum\s+{symbol}\b", "enum"),
            (r"^\s*(pub(\([^)]*\))?\s+)?trait\s+{symbol}\b", "trait"),
            (r"^\s*(pub(\([^)]*\))?\s+)?type\s+{symbol}\s*[<=]", "type alias"),
            (r"^\s*(pub(\([^)]*\))?\s+)?(const|static)\s+{symbol}\s*:", "constant"),
            (r"^\s*(pub(\([^)]*\))?\s+)?mod\s+{symbol}\b", "module"),
        ],
        "py" | "pyi" => &[
            (r"^\s*(async\s+)?def\s+{symbol}\s*\(", "function"),
            (r"^\s*class\s+{symbol}\s*[:(]", "class"),
            (r"^\s*{symbol}\s*(:[^=]+)?=", "variable"),
        ],
        "js" | "mjs" | "cjs" | "jsx" => &[
            (r"^\s*(export\s+)?(default\s+)?(async\s+)?function\s*\*?\s+{symbol}\s*\(", "function"),
            (r"^\s*(export\s+)?(const|let|var)\s+{symbol}\s*=\s*(async\s+)?(\(|function|[A-Za-z_$][\w$]*\s*=>)", "function"),
            (r"^\s*(export\s+)?(default\s+)?class\s+{symbol}\b", "class"),
            (r"^\s*(export\s+)?(const|let|var)\s+{symbol}\s*=", "variable"),
        ],
        "ts" | "tsx" => &[
            (r"^\s*(export\s+)?(default\s+)?(async\s+)?function\s+{symbol}\s*[<(]", "function"),
            (r"^\s*(export\s+)?(const|let|var)\s+{symbol}\s*(:[^=]+)?=\s*(async\s+)?\(", "function"),
            (r"^\s*(export\s+)?(default\s+)?(abstract\s+)?class\s+{symbol}\b", "class"),
            (r"^\s*(export\s+)?interface\s+{symbol}\b", "interface"),
            (r"^\s*(export\s+)?type\s+{symbol}\s*[<=]", "type"),
            (r"^\s*(export\s+)?(const|let|var)\s+{symbol}\s*[=:]", "variable"),
        ],
        "go" => &[
            (r"^\s*func\s+{symbol}\s*[\[(]", "function"),
            (r"^\s*func\s+\([^)]+\)\s+{symbol}\s*\(", "method"),
            (r"^\s*type\s+{symbol}\s+struct\b", "struct"),
            (r"^\s*type\s+{symbol}\s+interface\b", "interface"),
            (r"^\s*type\s+{symbol}\s", "type"),
        ],
        "java" | "kt" => &[
            (r"^\s*((public|private|protected|abstract|final|static|sealed|data|open)\s+)*(class|interface|enum|record|object)\s+{symbol}\b", "type"),
            (r"^\s*((public|private|protected|static|final|synchronized|abstract)\s+)*[\w<>\[\],\s]+\s+{symbol}\s*\(", "method"),
            (r"^\s*((private|public|override|suspend|inline)\s+)*fun\s+{symbol}\s*[<(]", "function"),
        ],
        "rb" => &[
            (r"^\s*def\s+(self\.)?{symbol}\b", "method"),
            (r"^\s*class\s+{symbol}\b", "class"),
            (r"^\s*module\s+{symbol}\b", "module"),
        ],
        _ => &[],
    }
}

fn compile_definitions(ext: &str, symbol: &str) -> Vec<(Regex, &'static str)> {
    let escaped = regex::escape(symbol);
    definition_patterns(ext)
        .iter()
        .filter_map(|(template, kind)| {
            Regex::new(&template.replace("{symbol}", &escaped))
                .ok()
                .map(|re| (re, *kind))
        })
        .collect()
}

/// Find where a function, type or variable is defined
pub struct FindSymbolTool {
    workspace: Workspace,
}

impl FindSymbolTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FindSymbolTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "find_symbol",
            description: "Find where a function, class, type or variable is defined. Understands Rust, \
                          Python, JavaScript/TypeScript, Go, Java/Kotlin and Ruby.",
            params: vec![
                ParamSpec::required("symbol", ParamType::String, "Exact name to look for"),
                ParamSpec::optional("path", ParamType::String, "Directory to search (default: working directory)"),
                ParamSpec::optional("file_types", ParamType::String, "Comma separated extensions, e.g. 'rs,py'"),
            ],
            effect: SideEffect::ReadOnly,
        }
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let symbol = args.str("symbol")?.trim().to_string();
        if symbol.is_empty() {
            return Err(ToolError::invalid_args("symbol is empty"));
        }
        let raw = args.opt_str("path").unwrap_or(".");
        let base = resolve_dir(&self.workspace, raw)?;
        let only: Option<Vec<String>> = args.opt_str("file_types").map(|list| {
            list.split(',')
                .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect()
        });

        let workspace = self.workspace.clone();
        let needle = symbol.clone();
        let findings = blocking(move || {
            let mut compiled: BTreeMap<String, Vec<(Regex, &'static str)>> = BTreeMap::new();
            let mut findings = Vec::new();
            for file in walk_files(&base, false).take(SYMBOL_MAX_FILES) {
                let Some(ext) = file.extension().map(|e| e.to_string_lossy().to_ascii_lowercase()) else {
                    continue;
                };
                if only.as_ref().is_some_and(|only| !only.contains(&ext)) {
                    continue;
                }
                let patterns = compiled
                    .entry(ext.clone())
                    .or_insert_with(|| compile_definitions(&ext, &needle));
                if patterns.is_empty() {
                    continue;
                }
                let Ok(content) = std::fs::read_to_string(&file) else {
                    continue;
                };
                for (i, line) in content.lines().enumerate() {
                    if let Some((_, kind)) = patterns.iter().find(|(re, _)| re.is_match(line)) {
                        findings.push(format!(
                            "{}:{} ({kind})\n  {}",
                            workspace.display(&file),
                            i + 1,
                            line.trim()
                        ));
                    }
                }
            }
            findings
        })
        .await?;

        if findings.is_empty() {
            return Ok(ToolOutput::text(format!("No definitions found for '{symbol}'")));
        }
        Ok(ToolOutput::text(format!(
            "Found {} definition(s) for '{symbol}':\n\n{}",
            findings.len(),
            findings.join("\n\n")
        )))
    }
}

fn language_for(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "rs" => "Rust",
        "py" | "pyw" | "pyi" => "Python",
        "js" | "mjs" | "cjs" | "jsx" => "JavaScript",
        "ts" | "tsx" => "TypeScript",
        "go" => "Go",
        "java" => "Java",
        "kt" | "kts" => "Kotlin",
        "c" | "h" | "cpp" | "cc" | "cxx" | "hpp" | "hxx" => "C/C++",
        "cs" => "C#",
        "rb" => "Ruby",
        "php" => "PHP",
        "swift" => "Swift",
        "scala" => "Scala",
        "html" | "htm" => "HTML",
        "css" | "scss" | "sass" | "less" => "CSS",
        "sql" => "SQL",
        "sh" | "bash" | "zsh" => "Shell",
        "toml" => "TOML",
        "yaml" | "yml" => "YAML",
        "json" => "JSON",
        "md" | "markdown" => "Markdown",
        "xml" => "XML",
        _ => return None,
    })
}

#[derive(Debug, Default, Clone, Copy)]
struct LineCounts {
    files: u64,
    lines: u64,
    code: u64,
    blank: u64,
    bytes: u64,
}

impl LineCounts {
    fn add(&mut self, other: LineCounts) {
        self.files += other.files;
        self.lines += other.lines;
        self.code += other.code;
        self.blank += other.blank;
        self.bytes += other.bytes;
    }
}

fn count_file(path: &Path) -> LineCounts {
    let bytes = std::fs::read(path).unwrap_or_default();
    let text = String::from_utf8_lossy(&bytes);
    let mut counts = LineCounts {
        files: 1,
        bytes: bytes.len() as u64,
        ..Default::default()
    };
    for line in text.lines() {
        counts.lines += 1;
        if line.trim().is_empty() {
            counts.blank += 1;
        } else {
            counts.code += 1;
        }
    }
    counts
}

fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

/// Lines of code per language
pub struct CodeStatsTool {
    workspace: Workspace,
}

impl CodeStatsTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for CodeStatsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "code_stats",
            description: "Count files and lines of code per language, with total size.",
            params: vec![ParamSpec::optional(
                "path",
                ParamType::String,
                "Directory to analyze (default: working directory)",
            )],
            effect: SideEffect::ReadOnly,
        }
    }

    async fn execute(&self, args: Args) -> Result<ToolOutput, ToolError> {
        let raw = args.opt_str("path").unwrap_or(".");
        let base = resolve_dir(&self.workspace, raw)?;

        let per_language = blocking(move || {
            let mut stats: BTreeMap<&'static str, LineCounts> = BTreeMap::new();
            for file in walk_files(&base, false) {
                let ext = file
                    .extension()
                    .map(|e| e.to_string_lossy().to_ascii_lowercase())
                    .unwrap_or_default();
                if let Some(language) = language_for(&ext) {
                    stats.entry(language).or_default().add(count_file(&file));
                }
            }
            stats
        })
        .await?;

        if per_language.is_empty() {
            return Ok(ToolOutput::text(format!("No source files found in {raw}")));
        }
        let mut rows: Vec<_> = per_language.into_iter().collect();
        rows.sort_by(|a, b| b.1.code.cmp(&a.1.code).then(a.0.cmp(b.0)));

        let rule = "-".repeat(55);
        let mut out = format!(
            "{:<15} {:>8} {:>10} {:>10} {:>8}\n{rule}\n",
            "Language", "Files", "Lines", "Code", "Blank"
        );
        let mut total = LineCounts::default();
        for (language, counts) in &rows {
            total.add(*counts);
            out.push_str(&format!(
                "{:<15} {:>8} {:>10} {:>10} {:>8}\n",
                language, counts.files, counts.lines, counts.code, counts.blank
            ));
        }
        out.push_str(&format!(
            "{rule}\n{:<15} {:>8} {:>10} {:>10} {:>8}\n\nTotal size: {}",
            "TOTAL",
            total.files,
            total.lines,
            total.code,
            total.blank,
            format_size(total.bytes)
        ));
        Ok(ToolOutput::text(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn project() -> (TempDir, Workspace) {
        let tmp = TempDir::new().unwrap();
        let files = [
            ("src/main.rs", "fn main() {\n    run();\n}\n\npub fn run() {}\n"),
            ("src/lib/mod.rs", "pub struct Runner;\n"),
            ("scripts/tool.py", "def run():\n    pass\n"),
            ("target/debug/gen.rs", "fn run() {}\n"),
            ("README.md", "# demo\n"),
        ];
        for (path, body) in files {
            let full = tmp.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, body).unwrap();
        }
        let ws = Workspace::new(tmp.path()).unwrap();
        (tmp, ws)
    }

    #[tokio::test]
    async fn test_tree_skips_build_dirs() {
        let (_tmp, ws) = project();
        let out = TreeTool::new(ws)
            .execute(Args::new(json!({"path": "src"})))
            .await
            .unwrap();
        assert_eq!(out.text, "src/\n├── lib/\n│   └── mod.rs\n└── main.rs");
    }

    #[tokio::test]
    async fn test_tree_depth_limit() {
        let (_tmp, ws) = project();
        let out = TreeTool::new(ws)
            .execute(Args::new(json!({"max_depth": 1})))
            .await
            .unwrap();
        assert!(out.text.contains("├── scripts/"));
        assert!(!out.text.contains("tool.py"));
        assert!(!out.text.contains("target"));
    }

    #[tokio::test]
    async fn test_find_symbol_across_languages() {
        let (_tmp, ws) = project();
        let tool = FindSymbolTool::new(ws);
        let out = tool.execute(Args::new(json!({"symbol": "run"}))).await.unwrap();
        assert!(out.text.starts_with("Found 2 definition(s)"));
        assert!(out.text.contains("src/main.rs:5 (function)"));
        assert!(out.text.contains("scripts/tool.py:1 (function)"));
        assert!(!out.text.contains("gen.rs"));

        let out = tool
            .execute(Args::new(json!({"symbol": "run", "file_types": ".py"})))
            .await
            .unwrap();
        assert!(out.text.starts_with("Found 1 definition(s)"));

        let out = tool.execute(Args::new(json!({"symbol": "Runner"}))).await.unwrap();
        assert!(out.text.contains("src/lib/mod.rs:1 (struct)"));
    }

    #[tokio::test]
    async fn test_find_symbol_none() {
        let (_tmp, ws) = project();
        let out = FindSymbolTool::new(ws)
            .execute(Args::new(json!({"symbol": "missing_fn"})))
            .await
            .unwrap();
        assert_eq!(out.text, "No definitions found for 'missing_fn'");
    }

    #[tokio::test]
    async fn test_code_stats() {
        let (_tmp, ws) = project();
        let out = CodeStatsTool::new(ws).execute(Args::new(json!({}))).await.unwrap();
        let rust = out.text.lines().find(|l| l.starts_with("Rust")).unwrap();
        let cols: Vec<&str> = rust.split_whitespace().collect();
        assert_eq!(cols, vec!["Rust", "2", "6", "5", "1"]);
        assert!(out.text.contains("Python"));
        assert!(out.text.contains("TOTAL"));
    }

    #[tokio::test]
    async fn test_analysis_rejects_escape() {
        let (_tmp, ws) = project();
        let err = CodeStatsTool::new(ws)
            .execute(Args::new(json!({"path": ".."})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ToolErrorKind::PathEscape);
    }
}
