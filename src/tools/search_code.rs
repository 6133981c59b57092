//! search_code：在仓库中做词法搜索（子串或正则），返回文件与行号

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::registry::names;
use crate::tools::workspace::{is_visible, truncate_chars, Workspace};
use crate::tools::Tool;

pub struct SearchCodeTool {
    workspace: Workspace,
    max_results: usize,
    max_file_size: u64,
}

struct FileMatches {
    path: PathBuf,
    lines: Vec<(usize, String)>,
}

enum Matcher {
    Literal(String),
    CaseInsensitive(String),
    Regex(regex::Regex),
}

impl Matcher {
    fn is_match(&self, line: &str) -> bool {
        match self {
            Self::Literal(p) => line.contains(p.as_str()),
            Self::CaseInsensitive(p) => line.to_lowercase().contains(p.as_str()),
            Self::Regex(re) => re.is_match(line),
        }
    }
}

impl SearchCodeTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            max_results: 50,
            max_file_size: 1024 * 1024,
        }
    }

    pub fn with_limits(mut self, max_results: usize, max_file_size: u64) -> Self {
        self.max_results = max_results.max(1);
        self.max_file_size = max_file_size;
        self
    }

    fn search_file(path: &Path, matcher: &Matcher) -> Vec<(usize, String)> {
        // 二进制或不可读文件直接跳过
        let Ok(content) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| matcher.is_match(line))
            .map(|(i, line)| (i + 1, line.trim_end().to_string()))
            .collect()
    }

    fn search(
        &self,
        base: &Path,
        matcher: &Matcher,
        include: Option<&glob::Pattern>,
    ) -> (Vec<FileMatches>, usize) {
        let mut files = Vec::new();
        let mut total = 0;

        let entries = walkdir::WalkDir::new(base)
            .max_depth(16)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(is_visible)
            .filter_map(|e| e.ok());

        for entry in entries {
            if total >= self.max_results {
                break;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.metadata().map(|m| m.len() > self.max_file_size).unwrap_or(true) {
                continue;
            }
            if let Some(pattern) = include {
                let name = entry.file_name().to_string_lossy();
                if !pattern.matches(&name) {
                    continue;
                }
            }
            let mut lines = Self::search_file(entry.path(), matcher);
            if lines.is_empty() {
                continue;
            }
            lines.truncate(self.max_results - total);
            total += lines.len();
            files.push(FileMatches {
                path: entry.path().to_path_buf(),
                lines,
            });
        }
        (files, total)
    }
}

#[async_trait]
impl Tool for SearchCodeTool {
    fn name(&self) -> &str {
        names::SEARCH_CODE
    }

    fn description(&self) -> &str {
        "Search the repository for a text pattern. \
         Args: query (required), path (sub-directory, optional), \
         include (file glob such as \"*.rs\", optional), regex (bool, optional), \
         case_sensitive (bool, optional, default false)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "path": {"type": "string"},
                "include": {"type": "string"},
                "regex": {"type": "boolean"},
                "case_sensitive": {"type": "boolean"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .filter(|q| !q.trim().is_empty())
            .ok_or("Missing required parameter: query")?;
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let use_regex = args.get("regex").and_then(|v| v.as_bool()).unwrap_or(false);
        let case_sensitive = args
            .get("case_sensitive")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let include = match args.get("include").and_then(|v| v.as_str()) {
            Some(p) => Some(
                glob::Pattern::new(p).map_err(|e| format!("Invalid include pattern '{}': {}", p, e))?,
            ),
            None => None,
        };

        let matcher = if use_regex {
            let re = regex::RegexBuilder::new(query)
                .case_insensitive(!case_sensitive)
                .build()
                .map_err(|e| format!("Invalid regex pattern: {}", e))?;
            Matcher::Regex(re)
        } else if case_sensitive {
            Matcher::Literal(query.to_string())
        } else {
            Matcher::CaseInsensitive(query.to_lowercase())
        };

        let base = self.workspace.resolve(path)?;
        if !base.exists() {
            return Err(format!("Path not found: {}", path));
        }

        let (files, total) = if base.is_file() {
            let lines = Self::search_file(&base, &matcher);
            let total = lines.len();
            let files = if lines.is_empty() {
                Vec::new()
            } else {
                vec![FileMatches { path: base, lines }]
            };
            (files, total)
        } else {
            self.search(&base, &matcher, include.as_ref())
        };

        if files.is_empty() {
            return Ok(format!("No matches found for '{}'", query));
        }

        let mut out = format!("Found {} matches for '{}'\n", total, query);
        for file in files {
            out.push_str(&format!("\n{}:\n", self.workspace.display(&file.path)));
            for (line_no, line) in &file.lines {
                out.push_str(&format!("  {:4}: {}\n", line_no, truncate_chars(line.trim(), 160)));
            }
        }
        if total >= self.max_results {
            out.push_str(&format!("\n(results capped at {})\n", self.max_results));
        }
        Ok(out)
    }
}
