//! read_file：读取仓库内文件，带行号

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::registry::names;
use crate::tools::workspace::Workspace;
use crate::tools::Tool;

/// 单次读取行数上限
pub const MAX_LINES_PER_READ: usize = 2000;

pub struct ReadFileTool {
    workspace: Workspace,
    /// 单次默认读取行数
    default_limit: usize,
    max_line_length: usize,
}

impl ReadFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            default_limit: 200,
            max_line_length: 400,
        }
    }

    pub fn with_limits(mut self, default_limit: usize, max_line_length: usize) -> Self {
        self.default_limit = default_limit.max(1);
        self.max_line_length = max_line_length.max(1);
        self
    }

    fn render(&self, path: &Path, content: &str, offset: usize, limit: usize) -> String {
        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();
        let shown = self.workspace.display(path);

        if total == 0 {
            return format!("File: {} is empty", shown);
        }
        if offset >= total {
            return format!(
                "File '{}' has {} lines. Requested start line {} is beyond end.",
                shown,
                total,
                offset + 1
            );
        }

        let end = offset.saturating_add(limit).min(total);
        let mut out = format!("File: {} (lines {}-{} of {})\n", shown, offset + 1, end, total);
        for (i, line) in lines[offset..end].iter().enumerate() {
            let line = if line.chars().count() > self.max_line_length {
                format!("{}...", line.chars().take(self.max_line_length).collect::<String>())
            } else {
                line.to_string()
            };
            out.push_str(&format!("{:4}: {}\n", offset + i + 1, line));
        }
        if end < total {
            out.push_str(&format!(
                "... ({} more lines, use start_line={} to continue)\n",
                total - end,
                end + 1
            ));
        }
        out
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        names::READ_FILE
    }

    fn description(&self) -> &str {
        "Read a file from the repository with line numbers. \
         Args: path (relative to the repository root), start_line (1-based, optional), \
         max_lines (optional, default 200, at most 2000)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "start_line": {"type": "integer", "minimum": 1},
                "max_lines": {"type": "integer", "minimum": 1, "maximum": MAX_LINES_PER_READ}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or("Missing required parameter: path")?;
        let offset = args
            .get("start_line")
            .and_then(|v| v.as_u64())
            .map(|v| usize::try_from(v).unwrap_or(usize::MAX))
            .unwrap_or(1)
            .saturating_sub(1);
        let limit = args
            .get("max_lines")
            .and_then(|v| v.as_u64())
            .map(|v| usize::try_from(v).unwrap_or(usize::MAX))
            .unwrap_or(self.default_limit)
            .clamp(1, MAX_LINES_PER_READ);

        let resolved = self.workspace.resolve(path)?;
        if !resolved.is_file() {
            return Err(format!("File not found: {}", path));
        }
        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| format!("Failed to read file '{}': {}", path, e))?;

        Ok(self.render(&resolved, &content, offset, limit))
    }
}
