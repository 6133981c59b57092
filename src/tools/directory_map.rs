//! read_directory_map：仓库目录结构概览（缩进树）

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::registry::names;
use crate::tools::workspace::{is_visible, Workspace};
use crate::tools::Tool;

pub struct DirectoryMapTool {
    workspace: Workspace,
    default_depth: usize,
    max_entries: usize,
}

impl DirectoryMapTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            default_depth: 3,
            max_entries: 400,
        }
    }

    pub fn with_limits(mut self, default_depth: usize, max_entries: usize) -> Self {
        self.default_depth = default_depth.max(1);
        self.max_entries = max_entries.max(1);
        self
    }
}

#[async_trait]
impl Tool for DirectoryMapTool {
    fn name(&self) -> &str {
        names::READ_DIRECTORY_MAP
    }

    fn description(&self) -> &str {
        "Show the directory tree of the repository. \
         Args: path (sub-directory, optional), max_depth (optional, default 3)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "max_depth": {"type": "integer", "minimum": 1}
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let depth = args
            .get("max_depth")
            .and_then(|v| v.as_u64())
            .map(|d| (d as usize).max(1))
            .unwrap_or(self.default_depth);

        let base = self.workspace.resolve(path)?;
        if !base.is_dir() {
            return Err(format!("Not a directory: {}", path));
        }

        let title = match self.workspace.display(&base) {
            s if s.is_empty() => ".".to_string(),
            s => s,
        };
        let mut out = format!("{}/\n", title);
        let mut count = 0;
        let mut truncated = false;

        let entries = walkdir::WalkDir::new(&base)
            .min_depth(1)
            .max_depth(depth)
            .sort_by(|a, b| {
                // 目录在前，其次按名称
                b.file_type()
                    .is_dir()
                    .cmp(&a.file_type().is_dir())
                    .then_with(|| a.file_name().cmp(b.file_name()))
            })
            .into_iter()
            .filter_entry(is_visible)
            .filter_map(|e| e.ok());

        for entry in entries {
            if count >= self.max_entries {
                truncated = true;
                break;
            }
            let indent = "  ".repeat(entry.depth());
            let name = entry.file_name().to_string_lossy();
            if entry.file_type().is_dir() {
                out.push_str(&format!("{}{}/\n", indent, name));
            } else {
                out.push_str(&format!("{}{}\n", indent, name));
            }
            count += 1;
        }

        if truncated {
            out.push_str(&format!("... (listing capped at {} entries)\n", self.max_entries));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tree_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src/cache")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("Cargo.toml"), "").unwrap();
        std::fs::write(root.join("src/lib.rs"), "").unwrap();
        std::fs::write(root.join("src/cache/mod.rs"), "").unwrap();

        let tool = DirectoryMapTool::new(Workspace::new(root));
        let out = tool.execute(Value::Null).await.unwrap();
        assert!(out.starts_with("./\n"));
        assert!(out.contains("  src/\n"));
        assert!(out.contains("    cache/\n"));
        assert!(out.contains("      mod.rs\n"));
        assert!(out.contains("  Cargo.toml\n"));
        assert!(!out.contains(".git"));
        // 目录排在文件之前
        assert!(out.find("src/").unwrap() < out.find("Cargo.toml").unwrap());

        let shallow = tool.execute(serde_json::json!({"max_depth": 1})).await.unwrap();
        assert!(!shallow.contains("lib.rs"));
    }

    #[tokio::test]
    async fn test_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let tool = DirectoryMapTool::new(Workspace::new(dir.path()));
        assert!(tool.execute(serde_json::json!({"path": "a.txt"})).await.is_err());
    }
}
