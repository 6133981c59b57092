//! resolve_symbol：按名称定位符号定义（函数、类型、模块……）
//!
//! 基于定义关键字的正则匹配，覆盖 Rust / Python / JS / TS / Go / Java 等常见写法。

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::tools::registry::names;
use crate::tools::workspace::{is_visible, truncate_chars, Workspace};
use crate::tools::Tool;

/// 定义关键字
const DEFINITION_KEYWORDS: &str = r"fn|struct|enum|trait|type|const|static|mod|union|macro_rules!|class|def|function|interface|func|let|var";

/// 参与解析的源码扩展名
const SOURCE_EXTENSIONS: [&str; 14] = [
    "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "kt", "c", "h", "cpp", "hpp", "rb",
];

pub struct ResolveSymbolTool {
    workspace: Workspace,
    max_definitions: usize,
    context_lines: usize,
}

struct Definition {
    path: String,
    line: usize,
    snippet: Vec<String>,
}

impl ResolveSymbolTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            max_definitions: 20,
            context_lines: 4,
        }
    }

    fn definition_regex(symbol: &str) -> Result<Regex, String> {
        // 支持 `Type::method` 形式，按最后一段查找
        let name = symbol.rsplit("::").next().unwrap_or(symbol).trim();
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(format!("Invalid symbol name: '{}'", symbol));
        }
        Regex::new(&format!(
            r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:export\s+)?(?:default\s+)?(?:async\s+)?(?:unsafe\s+)?(?:{})\s+{}\b",
            DEFINITION_KEYWORDS,
            regex::escape(name)
        ))
        .map_err(|e| format!("Failed to build symbol pattern: {}", e))
    }

    fn find(&self, re: &Regex) -> Vec<Definition> {
        let mut found = Vec::new();
        let entries = walkdir::WalkDir::new(self.workspace.root())
            .sort_by_file_name()
            .into_iter()
            .filter_entry(is_visible)
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .and_then(|x| x.to_str())
                    .map(|x| SOURCE_EXTENSIONS.contains(&x))
                    .unwrap_or(false)
            });

        for entry in entries {
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            let lines: Vec<&str> = content.lines().collect();
            for (i, line) in lines.iter().enumerate() {
                if !re.is_match(line) {
                    continue;
                }
                let end = (i + 1 + self.context_lines).min(lines.len());
                found.push(Definition {
                    path: self.workspace.display(entry.path()),
                    line: i + 1,
                    snippet: lines[i..end]
                        .iter()
                        .map(|l| truncate_chars(l, 160))
                        .collect(),
                });
                if found.len() >= self.max_definitions {
                    return found;
                }
            }
        }
        found
    }
}

#[async_trait]
impl Tool for ResolveSymbolTool {
    fn name(&self) -> &str {
        names::RESOLVE_SYMBOL
    }

    fn description(&self) -> &str {
        "Find where a symbol (function, type, trait, class, module) is defined. \
         Args: symbol (required, e.g. \"QueryCache\" or \"QueryCache::lookup\")."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "symbol": {"type": "string"}
            },
            "required": ["symbol"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let symbol = args
            .get("symbol")
            .and_then(|v| v.as_str())
            .ok_or("Missing required parameter: symbol")?;
        let re = Self::definition_regex(symbol)?;
        let defs = self.find(&re);

        if defs.is_empty() {
            return Ok(format!("No definition found for '{}'", symbol));
        }

        let mut out = format!("{} definition(s) of '{}'\n", defs.len(), symbol);
        for def in defs {
            out.push_str(&format!("\n{}:{}\n", def.path, def.line));
            for (offset, line) in def.snippet.iter().enumerate() {
                out.push_str(&format!("  {:4}: {}\n", def.line + offset, line));
            }
        }
        Ok(out)
    }
}
