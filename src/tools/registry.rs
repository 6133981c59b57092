//! 工具注册表
//!
//! 所有研究工具实现 Tool trait（name / description / execute），由 ToolRegistry 按名注册与查找，
//! ToolAdapter 在调用时加超时并把所有失败转成文本结果。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// 内置研究工具名
pub mod names {
    pub const READ_DIRECTORY_MAP: &str = "read_directory_map";
    pub const RESOLVE_SYMBOL: &str = "resolve_symbol";
    pub const READ_FILE: &str = "read_file";
    pub const SEARCH_CODE: &str = "search_code";

    /// 精确定位类工具：checkpoint 时若一个都没用过，会提示模型使用
    pub const PRECISION_TOOLS: [&str; 2] = [RESOLVE_SYMBOL, READ_FILE];
}

/// 工具 trait：名称、描述（供模型理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（对应调用 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema，默认不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；Err 为参数错误或工具故障的描述
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 按名称存储 Arc<dyn Tool>；BTreeMap 保证列出顺序稳定（提示词可复现）
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous instance replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<String, String> {
        let tool = self.tools.get(name).ok_or_else(|| format!("Unknown tool: {name}"))?;
        tool.execute(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 生成工具清单 JSON（名称、描述、参数），拼入系统提示
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": name,
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase the text argument"
        }
        async fn execute(&self, args: Value) -> Result<String, String> {
            args.get("text")
                .and_then(|v| v.as_str())
                .map(|s| s.to_uppercase())
                .ok_or_else(|| "Missing required parameter: text".to_string())
        }
    }

    #[tokio::test]
    async fn test_registry_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(Upper);
        assert!(registry.contains("upper"));
        assert_eq!(
            registry.execute("upper", serde_json::json!({"text": "abc"})).await,
            Ok("ABC".to_string())
        );
        assert!(registry.execute("upper", serde_json::json!({})).await.is_err());
        assert_eq!(
            registry.execute("nope", Value::Null).await,
            Err("Unknown tool: nope".to_string())
        );
    }

    #[test]
    fn test_schema_lists_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(Upper);
        let schema = registry.to_schema_json();
        assert!(schema.contains("\"upper\""));
        assert!(schema.contains("Uppercase"));
    }
}
