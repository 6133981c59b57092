//! 工具调用格式的 JSON Schema（schemars 生成）
//!
//! 拼进系统提示，减少模型输出格式错误；结构与 `llm::parse_reasoning_output` 接受的格式一致。

use schemars::{schema_for, JsonSchema};

/// 单个调用：`{"tool": "...", "args": {...}}`
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 read_directory_map、resolve_symbol、read_file、search_code
    tool: String,
    /// 工具参数，依工具不同而不同（path、symbol、query 等）
    args: serde_json::Value,
}

/// 一次请求多个调用：`{"tool_calls": [...]}`，按顺序执行
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallsFormat {
    tool_calls: Vec<ToolCallFormat>,
}

pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

pub fn tool_calls_schema_json() -> String {
    let schema = schema_for!(ToolCallsFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_fields() {
        let single = tool_call_schema_json();
        assert!(single.contains("\"tool\""));
        assert!(single.contains("\"args\""));
        assert!(tool_calls_schema_json().contains("tool_calls"));
    }
}
