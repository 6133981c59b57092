//! 工具适配器
//!
//! 研究循环调用工具的唯一入口。invoke 永不失败：未知工具、参数错误、工具报错与超时
//! 都转成以 `Error:` 开头的文本，作为观察结果交回模型。每次调用输出一条 JSON 审计日志。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::tools::{Tool, ToolRegistry};

#[derive(Clone)]
pub struct ToolAdapter {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolAdapter {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 调用工具并返回文本结果
    pub async fn invoke(&self, tool_name: &str, args: Value) -> String {
        let start = Instant::now();
        let preview = args_preview(&args);

        let (outcome, text) = if !self.registry.contains(tool_name) {
            (
                "unknown",
                format!(
                    "Error: Unknown tool '{}'. Available tools: {}",
                    tool_name,
                    self.registry.tool_names().join(", ")
                ),
            )
        } else {
            match timeout(self.timeout, self.registry.execute(tool_name, args)).await {
                Ok(Ok(content)) => ("ok", content),
                Ok(Err(e)) => ("error", format!("Error: {e}")),
                Err(_) => (
                    "timeout",
                    format!(
                        "Error: Tool '{}' timed out after {}s",
                        tool_name,
                        self.timeout.as_secs()
                    ),
                ),
            }
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": outcome == "ok",
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit, "tool");

        text
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn schema_json(&self) -> String {
        self.registry.to_schema_json()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

/// 工具结果是否为错误文本
pub fn is_error_text(text: &str) -> bool {
    text.starts_with("Error:")
}
