//! 推理服务：reason(history) -> 工具调用 | 最终回答
//!
//! LlmReasoner 把任意 LlmClient 的文本输出解析为 ReasoningStep；
//! 调用格式为 `{"tool": "read_file", "args": {...}}` 或 `{"tool_calls": [...]}`，其余纯文本视为最终回答。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{LlmClient, Message, TokenUsage};

/// 模型请求的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// 单次推理的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ReasoningStep {
    /// 需要执行的工具调用（按顺序执行）
    ToolCalls(Vec<ToolCall>),
    /// 最终回答
    FinalAnswer(String),
    /// 输出看起来是工具调用但无法解析；携带原因，循环会要求模型重试
    Malformed(String),
}

/// 推理调用失败（网络、鉴权、超时等）；对当前研究是不可恢复的
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ReasoningError(pub String);

#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason(&self, history: &[Message]) -> Result<ReasoningStep, ReasoningError>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CallEnvelope {
    Many { tool_calls: Vec<ToolCall> },
    One(ToolCall),
}

/// 解析模型输出
///
/// 只有整段以 `{` 开头或含 ```json 代码块时才尝试按工具调用解析，
/// 避免把回答里引用的代码片段误判为调用。
pub fn parse_reasoning_output(output: &str) -> ReasoningStep {
    let trimmed = output.trim();

    let candidate = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()))
    } else if trimmed.starts_with('{') {
        Some(trimmed)
    } else {
        None
    };

    let Some(json_str) = candidate else {
        return ReasoningStep::FinalAnswer(trimmed.to_string());
    };

    match serde_json::from_str::<CallEnvelope>(json_str) {
        Ok(CallEnvelope::Many { tool_calls }) => {
            let calls: Vec<ToolCall> = tool_calls
                .into_iter()
                .filter(|c| !c.tool.trim().is_empty())
                .collect();
            if calls.is_empty() {
                ReasoningStep::FinalAnswer(trimmed.to_string())
            } else {
                ReasoningStep::ToolCalls(calls)
            }
        }
        Ok(CallEnvelope::One(call)) if !call.tool.trim().is_empty() => {
            ReasoningStep::ToolCalls(vec![call])
        }
        Ok(CallEnvelope::One(_)) => ReasoningStep::FinalAnswer(trimmed.to_string()),
        Err(e) if json_str.contains("\"tool") => {
            ReasoningStep::Malformed(format!("{}: {}", e, json_str))
        }
        Err(_) => ReasoningStep::FinalAnswer(trimmed.to_string()),
    }
}

/// 基于 LlmClient 的推理服务
pub struct LlmReasoner {
    llm: Arc<dyn LlmClient>,
}

impl LlmReasoner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn token_usage(&self) -> TokenUsage {
        self.llm.token_usage()
    }
}

#[async_trait]
impl Reasoner for LlmReasoner {
    async fn reason(&self, history: &[Message]) -> Result<ReasoningStep, ReasoningError> {
        let output = self.llm.complete(history).await.map_err(ReasoningError)?;
        Ok(parse_reasoning_output(&output))
    }
}
