//! 循环内的错误恢复
//!
//! 根据故障类型返回 RecoveryAction：可恢复的故障（模型输出格式错误、空回答）注入提示后继续，
//! 推理调用本身失败则终止本次研究，不做内部重试。

use thiserror::Error;

/// 研究循环中遇到的故障
#[derive(Debug, Clone, Error)]
pub enum LoopFault {
    /// 模型输出像工具调用但无法解析
    #[error("Malformed tool call: {0}")]
    MalformedOutput(String),
    /// 模型给出了空的最终回答
    #[error("Empty answer")]
    EmptyAnswer,
    /// 推理服务调用失败
    #[error("{0}")]
    Reasoning(String),
}

#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让模型重试
    RetryWithPrompt(String),
    /// 终止当前研究
    Abort,
}

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, fault: &LoopFault) -> RecoveryAction {
        match fault {
            LoopFault::MalformedOutput(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous tool call could not be parsed ({raw}). \
                 To call a tool, output exactly one JSON object and nothing else: \
                 {{\"tool\": \"<tool name>\", \"args\": {{...}}}}, or \
                 {{\"tool_calls\": [{{\"tool\": \"...\", \"args\": {{...}}}}]}}. \
                 To finish, answer in plain text."
            )),
            LoopFault::EmptyAnswer => RecoveryAction::RetryWithPrompt(
                "Your previous answer was empty. Either call a tool or write the final answer in plain text."
                    .to_string(),
            ),
            LoopFault::Reasoning(_) => RecoveryAction::Abort,
        }
    }
}
