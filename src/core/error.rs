//! 研究错误类型
//!
//! 工具故障不在这里：ToolAdapter 把它们转成文本结果，循环继续。预算耗尽与缓存未命中也不是错误。

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ResearchError {
    /// 推理调用失败；消息原样保留并写入查询记录
    #[error("{0}")]
    ReasoningFault(String),

    /// 该冲突域已有非缓存查询在运行
    #[error("A research query is already running for domain '{domain}'")]
    ConflictInFlight { domain: String },

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// 订阅方看到的任务失败（携带任务的错误消息）
    #[error("{0}")]
    TaskFailed(String),

    #[error("Cancelled")]
    Cancelled,

    /// 多阶段策略的综合阶段没有产出非空回答
    #[error("Synthesis produced no answer: {0}")]
    SynthesisFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Query store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<crate::llm::ReasoningError> for ResearchError {
    fn from(e: crate::llm::ReasoningError) -> Self {
        Self::ReasoningFault(e.0)
    }
}
