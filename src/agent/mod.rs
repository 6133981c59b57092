//! 研究策略
//!
//! 每个策略是实现 Strategy 的独立类型，通过名称注册到 StrategyRegistry：
//! - single_pass：单线程的工具增强推理循环
//! - multi_stage：规划 → 分题研究 → 综合 → 校验（最多一次补充研究）
//!
//! 策略在 RunContext 上协作式取消：每次推理前后、每次工具调用前检查一次。

pub mod multi_stage;
pub mod prompts;
pub mod registry;
pub mod research_loop;
pub mod single_pass;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::{EventSink, ResearchError, TaskEvent};

pub use crate::store::Evidence;
pub use multi_stage::MultiStageStrategy;
pub use registry::{StrategyChoice, StrategyRegistry};
pub use research_loop::{LoopBudget, LoopOutcome, ResearchLoop};
pub use single_pass::SinglePassStrategy;

/// 一次策略执行的结果
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub answer: String,
    pub evidence: Vec<Evidence>,
    /// 推理调用轮数（多阶段为各研究子循环之和）
    pub iterations: usize,
    pub strategy: String,
    /// 预算耗尽且模型未给出最终回答时，回答由证据拼装
    pub degraded: bool,
}

/// 策略运行上下文：取消令牌 + 事件句柄
#[derive(Clone)]
pub struct RunContext {
    cancel: CancellationToken,
    events: EventSink,
}

impl RunContext {
    pub fn new(cancel: CancellationToken, events: EventSink) -> Self {
        Self { cancel, events }
    }

    /// 不挂在任务上的上下文（直接调用策略时使用）
    pub fn detached() -> Self {
        Self::new(CancellationToken::new(), EventSink::detached())
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 取消检查点
    pub fn checkpoint(&self) -> Result<(), ResearchError> {
        if self.cancel.is_cancelled() {
            Err(ResearchError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn emit(&self, event: TaskEvent) {
        self.events.emit(event);
    }
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, prompt: &str, ctx: &RunContext) -> Result<RunResult, ResearchError>;
}
