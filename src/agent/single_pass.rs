//! 单线程策略：一个研究循环跑到底

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{LoopBudget, ResearchLoop, RunContext, RunResult, Strategy};
use crate::core::ResearchError;
use crate::llm::Reasoner;
use crate::tools::ToolAdapter;

pub const SINGLE_PASS: &str = "single_pass";

pub struct SinglePassStrategy {
    research: ResearchLoop,
}

impl SinglePassStrategy {
    pub fn new(reasoner: Arc<dyn Reasoner>, tools: ToolAdapter, budget: LoopBudget) -> Self {
        Self {
            research: ResearchLoop::new(reasoner, tools, budget),
        }
    }
}

#[async_trait]
impl Strategy for SinglePassStrategy {
    fn name(&self) -> &str {
        SINGLE_PASS
    }

    async fn run(&self, prompt: &str, ctx: &RunContext) -> Result<RunResult, ResearchError> {
        let outcome = self.research.run(prompt, ctx).await?;
        tracing::info!(
            iterations = outcome.iterations,
            evidence = outcome.evidence.len(),
            degraded = outcome.degraded,
            "single-pass research finished"
        );
        Ok(RunResult {
            answer: outcome.answer,
            evidence: outcome.evidence,
            iterations: outcome.iterations,
            strategy: SINGLE_PASS.to_string(),
            degraded: outcome.degraded,
        })
    }
}
