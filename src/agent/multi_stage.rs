//! 多阶段策略：规划 → 分题研究 → 综合 → 校验（→ 补充研究 → 再综合）
//!
//! 规划、研究、校验阶段的故障只降级（记录日志后跳过）；综合阶段失败或回答为空则整次运行失败。
//! 校验未通过时最多补充研究一次；再综合失败则保留第一次的回答。

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::prompts::{planner_prompt, SYNTHESIZER_PROMPT, VERIFIER_PROMPT};
use crate::agent::{Evidence, LoopBudget, ResearchLoop, RunContext, RunResult, Strategy};
use crate::core::{ResearchError, TaskEvent};
use crate::llm::{Message, Reasoner, ReasoningStep};
use crate::tools::ToolAdapter;

pub const MULTI_STAGE: &str = "multi_stage";

/// 阶段名（TaskEvent::Phase）
pub mod stages {
    pub const PLANNING: &str = "planning";
    pub const RESEARCHING: &str = "researching";
    pub const SYNTHESIZING: &str = "synthesizing";
    pub const VERIFYING: &str = "verifying";
    pub const RE_RESEARCHING: &str = "re_researching";
}

/// 一个子问题的研究结论
struct Finding {
    question: String,
    answer: String,
}

pub struct MultiStageStrategy {
    reasoner: Arc<dyn Reasoner>,
    researcher: ResearchLoop,
    max_sub_questions: usize,
}

impl MultiStageStrategy {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        tools: ToolAdapter,
        researcher_budget: LoopBudget,
        max_sub_questions: usize,
    ) -> Self {
        Self {
            researcher: ResearchLoop::new(reasoner.clone(), tools, researcher_budget).quiet(),
            reasoner,
            max_sub_questions: max_sub_questions.max(1),
        }
    }

    async fn plan(&self, prompt: &str, ctx: &RunContext) -> Result<Vec<String>, ResearchError> {
        ctx.checkpoint()?;
        let history = [
            Message::system(planner_prompt(self.max_sub_questions)),
            Message::user(prompt.to_string()),
        ];
        let result = self.reasoner.reason(&history).await;
        ctx.checkpoint()?;

        let plan = match result {
            Ok(ReasoningStep::FinalAnswer(text)) => parse_plan(&text, self.max_sub_questions),
            Ok(other) => {
                tracing::warn!(?other, "planner did not return a plan");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "planner failed, researching the prompt directly");
                Vec::new()
            }
        };
        if plan.is_empty() {
            return Ok(vec![prompt.to_string()]);
        }
        Ok(plan)
    }

    /// 研究一个子问题；非取消类错误降级为 None
    async fn research(
        &self,
        question: &str,
        ctx: &RunContext,
        evidence: &mut Vec<Evidence>,
        iterations: &mut usize,
        degraded: &mut bool,
    ) -> Result<Option<Finding>, ResearchError> {
        ctx.checkpoint()?;
        match self.researcher.run_after(question, ctx, *iterations).await {
            Ok(outcome) => {
                *iterations += outcome.iterations;
                *degraded |= outcome.degraded;
                evidence.extend(outcome.evidence);
                Ok(Some(Finding {
                    question: question.to_string(),
                    answer: outcome.answer,
                }))
            }
            Err(ResearchError::Cancelled) => Err(ResearchError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, question, "researcher failed, skipping sub-question");
                Ok(None)
            }
        }
    }

    async fn synthesize(
        &self,
        prompt: &str,
        findings: &[Finding],
        ctx: &RunContext,
    ) -> Result<String, ResearchError> {
        ctx.checkpoint()?;
        let history = [
            Message::system(SYNTHESIZER_PROMPT.to_string()),
            Message::user(format!(
                "Original question:\n{}\n\nFindings:\n{}",
                prompt,
                render_findings(findings)
            )),
        ];
        let step = self.reasoner.reason(&history).await?;
        ctx.checkpoint()?;

        match step {
            ReasoningStep::FinalAnswer(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            ReasoningStep::FinalAnswer(_) => {
                Err(ResearchError::SynthesisFailed("empty answer".to_string()))
            }
            ReasoningStep::ToolCalls(_) => Err(ResearchError::SynthesisFailed(
                "model requested tools instead of answering".to_string(),
            )),
            ReasoningStep::Malformed(raw) => Err(ResearchError::SynthesisFailed(raw)),
        }
    }

    /// 校验：通过返回 None，否则返回缺口描述；校验本身出错视为通过
    async fn verify(
        &self,
        prompt: &str,
        answer: &str,
        findings: &[Finding],
        ctx: &RunContext,
    ) -> Result<Option<String>, ResearchError> {
        ctx.checkpoint()?;
        let history = [
            Message::system(VERIFIER_PROMPT.to_string()),
            Message::user(format!(
                "Question:\n{}\n\nAnswer:\n{}\n\nFindings:\n{}",
                prompt,
                answer,
                render_findings(findings)
            )),
        ];
        let result = self.reasoner.reason(&history).await;
        ctx.checkpoint()?;

        match result {
            Ok(ReasoningStep::FinalAnswer(verdict)) if verdict_ok(&verdict) => Ok(None),
            Ok(ReasoningStep::FinalAnswer(gap)) if !gap.trim().is_empty() => {
                Ok(Some(gap.trim().to_string()))
            }
            Ok(other) => {
                tracing::warn!(?other, "verifier returned no verdict, accepting answer");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(error = %e, "verifier failed, accepting answer");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Strategy for MultiStageStrategy {
    fn name(&self) -> &str {
        MULTI_STAGE
    }

    async fn run(&self, prompt: &str, ctx: &RunContext) -> Result<RunResult, ResearchError> {
        let mut evidence = Vec::new();
        let mut iterations = 0;
        let mut degraded = false;

        ctx.emit(TaskEvent::phase(stages::PLANNING));
        let plan = self.plan(prompt, ctx).await?;
        tracing::info!(sub_questions = plan.len(), "research plan ready");

        ctx.emit(TaskEvent::phase(stages::RESEARCHING));
        let mut findings = Vec::new();
        for question in &plan {
            if let Some(f) = self
                .research(question, ctx, &mut evidence, &mut iterations, &mut degraded)
                .await?
            {
                findings.push(f);
            }
        }
        if findings.is_empty() {
            degraded = true;
        }

        ctx.emit(TaskEvent::phase(stages::SYNTHESIZING));
        let mut answer = self.synthesize(prompt, &findings, ctx).await?;

        ctx.emit(TaskEvent::phase(stages::VERIFYING));
        if let Some(gap) = self.verify(prompt, &answer, &findings, ctx).await? {
            tracing::info!(gap = %gap, "verification found a gap, researching once more");
            ctx.emit(TaskEvent::phase(stages::RE_RESEARCHING));
            let question = format!("{}\n\nFocus on this gap in the current answer: {}", prompt, gap);
            if let Some(f) = self
                .research(&question, ctx, &mut evidence, &mut iterations, &mut degraded)
                .await?
            {
                findings.push(f);
                ctx.emit(TaskEvent::phase(stages::SYNTHESIZING));
                match self.synthesize(prompt, &findings, ctx).await {
                    Ok(revised) => answer = revised,
                    Err(ResearchError::Cancelled) => return Err(ResearchError::Cancelled),
                    Err(e) => tracing::warn!(error = %e, "re-synthesis failed, keeping first answer"),
                }
            }
        }

        Ok(RunResult {
            answer,
            evidence,
            iterations,
            strategy: MULTI_STAGE.to_string(),
            degraded,
        })
    }
}

fn render_findings(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return "(no findings could be gathered)".to_string();
    }
    findings
        .iter()
        .enumerate()
        .map(|(i, f)| format!("### {}. {}\n{}", i + 1, f.question, f.answer))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 解析规划输出：JSON 字符串数组，或每行一个子问题（去掉列表符号与编号）
pub fn parse_plan(text: &str, max: usize) -> Vec<String> {
    let trimmed = text.trim();
    let items: Vec<String> = match serde_json::from_str::<Vec<String>>(trimmed) {
        Ok(list) => list,
        Err(_) => trimmed.lines().map(strip_list_marker).map(str::to_string).collect(),
    };

    let mut plan: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim();
        if item.is_empty() || plan.iter().any(|p| p == item) {
            continue;
        }
        plan.push(item.to_string());
        if plan.len() >= max {
            break;
        }
    }
    plan
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .unwrap_or(line);
    // "1." / "2)" 形式的编号
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim();
        }
    }
    line.trim()
}

/// 校验结论是否为 OK（大小写不敏感，允许结尾标点）
pub fn verdict_ok(verdict: &str) -> bool {
    let v = verdict.trim();
    let upper = v.to_uppercase();
    if !upper.starts_with("OK") {
        return false;
    }
    !upper[2..].chars().next().map(|c| c.is_alphanumeric()).unwrap_or(false)
}
