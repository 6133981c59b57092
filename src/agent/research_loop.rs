//! 有界的工具增强推理循环
//!
//! 历史 = 系统提示 + 问题；每轮调用一次 reason(history)：
//! 工具调用按顺序经 ToolAdapter 执行，结果以 Observation 写回历史并记为证据；
//! 文本回答即最终回答。剩余轮数不足 synthesis_margin 时提示模型立即作答，
//! 到 checkpoint_iteration 仍未用过精确工具时提示使用。
//! 轮数用尽后进入 BudgetExceeded → Synthesizing，用已有证据强制综合；
//! 模型仍不作答时由证据拼装降级回答，回答永不为空。

use std::collections::HashSet;
use std::sync::Arc;

use crate::agent::prompts::{checkpoint_hint, research_system_prompt, SYNTHESIS_HINT, SYNTHESIS_PROMPT};
use crate::agent::{Evidence, RunContext};
use crate::core::{AgentPhase, LoopFault, RecoveryAction, RecoveryEngine, ResearchError, TaskEvent};
use crate::llm::{Message, Reasoner, ReasoningStep, ToolCall};
use crate::tools::names::PRECISION_TOOLS;
use crate::tools::workspace::truncate_chars;
use crate::tools::ToolAdapter;

/// 证据摘要最大字符数
const EVIDENCE_SUMMARY_CHARS: usize = 200;

/// 循环预算
#[derive(Debug, Clone, Copy)]
pub struct LoopBudget {
    pub max_iterations: usize,
    /// 剩余轮数 ≤ 该值时提示立即综合
    pub synthesis_margin: usize,
    /// 在第几轮检查精确工具是否用过；0 表示不检查
    pub checkpoint_iteration: usize,
    /// 写回历史的单次工具输出上限（字符）
    pub max_tool_output_chars: usize,
}

impl Default for LoopBudget {
    fn default() -> Self {
        Self {
            max_iterations: 12,
            synthesis_margin: 2,
            checkpoint_iteration: 6,
            max_tool_output_chars: 8000,
        }
    }
}

impl LoopBudget {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }
}

/// 循环结束时的产出
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub answer: String,
    pub evidence: Vec<Evidence>,
    pub iterations: usize,
    pub degraded: bool,
}

/// 单次循环执行的可变状态
struct AgentRun {
    phase: AgentPhase,
    iterations: usize,
    evidence: Vec<Evidence>,
    history: Vec<Message>,
    tools_used: HashSet<String>,
}

impl AgentRun {
    fn new(history: Vec<Message>) -> Self {
        Self {
            phase: AgentPhase::Iterating,
            iterations: 0,
            evidence: Vec::new(),
            history,
            tools_used: HashSet::new(),
        }
    }

    fn enter(&mut self, next: AgentPhase) {
        if !self.phase.can_transition_to(next) {
            tracing::warn!(
                from = self.phase.as_str(),
                to = next.as_str(),
                "unexpected phase transition"
            );
        }
        self.phase = next;
    }
}

pub struct ResearchLoop {
    reasoner: Arc<dyn Reasoner>,
    tools: ToolAdapter,
    budget: LoopBudget,
    recovery: RecoveryEngine,
    system_prompt: String,
    /// 是否向任务发出阶段事件（多阶段策略的子循环关闭，只保留进度事件）
    emit_phases: bool,
}

impl ResearchLoop {
    pub fn new(reasoner: Arc<dyn Reasoner>, tools: ToolAdapter, budget: LoopBudget) -> Self {
        let system_prompt = research_system_prompt(&tools);
        Self {
            reasoner,
            tools,
            budget,
            recovery: RecoveryEngine::new(),
            system_prompt,
            emit_phases: true,
        }
    }

    pub fn quiet(mut self) -> Self {
        self.emit_phases = false;
        self
    }

    pub fn budget(&self) -> LoopBudget {
        self.budget
    }

    fn phase(&self, run: &mut AgentRun, next: AgentPhase, ctx: &RunContext) {
        run.enter(next);
        if self.emit_phases {
            ctx.emit(TaskEvent::phase(next.as_str()));
        }
    }

    pub async fn run(&self, question: &str, ctx: &RunContext) -> Result<LoopOutcome, ResearchError> {
        self.run_after(question, ctx, 0).await
    }

    /// 同 run；进度事件中的迭代号从 offset 之后继续计数（预算仍按本轮计算）
    pub async fn run_after(
        &self,
        question: &str,
        ctx: &RunContext,
        offset: usize,
    ) -> Result<LoopOutcome, ResearchError> {
        let max = self.budget.max_iterations.max(1);
        let mut run = AgentRun::new(vec![
            Message::system(self.system_prompt.clone()),
            Message::user(question.to_string()),
        ]);
        if self.emit_phases {
            ctx.emit(TaskEvent::phase(AgentPhase::Iterating.as_str()));
        }

        let mut margin_hint_sent = false;
        let mut final_answer: Option<String> = None;

        while run.iterations < max {
            ctx.checkpoint()?;
            let iteration = run.iterations + 1;

            let remaining = max - run.iterations;
            if !margin_hint_sent && remaining <= self.budget.synthesis_margin {
                run.history.push(Message::user(SYNTHESIS_HINT.to_string()));
                margin_hint_sent = true;
            }
            if iteration == self.budget.checkpoint_iteration {
                self.maybe_nudge_precision(&mut run);
            }

            let step = self.reason(&run.history).await?;
            ctx.checkpoint()?;
            run.iterations = iteration;

            match step {
                ReasoningStep::ToolCalls(calls) => {
                    self.phase(&mut run, AgentPhase::ExecutingTool, ctx);
                    self.execute_calls(&mut run, offset + iteration, calls, ctx).await?;
                    self.phase(&mut run, AgentPhase::Iterating, ctx);
                }
                ReasoningStep::FinalAnswer(text) if !text.trim().is_empty() => {
                    run.history.push(Message::assistant(text.clone()));
                    final_answer = Some(text.trim().to_string());
                    break;
                }
                ReasoningStep::FinalAnswer(_) => self.recover(&mut run, LoopFault::EmptyAnswer)?,
                ReasoningStep::Malformed(raw) => {
                    tracing::debug!(iteration, "malformed tool call from model");
                    self.recover(&mut run, LoopFault::MalformedOutput(truncate_chars(&raw, 300)))?
                }
            }
        }

        let (answer, degraded) = match final_answer {
            Some(answer) => {
                self.phase(&mut run, AgentPhase::Synthesizing, ctx);
                (answer, false)
            }
            None => {
                tracing::info!(iterations = run.iterations, "iteration budget exhausted, forcing synthesis");
                self.phase(&mut run, AgentPhase::BudgetExceeded, ctx);
                self.phase(&mut run, AgentPhase::Synthesizing, ctx);
                self.force_synthesis(&mut run, question, ctx).await?
            }
        };
        run.enter(AgentPhase::Done);

        Ok(LoopOutcome {
            answer,
            evidence: run.evidence,
            iterations: run.iterations,
            degraded,
        })
    }

    async fn reason(&self, history: &[Message]) -> Result<ReasoningStep, ResearchError> {
        match self.reasoner.reason(history).await {
            Ok(step) => Ok(step),
            Err(e) => {
                let action = self.recovery.handle(&LoopFault::Reasoning(e.0.clone()));
                tracing::warn!(error = %e, ?action, "reasoning call failed");
                Err(e.into())
            }
        }
    }

    fn recover(&self, run: &mut AgentRun, fault: LoopFault) -> Result<(), ResearchError> {
        match self.recovery.handle(&fault) {
            RecoveryAction::RetryWithPrompt(prompt) => {
                run.history.push(Message::user(prompt));
                Ok(())
            }
            RecoveryAction::Abort => Err(ResearchError::ReasoningFault(fault.to_string())),
        }
    }

    fn maybe_nudge_precision(&self, run: &mut AgentRun) {
        let used_precision = PRECISION_TOOLS.iter().any(|t| run.tools_used.contains(*t));
        if used_precision {
            return;
        }
        let available: Vec<&str> = PRECISION_TOOLS
            .iter()
            .copied()
            .filter(|t| self.tools.has_tool(t))
            .collect();
        if !available.is_empty() {
            run.history.push(Message::user(checkpoint_hint(&available)));
        }
    }

    async fn execute_calls(
        &self,
        run: &mut AgentRun,
        iteration: usize,
        calls: Vec<ToolCall>,
        ctx: &RunContext,
    ) -> Result<(), ResearchError> {
        let calls_json = serde_json::json!({ "tool_calls": &calls }).to_string();
        run.history.push(Message::assistant(calls_json));

        for call in calls {
            ctx.checkpoint()?;
            let output = self.tools.invoke(&call.tool, call.args.clone()).await;
            let summary = truncate_chars(output.trim(), EVIDENCE_SUMMARY_CHARS);

            run.history.push(Message::observation(
                &call.tool,
                &truncate_chars(&output, self.budget.max_tool_output_chars),
            ));
            run.tools_used.insert(call.tool.clone());

            ctx.emit(TaskEvent::Progress {
                iteration,
                tool: call.tool.clone(),
                args: call.args.clone(),
                summary: summary.clone(),
            });
            run.evidence.push(Evidence {
                tool: call.tool,
                args: call.args,
                summary,
            });
        }
        Ok(())
    }

    async fn force_synthesis(
        &self,
        run: &mut AgentRun,
        question: &str,
        ctx: &RunContext,
    ) -> Result<(String, bool), ResearchError> {
        ctx.checkpoint()?;
        run.history.push(Message::user(SYNTHESIS_PROMPT.to_string()));
        let step = self.reason(&run.history).await?;
        ctx.checkpoint()?;

        match step {
            ReasoningStep::FinalAnswer(text) if !text.trim().is_empty() => {
                Ok((text.trim().to_string(), false))
            }
            _ => {
                tracing::warn!("model did not synthesize, assembling answer from evidence");
                Ok((degraded_answer(question, &run.evidence), true))
            }
        }
    }
}

/// 由证据拼装的降级回答
pub fn degraded_answer(question: &str, evidence: &[Evidence]) -> String {
    if evidence.is_empty() {
        return format!(
            "The research budget was exhausted before an answer to \"{}\" could be synthesized, \
             and no tool evidence was collected.",
            question
        );
    }
    let mut out = format!(
        "The research budget was exhausted before a final answer to \"{}\" was written. \
         Evidence collected:\n",
        question
    );
    for (i, e) in evidence.iter().enumerate() {
        out.push_str(&format!("\n{}. {} {}\n   {}", i + 1, e.tool, e.args, e.summary));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ReasoningError, ScriptedReasoner};
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Echo(&'static str);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "Echoes its arguments"
        }
        async fn execute(&self, args: Value) -> Result<String, String> {
            Ok(format!("{} saw {}", self.0, args))
        }
    }

    fn adapter() -> ToolAdapter {
        let mut registry = ToolRegistry::new();
        registry.register(Echo("search_code"));
        registry.register(Echo("read_file"));
        registry.register(Echo("resolve_symbol"));
        ToolAdapter::new(registry, 5)
    }

    fn search_call() -> ReasoningStep {
        ReasoningStep::ToolCalls(vec![ToolCall::new("search_code", json!({"query": "cache"}))])
    }

    #[tokio::test]
    async fn test_answer_after_tool_call() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Ok(search_call()),
            Ok(ReasoningStep::FinalAnswer("The cache lives in src/cache.".into())),
        ]));
        let lp = ResearchLoop::new(reasoner.clone(), adapter(), LoopBudget::default());
        let out = lp.run("Where is the cache?", &RunContext::detached()).await.unwrap();

        assert_eq!(out.answer, "The cache lives in src/cache.");
        assert_eq!(out.iterations, 2);
        assert!(!out.degraded);
        assert_eq!(out.evidence.len(), 1);
        assert_eq!(out.evidence[0].tool, "search_code");
        assert!(out.evidence[0].summary.starts_with("search_code saw"));

        // 第二次推理时历史中已有观察结果
        let histories = reasoner.histories();
        assert_eq!(histories[0].len(), 2);
        assert!(histories[1]
            .iter()
            .any(|m| m.content.starts_with("Observation from search_code:")));
    }

    #[tokio::test]
    async fn test_budget_forces_synthesis() {
        let reasoner = Arc::new(ScriptedReasoner::always(search_call()));
        let lp = ResearchLoop::new(reasoner.clone(), adapter(), LoopBudget::default());
        let out = lp.run("How does the cache work?", &RunContext::detached()).await.unwrap();

        assert_eq!(out.iterations, 12);
        assert_eq!(out.evidence.len(), 12);
        assert!(out.degraded);
        assert!(!out.answer.is_empty());
        // 12 轮 + 1 次强制综合
        assert_eq!(reasoner.calls(), 13);
        let last = reasoner.histories().pop().unwrap();
        assert_eq!(last.last().unwrap().content, SYNTHESIS_PROMPT);
    }

    #[tokio::test]
    async fn test_synthesis_answer_used_when_given() {
        let mut script: Vec<_> = (0..3).map(|_| Ok(search_call())).collect();
        script.push(Ok(ReasoningStep::FinalAnswer("Synthesized.".into())));
        let reasoner = Arc::new(ScriptedReasoner::new(script));
        let budget = LoopBudget::default().with_max_iterations(3);
        let lp = ResearchLoop::new(reasoner, adapter(), budget);
        let out = lp.run("q", &RunContext::detached()).await.unwrap();
        assert_eq!(out.answer, "Synthesized.");
        assert!(!out.degraded);
        assert_eq!(out.iterations, 3);
    }

    #[tokio::test]
    async fn test_fault_during_forced_synthesis_fails_run() {
        let mut script: Vec<_> = (0..3).map(|_| Ok(search_call())).collect();
        script.push(Err(ReasoningError("model overloaded".into())));
        let reasoner = Arc::new(ScriptedReasoner::new(script));
        let lp = ResearchLoop::new(reasoner, adapter(), LoopBudget::default().with_max_iterations(3));
        let err = lp.run("q", &RunContext::detached()).await.unwrap_err();
        assert!(matches!(err, ResearchError::ReasoningFault(ref m) if m == "model overloaded"));
    }

    #[tokio::test]
    async fn test_margin_and_checkpoint_hints() {
        let reasoner = Arc::new(ScriptedReasoner::always(search_call()));
        let lp = ResearchLoop::new(reasoner.clone(), adapter(), LoopBudget::default());
        lp.run("q", &RunContext::detached()).await.unwrap();

        let histories = reasoner.histories();
        let has = |idx: usize, needle: &str| histories[idx].iter().any(|m| m.content.contains(needle));
        // 第 6 轮出现精确工具提示，之前没有
        assert!(!has(4, "Checkpoint:"));
        assert!(has(5, "Checkpoint:"));
        // 剩余 2 轮（第 11 轮）开始出现综合提示，且只注入一次
        assert!(!has(9, SYNTHESIS_HINT));
        assert!(has(10, SYNTHESIS_HINT));
        let hint_count = histories[11]
            .iter()
            .filter(|m| m.content == SYNTHESIS_HINT)
            .count();
        assert_eq!(hint_count, 1);
    }

    #[tokio::test]
    async fn test_no_checkpoint_hint_after_precision_tool() {
        let reasoner = Arc::new(ScriptedReasoner::always(ReasoningStep::ToolCalls(vec![
            ToolCall::new("read_file", json!({"path": "src/lib.rs"})),
        ])));
        let budget = LoopBudget::default().with_max_iterations(7);
        let lp = ResearchLoop::new(reasoner.clone(), adapter(), budget);
        lp.run("q", &RunContext::detached()).await.unwrap();
        assert!(reasoner
            .histories()
            .iter()
            .all(|h| h.iter().all(|m| !m.content.contains("Checkpoint:"))));
    }

    #[tokio::test]
    async fn test_reasoning_fault_is_verbatim() {
        let reasoner = Arc::new(ScriptedReasoner::failing("upstream 503: overloaded"));
        let lp = ResearchLoop::new(reasoner, adapter(), LoopBudget::default());
        let err = lp.run("q", &RunContext::detached()).await.unwrap_err();
        assert!(matches!(err, ResearchError::ReasoningFault(_)));
        assert_eq!(err.to_string(), "upstream 503: overloaded");
    }

    #[tokio::test]
    async fn test_malformed_output_is_retried() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Ok(ReasoningStep::Malformed("expected `,`".into())),
            Ok(ReasoningStep::FinalAnswer("ok".into())),
        ]));
        let lp = ResearchLoop::new(reasoner.clone(), adapter(), LoopBudget::default());
        let out = lp.run("q", &RunContext::detached()).await.unwrap();
        assert_eq!(out.answer, "ok");
        assert_eq!(out.iterations, 2);
        let second = &reasoner.histories()[1];
        assert!(second.last().unwrap().content.contains("could not be parsed"));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_observation() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Ok(ReasoningStep::ToolCalls(vec![ToolCall::new("git_blame", json!({}))])),
            Ok(ReasoningStep::FinalAnswer("done".into())),
        ]));
        let lp = ResearchLoop::new(reasoner, adapter(), LoopBudget::default());
        let out = lp.run("q", &RunContext::detached()).await.unwrap();
        assert_eq!(out.answer, "done");
        assert!(out.evidence[0].summary.starts_with("Error: Unknown tool"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let reasoner = Arc::new(ScriptedReasoner::always(search_call()));
        let lp = ResearchLoop::new(reasoner.clone(), adapter(), LoopBudget::default());
        let ctx = RunContext::detached();
        ctx.cancel_token().cancel();
        let err = lp.run("q", &ctx).await.unwrap_err();
        assert!(matches!(err, ResearchError::Cancelled));
        assert_eq!(reasoner.calls(), 0);
    }

    #[test]
    fn test_degraded_answer_never_empty() {
        assert!(!degraded_answer("q", &[]).is_empty());
        let ev = vec![Evidence {
            tool: "read_file".into(),
            args: json!({"path": "a.rs"}),
            summary: "fn a()".into(),
        }];
        let text = degraded_answer("q", &ev);
        assert!(text.contains("1. read_file"));
        assert!(text.contains("fn a()"));
    }
}
