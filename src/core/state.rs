//! 研究循环的状态机
//!
//! Iterating → ExecutingTool → Iterating … → Synthesizing → Done，
//! 或 Iterating → BudgetExceeded → Synthesizing → Done。

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Iterating,
    ExecutingTool,
    BudgetExceeded,
    Synthesizing,
    Done,
}

impl AgentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Iterating => "iterating",
            Self::ExecutingTool => "executing_tool",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Synthesizing => "synthesizing",
            Self::Done => "done",
        }
    }

    /// 合法转换
    pub fn can_transition_to(&self, next: AgentPhase) -> bool {
        use AgentPhase::*;
        matches!(
            (*self, next),
            (Iterating, ExecutingTool)
                | (Iterating, Iterating)
                | (ExecutingTool, ExecutingTool)
                | (ExecutingTool, Iterating)
                | (Iterating, BudgetExceeded)
                | (Iterating, Synthesizing)
                | (BudgetExceeded, Synthesizing)
                | (Synthesizing, Done)
        )
    }
}
