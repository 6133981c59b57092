//! 研究循环与多阶段策略使用的提示词

use crate::tools::{tool_calls_schema_json, ToolAdapter};

const RESEARCH_INSTRUCTIONS: &str = "You are a codebase research assistant. \
Answer the user's question about the repository by exploring it with tools. \
Start broad (directory map, search), then confirm details with precise tools \
(symbol resolution, file reading) before answering. \
Base every claim on what the tools returned; cite file paths.";

const CALL_FORMAT: &str = "To call tools, reply with ONLY a JSON object, either \
{\"tool\": \"<name>\", \"args\": {...}} or {\"tool_calls\": [{\"tool\": \"<name>\", \"args\": {...}}, ...]}. \
Calls run in order. When you have enough evidence, reply with the final answer as plain text (no JSON).";

/// 剩余轮数不足时注入
pub const SYNTHESIS_HINT: &str = "You are about to run out of research iterations. \
Stop calling tools and write the final answer now from the evidence gathered so far.";

/// 预算耗尽后的强制综合
pub const SYNTHESIS_PROMPT: &str = "The research budget is exhausted and no more tools can be called. \
Write the final answer to the original question now, in plain text, using only the observations above. \
State clearly what could not be confirmed.";

pub const PLANNER_PROMPT: &str = "You plan research on a source repository. \
Split the user's question into at most {max} focused sub-questions that can each be answered by exploring the code. \
Reply with a JSON array of strings, or one sub-question per line. Do not answer the question.";

pub const SYNTHESIZER_PROMPT: &str = "You merge research findings into one answer. \
Using only the findings provided, write a complete, well-structured answer to the original question. \
Cite file paths from the findings. Reply in plain text.";

pub const VERIFIER_PROMPT: &str = "You review an answer to a question about a source repository against the findings it was based on. \
If the answer is complete and supported by the findings, reply with exactly OK. \
Otherwise reply with one sentence describing the most important gap to research.";

/// 研究循环的系统提示：说明 + 工具清单 + 调用格式
pub fn research_system_prompt(tools: &ToolAdapter) -> String {
    format!(
        "{}\n\nAvailable tools:\n{}\n\n{}\n\nCall format schema:\n{}",
        RESEARCH_INSTRUCTIONS,
        tools.schema_json(),
        CALL_FORMAT,
        tool_calls_schema_json()
    )
}

/// checkpoint 时的精确工具提示
pub fn checkpoint_hint(unused: &[&str]) -> String {
    format!(
        "Checkpoint: you have not used {} yet. Before answering, confirm the key definitions \
         and code paths precisely with {}.",
        unused.join(" or "),
        if unused.len() == 1 { "it" } else { "them" }
    )
}

pub fn planner_prompt(max_sub_questions: usize) -> String {
    PLANNER_PROMPT.replace("{max}", &max_sub_questions.to_string())
}
