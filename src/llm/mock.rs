//! Mock 推理后端（用于测试与无 API Key 的本地运行）
//!
//! - MockLlmClient：先请求一次目录地图，拿到观察结果后给出最终回答，便于本地跑通整个流程
//! - ScriptedReasoner：按脚本依次返回推理结果，脚本耗尽后重复 fallback，测试中用来驱动研究循环

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, ReasoningError, ReasoningStep, Reasoner, Role};

#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let question = messages
            .iter()
            .find(|m| m.role == Role::User && !m.is_observation())
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        let last_observation = messages
            .iter()
            .rev()
            .find(|m| m.is_observation());

        match last_observation {
            None => Ok(r#"{"tool": "read_directory_map", "args": {}}"#.to_string()),
            Some(obs) => {
                let preview: String = obs.content.chars().take(400).collect();
                Ok(format!(
                    "Mock answer for: {}\n\nBased on:\n{}",
                    question, preview
                ))
            }
        }
    }
}

/// 脚本化推理服务
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<Result<ReasoningStep, ReasoningError>>>,
    fallback: Result<ReasoningStep, ReasoningError>,
    calls: AtomicUsize,
    histories: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedReasoner {
    pub fn new(steps: Vec<Result<ReasoningStep, ReasoningError>>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            fallback: Ok(ReasoningStep::FinalAnswer("(script exhausted)".to_string())),
            calls: AtomicUsize::new(0),
            histories: Mutex::new(Vec::new()),
        }
    }

    /// 每次调用都返回同一结果
    pub fn always(step: ReasoningStep) -> Self {
        Self::new(Vec::new()).with_fallback(Ok(step))
    }

    /// 每次调用都失败
    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(Vec::new()).with_fallback(Err(ReasoningError(message.into())))
    }

    pub fn with_fallback(mut self, fallback: Result<ReasoningStep, ReasoningError>) -> Self {
        self.fallback = fallback;
        self
    }

    /// 已发生的推理调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用时传入的历史（按调用顺序）
    pub fn histories(&self) -> Vec<Vec<Message>> {
        self.histories
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn reason(&self, history: &[Message]) -> Result<ReasoningStep, ReasoningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut h) = self.histories.lock() {
            h.push(history.to_vec());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{parse_reasoning_output, ToolCall};

    #[tokio::test]
    async fn test_mock_client_explores_then_answers() {
        let client = MockLlmClient;
        let mut history = vec![
            Message::system("research"),
            Message::user("How does the cache work?"),
        ];

        let first = client.complete(&history).await.unwrap();
        assert_eq!(
            parse_reasoning_output(&first),
            ReasoningStep::ToolCalls(vec![ToolCall::new(
                "read_directory_map",
                serde_json::json!({})
            )])
        );

        history.push(Message::user("Observation from read_directory_map:\nsrc/\n  cache/"));
        let second = client.complete(&history).await.unwrap();
        assert!(second.starts_with("Mock answer for: How does the cache work?"));
    }

    #[tokio::test]
    async fn test_scripted_reasoner_falls_back() {
        let reasoner = ScriptedReasoner::new(vec![Ok(ReasoningStep::FinalAnswer("one".into()))]);
        let history = vec![Message::user("q")];
        assert_eq!(
            reasoner.reason(&history).await.unwrap(),
            ReasoningStep::FinalAnswer("one".into())
        );
        assert_eq!(
            reasoner.reason(&history).await.unwrap(),
            ReasoningStep::FinalAnswer("(script exhausted)".into())
        );
        assert_eq!(reasoner.calls(), 2);
    }
}
