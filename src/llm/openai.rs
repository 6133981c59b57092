//! OpenAI 兼容 API 客户端
//!
//! 经 async_openai 调用任意兼容端点（DeepSeek、OpenAI、自建代理）。
//! 研究循环需要确定性较高的输出，默认温度偏低；单次请求受超时约束，超时即推理失败。

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde::Serialize;

use crate::llm::{LlmClient, Message, Role};

pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// 累计 token 用量快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub requests: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt + self.completion
    }
}

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    request_timeout: Duration,
    usage: Mutex<TokenUsage>,
}

impl OpenAiClient {
    /// api_key 缺省时读 OPENAI_API_KEY
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let mut config = OpenAIConfig::new();
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }
        if let Some(key) = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        {
            config = config.with_api_key(key);
        }

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            request_timeout: Duration::from_secs(120),
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout = Duration::from_secs(secs.max(1));
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn record_usage(&self, prompt: u64, completion: u64) {
        if let Ok(mut usage) = self.usage.lock() {
            usage.prompt += prompt;
            usage.completion += completion;
            usage.requests += 1;
        }
    }
}

fn to_request_message(message: &Message) -> Result<ChatCompletionRequestMessage, String> {
    let content = message.content.clone();
    let built = match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()
            .map(ChatCompletionRequestMessage::System),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()
            .map(ChatCompletionRequestMessage::User),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()
            .map(ChatCompletionRequestMessage::Assistant),
    };
    built.map_err(|e| format!("invalid {:?} message: {}", message.role, e))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let history = messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>, _>>()?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .messages(history)
            .build()
            .map_err(|e| e.to_string())?;

        let started = Instant::now();
        let response = match tokio::time::timeout(
            self.request_timeout,
            self.client.chat().create(request),
        )
        .await
        {
            Err(_) => {
                return Err(format!(
                    "LLM request timed out after {}s",
                    self.request_timeout.as_secs()
                ))
            }
            Ok(result) => result.map_err(|e| format!("LLM request failed: {}", e))?,
        };

        let (prompt_tokens, completion_tokens) = response
            .usage
            .as_ref()
            .map(|u| (u.prompt_tokens as u64, u.completion_tokens as u64))
            .unwrap_or_default();
        self.record_usage(prompt_tokens, completion_tokens);
        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            prompt_tokens,
            completion_tokens,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "LLM completion"
        );

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| "LLM response contained no content".to_string())
    }

    fn token_usage(&self) -> TokenUsage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_every_role() {
        let history = [
            Message::system("rules"),
            Message::user("question"),
            Message::assistant("{\"tool\":\"read_file\"}"),
        ];
        let converted: Vec<_> = history.iter().map(to_request_message).collect();
        assert!(converted.iter().all(|m| m.is_ok()));
        assert!(matches!(converted[0], Ok(ChatCompletionRequestMessage::System(_))));
        assert!(matches!(converted[2], Ok(ChatCompletionRequestMessage::Assistant(_))));
    }

    #[test]
    fn test_usage_accumulates() {
        let client = OpenAiClient::new(Some("http://localhost:1"), "m", Some("sk-test"))
            .with_temperature(5.0);
        assert_eq!(client.temperature, 2.0);
        client.record_usage(10, 4);
        client.record_usage(6, 2);
        let usage = client.token_usage();
        assert_eq!(usage.requests, 2);
        assert_eq!(usage.total(), 22);
    }
}
