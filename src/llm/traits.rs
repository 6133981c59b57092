//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：complete 返回模型的原始文本。
//! 重试与退避由后端自身负责，研究循环不会重试失败的推理调用。

use async_trait::async_trait;

use crate::llm::{Message, TokenUsage};

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 累计 token 用量；不统计的后端返回零值
    fn token_usage(&self) -> TokenUsage {
        TokenUsage::default()
    }
}
