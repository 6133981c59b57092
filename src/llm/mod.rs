//! 推理层：LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock），以及 reason(history) 接口

pub mod deepseek;
pub mod message;
pub mod mock;
pub mod openai;
pub mod reasoner;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use message::{Message, Role};
pub use mock::{MockLlmClient, ScriptedReasoner};
pub use openai::{OpenAiClient, TokenUsage, DEFAULT_TEMPERATURE};
pub use reasoner::{parse_reasoning_output, LlmReasoner, Reasoner, ReasoningError, ReasoningStep, ToolCall};
pub use traits::LlmClient;
