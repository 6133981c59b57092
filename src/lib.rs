//! codescout - 代码库研究后端
//!
//! 接收关于某个仓库的自然语言问题：先在已完成的查询中找相似答案，
//! 未命中则在后台驱动有界的工具增强推理循环，实时推送进度并支持取消。
//!
//! 模块划分：
//! - **agent**: 研究策略（single_pass / multi_stage）与推理循环
//! - **cache**: 提示词相似度、索引失效标记、跨查询缓存
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、状态机、任务事件、任务管理、编排器与构建器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）与推理接口
//! - **observability**: tracing 初始化
//! - **store**: 查询记录存储（内存 / SQLite）
//! - **tools**: 研究工具、注册表与适配器

pub mod agent;
pub mod cache;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod store;
pub mod tools;

pub use crate::core::{Orchestrator, ResearchBuilder, ResearchError, ResearchOutcome, ResearchRequest};
