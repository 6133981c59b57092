//! 编排器构建：由配置组装工具、推理后端、查询存储、策略与任务管理
//!
//! 各组件都可在 build 前替换（测试中注入脚本化推理与内存存储）。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{LoopBudget, MultiStageStrategy, SinglePassStrategy, StrategyRegistry};
use crate::cache::{IndexMark, QueryCache};
use crate::config::AppConfig;
use crate::core::{Orchestrator, ResearchError, TaskManager};
use crate::llm::{create_deepseek_client, LlmClient, LlmReasoner, MockLlmClient, OpenAiClient, Reasoner};
use crate::store::{MemoryQueryStore, QueryStore, SqliteQueryStore};
use crate::tools::{local_research_tools, ToolAdapter, ToolRegistry};

/// 根据配置与环境变量选择推理后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_reasoner_from_config(cfg: &AppConfig) -> Arc<dyn Reasoner> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = cfg.llm.request_timeout_secs;

    let llm: Arc<dyn LlmClient> = match provider.as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient)
        }
        "deepseek"
            if std::env::var("DEEPSEEK_API_KEY").is_ok()
                || std::env::var("OPENAI_API_KEY").is_ok() =>
        {
            tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
            Arc::new(
                create_deepseek_client(Some(&cfg.llm.model))
                    .with_request_timeout(timeout)
                    .with_temperature(cfg.llm.temperature),
            )
        }
        "openai" if std::env::var("OPENAI_API_KEY").is_ok() => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Arc::new(
                OpenAiClient::new(
                    cfg.llm.base_url.as_deref(),
                    &cfg.llm.model,
                    std::env::var("OPENAI_API_KEY").ok().as_deref(),
                )
                .with_request_timeout(timeout)
                .with_temperature(cfg.llm.temperature),
            )
        }
        other => {
            tracing::warn!(provider = other, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    };
    Arc::new(LlmReasoner::new(llm))
}

pub struct ResearchBuilder {
    config: AppConfig,
    repo_root: PathBuf,
    reasoner: Option<Arc<dyn Reasoner>>,
    store: Option<Arc<dyn QueryStore>>,
    tools: Option<ToolRegistry>,
    index_mark: Option<IndexMark>,
}

impl ResearchBuilder {
    pub fn new(config: AppConfig) -> Self {
        let repo_root = config
            .app
            .repo_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            config,
            repo_root,
            reasoner: None,
            store: None,
            tools: None,
            index_mark: None,
        }
    }

    pub fn with_repo_root(mut self, root: impl AsRef<Path>) -> Self {
        self.repo_root = root.as_ref().to_path_buf();
        self
    }

    pub fn with_reasoner(mut self, reasoner: Arc<dyn Reasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn QueryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 替换默认的本地文件系统工具
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    /// 默认使用进程级的全局标记
    pub fn with_index_mark(mut self, mark: IndexMark) -> Self {
        self.index_mark = Some(mark);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn build_store(&self) -> Result<Arc<dyn QueryStore>, ResearchError> {
        if let Some(store) = &self.store {
            return Ok(Arc::clone(store));
        }
        match &self.config.app.db_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        ResearchError::Config(format!(
                            "cannot create database directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
                tracing::info!(path = %path.display(), "Using SQLite query store");
                Ok(Arc::new(SqliteQueryStore::open(path)?))
            }
            None => {
                tracing::info!("Using in-memory query store");
                Ok(Arc::new(MemoryQueryStore::new()))
            }
        }
    }

    fn build_strategies(&self, reasoner: Arc<dyn Reasoner>, tools: ToolAdapter) -> StrategyRegistry {
        let research = &self.config.research;
        let budget = LoopBudget {
            max_iterations: research.max_iterations.max(1),
            synthesis_margin: research.synthesis_margin,
            checkpoint_iteration: research.checkpoint_iteration,
            max_tool_output_chars: research.max_tool_output_chars.max(1),
        };
        let researcher_budget = budget.with_max_iterations(research.researcher_max_iterations);

        let mut strategies = StrategyRegistry::new(research.default_strategy.clone());
        strategies.register(Arc::new(SinglePassStrategy::new(
            reasoner.clone(),
            tools.clone(),
            budget,
        )));
        strategies.register(Arc::new(MultiStageStrategy::new(
            reasoner,
            tools,
            researcher_budget,
            research.max_sub_questions,
        )));
        strategies
    }

    pub fn build(self) -> Result<Orchestrator, ResearchError> {
        let research = &self.config.research;
        if research.synthesis_margin >= research.max_iterations {
            tracing::warn!(
                synthesis_margin = research.synthesis_margin,
                max_iterations = research.max_iterations,
                "synthesis margin covers the whole budget, the model will be asked to answer immediately"
            );
        }

        let store = self.build_store()?;
        let reasoner = self
            .reasoner
            .clone()
            .unwrap_or_else(|| create_reasoner_from_config(&self.config));
        let registry = self
            .tools
            .clone()
            .unwrap_or_else(|| local_research_tools(&self.repo_root));
        let adapter = ToolAdapter::new(registry, self.config.tools.tool_timeout_secs);

        let strategies = self.build_strategies(reasoner, adapter);
        strategies.resolve(&Default::default())?;

        let mark = self.index_mark.clone().unwrap_or_else(IndexMark::global);
        let cache = QueryCache::new(store.clone(), mark)
            .with_threshold(self.config.cache.threshold)
            .with_max_candidates(self.config.cache.max_candidates);
        let tasks = TaskManager::new(
            self.config.tasks.event_log_capacity,
            Duration::from_secs(self.config.tasks.retention_secs),
        );

        tracing::info!(
            repo_root = %self.repo_root.display(),
            strategies = ?strategies.names(),
            default_strategy = strategies.default_name(),
            "research orchestrator ready"
        );
        Ok(Orchestrator::new(store, cache, strategies, tasks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.llm.provider = "mock".into();
        let orch = ResearchBuilder::new(config)
            .with_repo_root(dir.path())
            .with_index_mark(IndexMark::new())
            .build()
            .unwrap();
        assert_eq!(orch.strategy_names(), vec!["multi_stage", "single_pass"]);
        assert_eq!(orch.cache().threshold(), 0.8);
    }

    #[test]
    fn test_unknown_default_strategy_is_config_error() {
        let mut config = AppConfig::default();
        config.llm.provider = "mock".into();
        config.research.default_strategy = "tree_search".into();
        let err = ResearchBuilder::new(config).build().err().unwrap();
        assert!(matches!(err, ResearchError::UnknownStrategy(_)));
    }

    #[tokio::test]
    async fn test_sqlite_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.llm.provider = "mock".into();
        config.app.db_path = Some(dir.path().join("data").join("queries.db"));
        let orch = ResearchBuilder::new(config)
            .with_repo_root(dir.path())
            .with_index_mark(IndexMark::new())
            .build()
            .unwrap();
        assert!(orch.history(5).await.unwrap().is_empty());
        assert!(dir.path().join("data").join("queries.db").exists());
    }
}
