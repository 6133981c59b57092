//! 研究编排器：请求入口
//!
//! submit 的顺序：解析策略 → 缓存（force 时跳过）→ 冲突检查 → insert_running → 提交任务。
//! 请求路径只做缓存扫描与提交；研究在后台任务中执行，任务体负责把结果写回查询存储，
//! 之后 TaskManager 才发出终止事件，因此订阅者收到 Done 时查询记录已是终态。

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::agent::{RunContext, RunResult, Strategy, StrategyChoice, StrategyRegistry};
use crate::cache::{CachedAnswer, QueryCache};
use crate::core::error::ResearchError;
use crate::core::events::TaskSubscription;
use crate::core::task_manager::{TaskFuture, TaskId, TaskInfo, TaskManager, TaskRunner, TaskStatus};
use crate::store::{Query, QueryId, QueryStore};

/// 一次研究请求
#[derive(Debug, Clone)]
pub struct ResearchRequest {
    pub prompt: String,
    /// 冲突域，通常是仓库标识
    pub domain: String,
    /// 跳过缓存，强制重新研究
    pub force: bool,
    pub strategy: StrategyChoice,
}

impl ResearchRequest {
    pub fn new(prompt: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            domain: domain.into(),
            force: false,
            strategy: StrategyChoice::Auto,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyChoice) -> Self {
        self.strategy = strategy;
        self
    }
}

/// submit 的结果：缓存命中（同步返回回答）或已启动的后台任务
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResearchOutcome {
    Cached(CachedAnswer),
    Started {
        query_id: QueryId,
        task_id: TaskId,
        strategy: String,
    },
}

impl ResearchOutcome {
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }

    pub fn query_id(&self) -> &str {
        match self {
            Self::Cached(hit) => &hit.query_id,
            Self::Started { query_id, .. } => query_id,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Cached(_) => None,
            Self::Started { task_id, .. } => Some(task_id),
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn QueryStore>,
    cache: QueryCache,
    strategies: StrategyRegistry,
    tasks: TaskManager,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn QueryStore>,
        cache: QueryCache,
        strategies: StrategyRegistry,
        tasks: TaskManager,
    ) -> Self {
        Self {
            store,
            cache,
            strategies,
            tasks,
        }
    }

    pub async fn submit(&self, request: ResearchRequest) -> Result<ResearchOutcome, ResearchError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(ResearchError::InvalidRequest("prompt is empty".to_string()));
        }
        let domain = request.domain.trim();
        if domain.is_empty() {
            return Err(ResearchError::InvalidRequest("domain is empty".to_string()));
        }

        self.tasks.prune_finished().await;
        let strategy = self.strategies.resolve(&request.strategy)?;

        if let Some(hit) = self.cache.resolve(prompt, domain, request.force).await? {
            tracing::info!(
                query_id = %hit.query_id,
                source_query_id = %hit.source_query_id,
                score = hit.score,
                "answered from cache"
            );
            return Ok(ResearchOutcome::Cached(hit));
        }

        if self.tasks.has_running_task(domain).await {
            tracing::info!(domain, "rejected: research already running");
            return Err(ResearchError::ConflictInFlight {
                domain: domain.to_string(),
            });
        }

        let query_id = self
            .store
            .insert_running(prompt, domain, strategy.name())
            .await?;
        let strategy_name = strategy.name().to_string();
        let runner = self.runner(strategy, prompt.to_string(), query_id.clone());

        match self.tasks.submit(domain, query_id.clone(), runner).await {
            Ok(task_id) => {
                tracing::info!(
                    query_id = %query_id,
                    task_id = %task_id,
                    strategy = %strategy_name,
                    force = request.force,
                    "research started"
                );
                Ok(ResearchOutcome::Started {
                    query_id,
                    task_id,
                    strategy: strategy_name,
                })
            }
            Err(e) => {
                // 并发提交在任务登记时才撞上冲突，刚插入的记录随之失败
                if let Err(store_err) = self.store.fail(&query_id, &e.to_string()).await {
                    tracing::error!(query_id = %query_id, error = %store_err, "failed to record rejected query");
                }
                Err(e)
            }
        }
    }

    /// 任务体：执行策略并把结果写回存储
    ///
    /// 策略跑在单独的 tokio 任务里；即使 panic，查询记录也会落到 failed。
    fn runner(&self, strategy: Arc<dyn Strategy>, prompt: String, query_id: QueryId) -> TaskRunner {
        let store = Arc::clone(&self.store);
        Box::new(move |ctx: RunContext| -> TaskFuture {
            Box::pin(async move {
                let started = Instant::now();
                let run = tokio::spawn(async move { strategy.run(&prompt, &ctx).await });
                let outcome = match run.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(query_id = %query_id, error = %e, "strategy aborted");
                        Err(ResearchError::TaskFailed(format!("Task aborted: {e}")))
                    }
                };
                match outcome {
                    Ok(result) => {
                        if let Err(e) = store
                            .complete(&query_id, &result.answer, &result.evidence, started.elapsed())
                            .await
                        {
                            tracing::error!(query_id = %query_id, error = %e, "failed to record completion");
                            return Err(ResearchError::from(e));
                        }
                        Ok(result)
                    }
                    Err(e) => {
                        if let Err(store_err) = store.fail(&query_id, &e.to_string()).await {
                            tracing::error!(query_id = %query_id, error = %store_err, "failed to record failure");
                        }
                        Err(e)
                    }
                }
            })
        })
    }

    pub async fn query(&self, id: &str) -> Result<Option<Query>, ResearchError> {
        Ok(self.store.get(id).await?)
    }

    /// 最近的查询记录（含缓存命中与失败）
    pub async fn history(&self, limit: usize) -> Result<Vec<Query>, ResearchError> {
        Ok(self.store.list_recent(limit).await?)
    }

    pub async fn cancel(&self, task_id: &str) -> bool {
        self.tasks.cancel(task_id).await
    }

    pub async fn subscribe(&self, task_id: &str) -> Result<TaskSubscription, ResearchError> {
        self.tasks.subscribe(task_id).await
    }

    pub async fn wait(&self, task_id: &str) -> Result<RunResult, ResearchError> {
        self.tasks.wait(task_id).await
    }

    pub async fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.status(task_id).await
    }

    pub async fn query_id_of(&self, task_id: &str) -> Option<QueryId> {
        self.tasks.query_id_of(task_id).await
    }

    pub async fn running_tasks(&self) -> Vec<TaskInfo> {
        self.tasks.running_tasks().await
    }

    pub async fn has_running_task(&self, domain: &str) -> bool {
        self.tasks.has_running_task(domain).await
    }

    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies.names()
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{LoopBudget, SinglePassStrategy};
    use crate::cache::IndexMark;
    use crate::llm::{ReasoningStep, ScriptedReasoner};
    use crate::store::{MemoryQueryStore, QueryStatus};
    use crate::tools::{ToolAdapter, ToolRegistry};
    use std::time::Duration;

    fn orchestrator(reasoner: Arc<ScriptedReasoner>) -> (Orchestrator, Arc<MemoryQueryStore>) {
        let store = Arc::new(MemoryQueryStore::new());
        let cache = QueryCache::new(store.clone(), IndexMark::new());
        let mut strategies = StrategyRegistry::new("single_pass");
        strategies.register(Arc::new(SinglePassStrategy::new(
            reasoner,
            ToolAdapter::new(ToolRegistry::new(), 5),
            LoopBudget::default(),
        )));
        let tasks = TaskManager::new(64, Duration::from_secs(600));
        (Orchestrator::new(store.clone(), cache, strategies, tasks), store)
    }

    #[tokio::test]
    async fn test_rejects_empty_prompt_and_unknown_strategy() {
        let (orch, _) = orchestrator(Arc::new(ScriptedReasoner::new(vec![])));
        assert!(matches!(
            orch.submit(ResearchRequest::new("  ", "repo")).await,
            Err(ResearchError::InvalidRequest(_))
        ));
        let req = ResearchRequest::new("q", "repo")
            .with_strategy(StrategyChoice::Named("tree_search".into()));
        assert!(matches!(
            orch.submit(req).await,
            Err(ResearchError::UnknownStrategy(_))
        ));
        assert!(orch.history(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completed_run_is_recorded() {
        let reasoner = Arc::new(ScriptedReasoner::always(ReasoningStep::FinalAnswer(
            "It works like this.".into(),
        )));
        let (orch, _) = orchestrator(reasoner);
        let outcome = orch
            .submit(ResearchRequest::new("How does it work?", "repo"))
            .await
            .unwrap();
        assert!(!outcome.is_cached());
        let task_id = outcome.task_id().unwrap().to_string();
        assert_eq!(orch.query_id_of(&task_id).await.as_deref(), Some(outcome.query_id()));

        let result = orch.wait(&task_id).await.unwrap();
        assert_eq!(result.answer, "It works like this.");

        let q = orch.query(outcome.query_id()).await.unwrap().unwrap();
        assert_eq!(q.status, QueryStatus::Completed);
        assert_eq!(q.answer.as_deref(), Some("It works like this."));
        assert_eq!(q.strategy.as_deref(), Some("single_pass"));
        assert!(q.duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_conflict_rejected_before_insert() {
        let (orch, store) = orchestrator(Arc::new(ScriptedReasoner::new(vec![])));
        // 绕过前置检查，直接占住冲突域
        let (_tx, rx) = tokio::sync::oneshot::channel::<()>();
        let blocker: TaskRunner = Box::new(move |_ctx: RunContext| -> TaskFuture {
            Box::pin(async move {
                let _ = rx.await;
                Err::<RunResult, _>(ResearchError::Cancelled)
            })
        });
        orch.tasks.submit("repo", "q_blocker".into(), blocker).await.unwrap();

        let err = orch.submit(ResearchRequest::new("q", "repo")).await.unwrap_err();
        assert!(matches!(err, ResearchError::ConflictInFlight { .. }));
        // 前置冲突检查命中，不写存储
        assert!(store.list_recent(10).await.unwrap().is_empty());
    }
}
