//! 研究任务管理
//!
//! 每个被接受的查询对应一个 tokio 任务。同一冲突域同时只允许一个运行中的任务，
//! 冲突检查与登记在同一把写锁内完成。任务结束后先更新状态，再写入终止事件，
//! 订阅者看到终止事件时 `status()` 已是终态。

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::agent::{RunContext, RunResult};
use crate::core::error::ResearchError;
use crate::core::events::{EventLog, EventSink, TaskEvent, TaskSubscription};
use crate::store::QueryId;

pub type TaskId = String;

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<RunResult, ResearchError>> + Send>>;

/// 任务体：拿到运行上下文（取消令牌 + 事件句柄）后产出结果
pub type TaskRunner = Box<dyn FnOnce(RunContext) -> TaskFuture + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// 任务概览（running_tasks 返回）
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub domain: String,
    pub query_id: QueryId,
    pub status: TaskStatus,
}

struct TaskEntry {
    domain: String,
    query_id: QueryId,
    status: TaskStatus,
    finished_at: Option<Instant>,
    log: Arc<EventLog>,
    cancel: CancellationToken,
}

struct Inner {
    tasks: RwLock<HashMap<TaskId, TaskEntry>>,
    event_log_capacity: usize,
    retention: Duration,
}

#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    pub fn new(event_log_capacity: usize, retention: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: RwLock::new(HashMap::new()),
                event_log_capacity,
                retention,
            }),
        }
    }

    /// 启动任务并立即返回 TaskId；该域已有运行中的任务时拒绝
    pub async fn submit(
        &self,
        domain: &str,
        query_id: QueryId,
        runner: TaskRunner,
    ) -> Result<TaskId, ResearchError> {
        let task_id = format!("task_{}", uuid::Uuid::new_v4());
        let log = Arc::new(EventLog::new(self.inner.event_log_capacity));
        let cancel = CancellationToken::new();

        {
            let mut tasks = self.inner.tasks.write().await;
            if tasks
                .values()
                .any(|t| t.domain == domain && t.status == TaskStatus::Running)
            {
                return Err(ResearchError::ConflictInFlight {
                    domain: domain.to_string(),
                });
            }
            tasks.insert(
                task_id.clone(),
                TaskEntry {
                    domain: domain.to_string(),
                    query_id: query_id.clone(),
                    status: TaskStatus::Running,
                    finished_at: None,
                    log: Arc::clone(&log),
                    cancel: cancel.clone(),
                },
            );
        }

        tracing::info!(task_id = %task_id, query_id = %query_id, domain, "task started");

        let ctx = RunContext::new(cancel, EventSink::attached(Arc::clone(&log)));
        let manager = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            // 任务体跑在独立的 tokio 任务里，panic 也能落到 Failed
            let outcome = match tokio::spawn(runner(ctx)).await {
                Ok(outcome) => outcome,
                Err(e) => Err(ResearchError::TaskFailed(format!("Task aborted: {e}"))),
            };
            manager.finish(&id, outcome).await;
        });

        Ok(task_id)
    }

    async fn finish(&self, task_id: &str, outcome: Result<RunResult, ResearchError>) {
        let (status, terminal) = match outcome {
            Ok(result) => (TaskStatus::Completed, TaskEvent::Done { result }),
            Err(e) => (
                TaskStatus::Failed,
                TaskEvent::Error {
                    message: e.to_string(),
                },
            ),
        };

        let log = {
            let mut tasks = self.inner.tasks.write().await;
            let Some(entry) = tasks.get_mut(task_id) else {
                return;
            };
            entry.status = status;
            entry.finished_at = Some(Instant::now());
            Arc::clone(&entry.log)
        };

        match &terminal {
            TaskEvent::Error { message } => {
                tracing::warn!(task_id, error = %message, "task failed")
            }
            _ => tracing::info!(task_id, "task completed"),
        }
        log.close_with(terminal);
    }

    pub async fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.inner.tasks.read().await.get(task_id).map(|t| t.status)
    }

    pub async fn subscribe(&self, task_id: &str) -> Result<TaskSubscription, ResearchError> {
        let tasks = self.inner.tasks.read().await;
        tasks
            .get(task_id)
            .map(|t| t.log.subscribe())
            .ok_or_else(|| ResearchError::TaskNotFound(task_id.to_string()))
    }

    /// 等待终止事件
    pub async fn wait(&self, task_id: &str) -> Result<RunResult, ResearchError> {
        let mut sub = self.subscribe(task_id).await?;
        while let Some(event) = sub.next().await {
            match event {
                TaskEvent::Done { result } => return Ok(result),
                TaskEvent::Error { message } => return Err(ResearchError::TaskFailed(message)),
                _ => {}
            }
        }
        Err(ResearchError::TaskFailed(format!(
            "Task {task_id} closed without a terminal event"
        )))
    }

    /// 请求取消；只有运行中的任务返回 true。实际停止发生在下一个检查点
    pub async fn cancel(&self, task_id: &str) -> bool {
        let tasks = self.inner.tasks.read().await;
        match tasks.get(task_id) {
            Some(t) if t.status == TaskStatus::Running => {
                tracing::info!(task_id, "cancellation requested");
                t.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub async fn has_running_task(&self, domain: &str) -> bool {
        self.inner
            .tasks
            .read()
            .await
            .values()
            .any(|t| t.domain == domain && t.status == TaskStatus::Running)
    }

    pub async fn query_id_of(&self, task_id: &str) -> Option<QueryId> {
        self.inner
            .tasks
            .read()
            .await
            .get(task_id)
            .map(|t| t.query_id.clone())
    }

    pub async fn running_tasks(&self) -> Vec<TaskInfo> {
        self.inner
            .tasks
            .read()
            .await
            .iter()
            .filter(|(_, t)| t.status == TaskStatus::Running)
            .map(|(id, t)| TaskInfo {
                task_id: id.clone(),
                domain: t.domain.clone(),
                query_id: t.query_id.clone(),
                status: t.status,
            })
            .collect()
    }

    /// 清理超过保留期的已结束任务，返回清理数量
    pub async fn prune_finished(&self) -> usize {
        let retention = self.inner.retention;
        let mut tasks = self.inner.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, t| match t.finished_at {
            Some(at) => at.elapsed() < retention,
            None => true,
        });
        let pruned = before - tasks.len();
        if pruned > 0 {
            tracing::debug!(pruned, "pruned finished tasks");
        }
        pruned
    }
}
