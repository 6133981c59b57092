//! 查询存储：每次研究查询的持久记录（提示词、状态、耗时、回答、证据、缓存来源）
//!
//! QueryStore 是唯一的事实来源；同一查询的并发终态写入由存储串行化，先到者生效，
//! 后到者得到 StoreError::AlreadyTerminal。提供内存实现与 SQLite 实现。

pub mod memory;
pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryQueryStore;
pub use sqlite::SqliteQueryStore;

/// 查询 ID（`q_<uuid>`）
pub type QueryId = String;

pub(crate) fn new_query_id() -> QueryId {
    format!("q_{}", uuid::Uuid::new_v4())
}

/// 查询状态；Running 之外都是终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Running,
    Completed,
    Failed,
    Cached,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cached => "cached",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cached" => Some(Self::Cached),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// 一次工具调用的证据记录，按调用顺序追加
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub tool: String,
    pub args: serde_json::Value,
    pub summary: String,
}

/// 查询记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: QueryId,
    pub prompt: String,
    /// 冲突域（如某个仓库）
    pub domain: String,
    /// 产生该结果的策略名；缓存命中时为 None
    pub strategy: Option<String>,
    pub status: QueryStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub answer: Option<String>,
    pub evidence: Vec<Evidence>,
    pub error: Option<String>,
    /// 仅 status=cached 时设置，指向命中时处于 completed 的源查询
    pub source_query_id: Option<QueryId>,
}

impl Query {
    pub(crate) fn running(prompt: &str, domain: &str, strategy: &str) -> Self {
        Self {
            id: new_query_id(),
            prompt: prompt.to_string(),
            domain: domain.to_string(),
            strategy: Some(strategy.to_string()),
            status: QueryStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            answer: None,
            evidence: Vec::new(),
            error: None,
            source_query_id: None,
        }
    }

    pub(crate) fn cached(
        prompt: &str,
        domain: &str,
        source_query_id: &str,
        answer: &str,
        evidence: &[Evidence],
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_query_id(),
            prompt: prompt.to_string(),
            domain: domain.to_string(),
            strategy: None,
            status: QueryStatus::Cached,
            created_at: now,
            completed_at: Some(now),
            duration_ms: Some(0),
            answer: Some(answer.to_string()),
            evidence: evidence.to_vec(),
            error: None,
            source_query_id: Some(source_query_id.to_string()),
        }
    }

    /// 是否可以作为缓存来源：已完成（非缓存）且不早于最近一次索引
    pub fn is_cache_source(&self, last_index_at: Option<DateTime<Utc>>) -> bool {
        if self.status != QueryStatus::Completed || self.answer.is_none() {
            return false;
        }
        match (self.completed_at, last_index_at) {
            (Some(done), Some(mark)) => done >= mark,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Query not found: {0}")]
    NotFound(QueryId),

    #[error("Query {id} is already {status:?}")]
    AlreadyTerminal { id: QueryId, status: QueryStatus },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Corrupt query row: {0}")]
    Corrupt(String),
}

/// 查询存储接口（由核心消费，具体后端由外部协作方实现）
#[async_trait]
pub trait QueryStore: Send + Sync {
    /// 以 running 状态创建查询
    async fn insert_running(
        &self,
        prompt: &str,
        domain: &str,
        strategy: &str,
    ) -> Result<QueryId, StoreError>;

    /// running -> completed
    async fn complete(
        &self,
        id: &str,
        answer: &str,
        evidence: &[Evidence],
        duration: Duration,
    ) -> Result<(), StoreError>;

    /// running -> failed，错误信息原样保存
    async fn fail(&self, id: &str, error: &str) -> Result<(), StoreError>;

    /// 直接以 cached 终态写入缓存命中记录
    async fn insert_cached(
        &self,
        prompt: &str,
        domain: &str,
        source_query_id: &str,
        answer: &str,
        evidence: &[Evidence],
    ) -> Result<QueryId, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Query>, StoreError>;

    /// completed 状态且 completed_at >= since 的查询，按完成时间倒序，最多 limit 条；since 为 None 时不过滤时间
    async fn list_completed_since(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Query>, StoreError>;

    /// 同 list_completed_since，但只取一个冲突域内的查询（limit 在域内计算）
    async fn list_completed_in_domain(
        &self,
        domain: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Query>, StoreError>;

    /// 最近创建的查询（任意状态），按创建时间倒序
    async fn list_recent(&self, limit: usize) -> Result<Vec<Query>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_names() {
        for status in [
            QueryStatus::Running,
            QueryStatus::Completed,
            QueryStatus::Failed,
            QueryStatus::Cached,
        ] {
            assert_eq!(QueryStatus::parse(status.as_str()), Some(status));
        }
        assert!(!QueryStatus::Running.is_terminal());
        assert!(QueryStatus::Cached.is_terminal());
    }

    #[test]
    fn test_cached_and_failed_are_never_sources() {
        let cached = Query::cached("q", "repo", "q_src", "answer", &[]);
        assert!(!cached.is_cache_source(None));

        let mut failed = Query::running("q", "repo", "single_pass");
        failed.status = QueryStatus::Failed;
        failed.completed_at = Some(Utc::now());
        assert!(!failed.is_cache_source(None));

        let running = Query::running("q", "repo", "single_pass");
        assert!(!running.is_cache_source(None));
    }

    #[test]
    fn test_completed_before_mark_is_stale() {
        let mut q = Query::running("q", "repo", "single_pass");
        q.status = QueryStatus::Completed;
        q.answer = Some("a".into());
        q.completed_at = Some(Utc::now() - chrono::Duration::minutes(5));
        assert!(q.is_cache_source(None));
        assert!(!q.is_cache_source(Some(Utc::now())));
        assert!(q.is_cache_source(Some(Utc::now() - chrono::Duration::minutes(10))));
    }
}
