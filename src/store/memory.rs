//! 内存查询存储（进程内，测试与无持久化运行时使用）

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{Evidence, Query, QueryId, QueryStatus, QueryStore, StoreError};

#[derive(Default)]
pub struct MemoryQueryStore {
    queries: RwLock<HashMap<QueryId, Query>>,
}

impl MemoryQueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn completed_where(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
        keep: impl Fn(&Query) -> bool,
    ) -> Vec<Query> {
        let queries = self.queries.read().await;
        let mut completed: Vec<Query> = queries
            .values()
            .filter(|q| q.status == QueryStatus::Completed)
            .filter(|q| match (since, q.completed_at) {
                (Some(mark), Some(done)) => done >= mark,
                (None, Some(_)) => true,
                (_, None) => false,
            })
            .filter(|q| keep(q))
            .cloned()
            .collect();
        completed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        completed.truncate(limit);
        completed
    }

    /// 在写锁内完成 running -> 终态 的转换，保证同一 ID 只转换一次
    async fn finish(
        &self,
        id: &str,
        apply: impl FnOnce(&mut Query),
    ) -> Result<(), StoreError> {
        let mut queries = self.queries.write().await;
        let query = queries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if query.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                id: id.to_string(),
                status: query.status,
            });
        }
        apply(query);
        Ok(())
    }
}

#[async_trait]
impl QueryStore for MemoryQueryStore {
    async fn insert_running(
        &self,
        prompt: &str,
        domain: &str,
        strategy: &str,
    ) -> Result<QueryId, StoreError> {
        let query = Query::running(prompt, domain, strategy);
        let id = query.id.clone();
        self.queries.write().await.insert(id.clone(), query);
        Ok(id)
    }

    async fn complete(
        &self,
        id: &str,
        answer: &str,
        evidence: &[Evidence],
        duration: Duration,
    ) -> Result<(), StoreError> {
        self.finish(id, |q| {
            q.status = QueryStatus::Completed;
            q.answer = Some(answer.to_string());
            q.evidence = evidence.to_vec();
            q.completed_at = Some(Utc::now());
            q.duration_ms = Some(duration.as_millis() as u64);
        })
        .await
    }

    async fn fail(&self, id: &str, error: &str) -> Result<(), StoreError> {
        self.finish(id, |q| {
            let now = Utc::now();
            q.status = QueryStatus::Failed;
            q.error = Some(error.to_string());
            q.duration_ms = Some((now - q.created_at).num_milliseconds().max(0) as u64);
            q.completed_at = Some(now);
        })
        .await
    }

    async fn insert_cached(
        &self,
        prompt: &str,
        domain: &str,
        source_query_id: &str,
        answer: &str,
        evidence: &[Evidence],
    ) -> Result<QueryId, StoreError> {
        let query = Query::cached(prompt, domain, source_query_id, answer, evidence);
        let id = query.id.clone();
        self.queries.write().await.insert(id.clone(), query);
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<Query>, StoreError> {
        Ok(self.queries.read().await.get(id).cloned())
    }

    async fn list_completed_since(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Query>, StoreError> {
        Ok(self.completed_where(since, limit, |_| true).await)
    }

    async fn list_completed_in_domain(
        &self,
        domain: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Query>, StoreError> {
        Ok(self.completed_where(since, limit, |q| q.domain == domain).await)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Query>, StoreError> {
        let queries = self.queries.read().await;
        let mut all: Vec<Query> = queries.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_running_to_completed_once() {
        let store = MemoryQueryStore::new();
        let id = store
            .insert_running("How does X work?", "repo", "single_pass")
            .await
            .unwrap();

        let evidence = vec![Evidence {
            tool: "read_file".into(),
            args: json!({"path": "src/x.rs"}),
            summary: "File: src/x.rs".into(),
        }];
        store
            .complete(&id, "X works by...", &evidence, Duration::from_millis(1500))
            .await
            .unwrap();

        let q = store.get(&id).await.unwrap().unwrap();
        assert_eq!(q.status, QueryStatus::Completed);
        assert_eq!(q.answer.as_deref(), Some("X works by..."));
        assert_eq!(q.evidence, evidence);
        assert_eq!(q.duration_ms, Some(1500));

        // 第二次终态写入被拒绝，记录保持不变
        let err = store.fail(&id, "late failure").await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyTerminal { status: QueryStatus::Completed, .. }));
        let q = store.get(&id).await.unwrap().unwrap();
        assert_eq!(q.status, QueryStatus::Completed);
        assert!(q.error.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_completion_is_serialized() {
        let store = std::sync::Arc::new(MemoryQueryStore::new());
        let id = store.insert_running("p", "repo", "single_pass").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .complete(&id, &format!("answer {i}"), &[], Duration::from_millis(1))
                    .await
                    .is_ok()
            }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_list_completed_excludes_other_statuses() {
        let store = MemoryQueryStore::new();
        let done = store.insert_running("a", "repo", "single_pass").await.unwrap();
        store.complete(&done, "A", &[], Duration::ZERO).await.unwrap();
        let failed = store.insert_running("b", "repo", "single_pass").await.unwrap();
        store.fail(&failed, "boom").await.unwrap();
        let _running = store.insert_running("c", "repo", "single_pass").await.unwrap();
        store.insert_cached("a", "repo", &done, "A", &[]).await.unwrap();

        let completed = store.list_completed_since(None, 10).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, done);

        assert_eq!(store.list_recent(10).await.unwrap().len(), 4);
        assert!(store
            .list_completed_since(Some(Utc::now() + chrono::Duration::seconds(1)), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_fail_keeps_error_verbatim() {
        let store = MemoryQueryStore::new();
        let id = store.insert_running("p", "repo", "single_pass").await.unwrap();
        store.fail(&id, "upstream 503: overloaded").await.unwrap();
        let q = store.get(&id).await.unwrap().unwrap();
        assert_eq!(q.status, QueryStatus::Failed);
        assert_eq!(q.error.as_deref(), Some("upstream 503: overloaded"));
        assert!(q.answer.is_none());
    }
}
