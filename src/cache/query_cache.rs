//! 查询缓存：在已完成的查询中找与新提示词最相似的一条
//!
//! 候选集 = 同一冲突域内 completed 且不早于 last_index_at 的查询（failed / running / cached 均排除）。
//! 对全部候选打分取最大值（分数相同取最近完成的），达到阈值才命中；未命中是正常返回。
//! 命中时写入一条 status=cached 的查询记录，使缓存命中也出现在历史中。

use std::sync::Arc;

use serde::Serialize;

use crate::cache::similarity::{jaccard, tokenize};
use crate::cache::IndexMark;
use crate::store::{Evidence, Query, QueryId, QueryStore, StoreError};

pub const DEFAULT_THRESHOLD: f64 = 0.8;
pub const DEFAULT_MAX_CANDIDATES: usize = 500;

/// 查找结果（尚未写入缓存记录）
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub source_query_id: QueryId,
    pub answer: String,
    pub evidence: Vec<Evidence>,
    pub score: f64,
}

/// 已写入存储的缓存命中
#[derive(Debug, Clone, Serialize)]
pub struct CachedAnswer {
    /// 新插入的 cached 记录 ID
    pub query_id: QueryId,
    pub source_query_id: QueryId,
    pub answer: String,
    pub evidence: Vec<Evidence>,
    pub score: f64,
}

pub struct QueryCache {
    store: Arc<dyn QueryStore>,
    mark: IndexMark,
    threshold: f64,
    max_candidates: usize,
}

impl QueryCache {
    pub fn new(store: Arc<dyn QueryStore>, mark: IndexMark) -> Self {
        Self {
            store,
            mark,
            threshold: DEFAULT_THRESHOLD,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates.max(1);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// 最佳匹配查找；只读，不写存储
    pub async fn lookup(&self, prompt: &str, domain: &str) -> Result<Option<CacheHit>, StoreError> {
        let mark = self.mark.last_index_at();
        let candidates = self
            .store
            .list_completed_in_domain(domain, mark, self.max_candidates)
            .await?;

        let prompt_tokens = tokenize(prompt);
        let mut best: Option<(f64, &Query)> = None;
        for candidate in candidates
            .iter()
            .filter(|q| q.domain == domain && q.is_cache_source(mark))
        {
            let score = jaccard(&prompt_tokens, &tokenize(&candidate.prompt));
            let replace = match best {
                None => true,
                Some((best_score, current)) => {
                    score > best_score
                        || (score == best_score && candidate.completed_at > current.completed_at)
                }
            };
            if replace {
                best = Some((score, candidate));
            }
        }

        match best {
            Some((score, source)) if score >= self.threshold => {
                tracing::info!(
                    score,
                    source_query_id = %source.id,
                    candidates = candidates.len(),
                    "cache hit"
                );
                Ok(Some(CacheHit {
                    source_query_id: source.id.clone(),
                    answer: source.answer.clone().unwrap_or_default(),
                    evidence: source.evidence.clone(),
                    score,
                }))
            }
            best => {
                tracing::debug!(
                    best_score = best.map(|(s, _)| s).unwrap_or(0.0),
                    threshold = self.threshold,
                    candidates = candidates.len(),
                    "cache miss"
                );
                Ok(None)
            }
        }
    }

    /// force=true 时无条件跳过缓存；命中时写入 cached 记录并返回
    pub async fn resolve(
        &self,
        prompt: &str,
        domain: &str,
        force: bool,
    ) -> Result<Option<CachedAnswer>, StoreError> {
        if force {
            tracing::debug!("cache bypassed (force)");
            return Ok(None);
        }
        let Some(hit) = self.lookup(prompt, domain).await? else {
            return Ok(None);
        };
        let query_id = self
            .store
            .insert_cached(prompt, domain, &hit.source_query_id, &hit.answer, &hit.evidence)
            .await?;
        Ok(Some(CachedAnswer {
            query_id,
            source_query_id: hit.source_query_id,
            answer: hit.answer,
            evidence: hit.evidence,
            score: hit.score,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::store::{MemoryQueryStore, QueryStatus, SqliteQueryStore};

    fn words(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
        range.map(|i| format!("w{i}")).collect()
    }

    async fn completed(store: &MemoryQueryStore, prompt: &str, answer: &str) -> QueryId {
        let id = store.insert_running(prompt, "repo", "single_pass").await.unwrap();
        store.complete(&id, answer, &[], Duration::from_millis(5)).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_best_match_wins_over_first_match() {
        let store = Arc::new(MemoryQueryStore::new());
        let incoming = words(1..=20).join(" ");
        // A: 交集 18，并集 22 -> 0.818
        let mut a_words = words(1..=18);
        a_words.extend(["x1".to_string(), "x2".to_string()]);
        let a = completed(&store, &a_words.join(" "), "answer A").await;
        // B: 交集 19，并集 20 -> 0.95
        let b = completed(&store, &words(1..=19).join(" "), "answer B").await;
        // 让 A 成为最近完成的，确认不是按时间先到先得
        let a_again = completed(&store, &a_words.join(" "), "answer A2").await;

        let cache = QueryCache::new(store.clone(), IndexMark::new());
        let hit = cache.lookup(&incoming, "repo").await.unwrap().unwrap();
        assert_eq!(hit.source_query_id, b);
        assert_eq!(hit.answer, "answer B");
        assert!((hit.score - 0.95).abs() < 1e-9);
        assert_ne!(hit.source_query_id, a);
        assert_ne!(hit.source_query_id, a_again);
    }

    #[tokio::test]
    async fn test_below_threshold_is_miss() {
        let store = Arc::new(MemoryQueryStore::new());
        completed(&store, "how does the cache work", "cache answer").await;
        let cache = QueryCache::new(store.clone(), IndexMark::new());
        assert!(cache
            .lookup("how does the task manager cancel work", "repo")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_stale_query_never_used() {
        let store = Arc::new(MemoryQueryStore::new());
        completed(&store, "How does X work?", "old answer").await;
        tokio::time::sleep(Duration::from_millis(2)).await;

        let mark = IndexMark::new();
        mark.mark_indexed_now();
        let cache = QueryCache::new(store.clone(), mark.clone());
        assert!(cache.lookup("How does X work?", "repo").await.unwrap().is_none());

        // 索引之后完成的查询重新可用
        tokio::time::sleep(Duration::from_millis(2)).await;
        let fresh = completed(&store, "How does X work?", "new answer").await;
        let hit = cache.lookup("how does x work", "repo").await.unwrap().unwrap();
        assert_eq!(hit.source_query_id, fresh);
    }

    #[tokio::test]
    async fn test_failed_running_and_cached_never_sources() {
        let store = Arc::new(MemoryQueryStore::new());
        let failed = store.insert_running("How does X work?", "repo", "single_pass").await.unwrap();
        store.fail(&failed, "boom").await.unwrap();
        store.insert_running("How does X work?", "repo", "single_pass").await.unwrap();
        store
            .insert_cached("How does X work?", "repo", "q_elsewhere", "copied", &[])
            .await
            .unwrap();

        let cache = QueryCache::new(store.clone(), IndexMark::new());
        assert!(cache.lookup("How does X work?", "repo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_records_cached_query() {
        let store = Arc::new(MemoryQueryStore::new());
        let source = completed(&store, "How does X work?", "X works via Y").await;
        let cache = QueryCache::new(store.clone(), IndexMark::new());

        let cached = cache
            .resolve("how does x work", "repo", false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.source_query_id, source);
        assert_eq!(cached.answer, "X works via Y");

        let record = store.get(&cached.query_id).await.unwrap().unwrap();
        assert_eq!(record.status, QueryStatus::Cached);
        assert_eq!(record.source_query_id.as_deref(), Some(source.as_str()));

        // 缓存记录本身不会成为下一次命中的来源
        let again = cache.resolve("How does X work", "repo", false).await.unwrap().unwrap();
        assert_eq!(again.source_query_id, source);
    }

    #[tokio::test]
    async fn test_force_bypasses_exact_match() {
        let store = Arc::new(MemoryQueryStore::new());
        completed(&store, "How does X work?", "X works via Y").await;
        let cache = QueryCache::new(store.clone(), IndexMark::new());
        assert!(cache.resolve("How does X work?", "repo", true).await.unwrap().is_none());
        assert_eq!(store.list_recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_busy_domain_does_not_crowd_out_quiet_one() {
        let store = Arc::new(MemoryQueryStore::new());
        let quiet = store.insert_running("How does X work?", "quiet", "single_pass").await.unwrap();
        store.complete(&quiet, "quiet answer", &[], Duration::ZERO).await.unwrap();
        for i in 0..5 {
            tokio::time::sleep(Duration::from_millis(1)).await;
            let id = store
                .insert_running(&format!("busy question {i}"), "busy", "single_pass")
                .await
                .unwrap();
            store.complete(&id, "busy answer", &[], Duration::ZERO).await.unwrap();
        }

        let cache = QueryCache::new(store.clone(), IndexMark::new()).with_max_candidates(2);
        let hit = cache.lookup("how does x work", "quiet").await.unwrap().unwrap();
        assert_eq!(hit.source_query_id, quiet);
    }

    #[tokio::test]
    async fn test_completion_in_same_millisecond_as_mark_is_fresh() {
        let store = Arc::new(SqliteQueryStore::in_memory().unwrap());
        let id = store.insert_running("How does X work?", "repo", "single_pass").await.unwrap();
        store.complete(&id, "X answer", &[], Duration::ZERO).await.unwrap();
        let stored = store.get(&id).await.unwrap().unwrap().completed_at.unwrap();

        // 标记落在同一毫秒内、晚于读回的毫秒值
        let mark = IndexMark::new();
        mark.mark_indexed(stored + chrono::Duration::microseconds(400));
        let cache = QueryCache::new(store.clone(), mark);
        let hit = cache.lookup("how does x work", "repo").await.unwrap().unwrap();
        assert_eq!(hit.source_query_id, id);
    }

    #[tokio::test]
    async fn test_other_domain_is_not_a_source() {
        let store = Arc::new(MemoryQueryStore::new());
        completed(&store, "How does X work?", "repo answer").await;
        let cache = QueryCache::new(store.clone(), IndexMark::new());
        assert!(cache.lookup("How does X work?", "other-repo").await.unwrap().is_none());
    }
}
