//! 缓存失效标记 last_index_at
//!
//! 进程级状态：索引流水线每次更新索引后调用 mark_indexed，QueryCache 只读取。
//! 早于该标记完成的查询不再作为缓存来源。测试可用 IndexMark::new() 得到独立实例。
//! 标记按存储精度（毫秒）截断，与读回的 completed_at 同精度比较。

use std::sync::{Arc, OnceLock, RwLock};

use chrono::{DateTime, SubsecRound, Utc};

static GLOBAL_MARK: OnceLock<IndexMark> = OnceLock::new();

#[derive(Debug, Clone, Default)]
pub struct IndexMark {
    last_index_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl IndexMark {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进程级共享实例
    pub fn global() -> Self {
        GLOBAL_MARK.get_or_init(IndexMark::new).clone()
    }

    /// 唯一的写入口，由索引方调用
    pub fn mark_indexed(&self, at: DateTime<Utc>) {
        let mut guard = self
            .last_index_at
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let at = at.trunc_subsecs(3);
        *guard = Some(at);
        tracing::info!(last_index_at = %at, "index mark updated, older cached answers are stale");
    }

    pub fn mark_indexed_now(&self) {
        self.mark_indexed(Utc::now());
    }

    /// 未设置时为 None，表示所有已完成查询均可作为缓存来源
    pub fn last_index_at(&self) -> Option<DateTime<Utc>> {
        *self
            .last_index_at
            .read()
            .unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_clones_share_state() {
        let mark = IndexMark::new();
        let reader = mark.clone();
        assert!(reader.last_index_at().is_none());

        let at = Utc::now().trunc_subsecs(3);
        mark.mark_indexed(at);
        assert_eq!(reader.last_index_at(), Some(at));
    }

    #[test]
    fn test_mark_is_millisecond_precision() {
        let mark = IndexMark::new();
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        mark.mark_indexed(at);
        assert_eq!(
            mark.last_index_at().unwrap().timestamp_nanos_opt(),
            Some(1_700_000_000_123_000_000)
        );
    }

    #[test]
    fn test_global_is_shared() {
        let a = IndexMark::global();
        let b = IndexMark::global();
        assert!(Arc::ptr_eq(&a.last_index_at, &b.last_index_at));
    }
}
