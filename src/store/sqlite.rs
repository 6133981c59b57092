//! SQLite 查询存储（rusqlite，同步连接由互斥锁保护）
//!
//! 时间戳以毫秒整数保存；证据列为 JSON 数组。终态转换使用 `WHERE status = 'running'`
//! 的条件更新，由互斥锁串行化。

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Evidence, Query, QueryId, QueryStatus, QueryStore, StoreError};

const SELECT_COLUMNS: &str = "id, prompt, domain, strategy, status, created_at, completed_at,
     duration_ms, answer, evidence, error, source_query_id";

pub struct SqliteQueryStore {
    conn: Mutex<Connection>,
}

impl SqliteQueryStore {
    /// 打开（必要时创建）数据库文件并建表
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS queries (
                id TEXT PRIMARY KEY,
                prompt TEXT NOT NULL,
                domain TEXT NOT NULL,
                strategy TEXT,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                completed_at INTEGER,
                duration_ms INTEGER,
                answer TEXT,
                evidence TEXT NOT NULL DEFAULT '[]',
                error TEXT,
                source_query_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_queries_status_completed
                ON queries(status, completed_at);
            CREATE INDEX IF NOT EXISTS idx_queries_domain_completed
                ON queries(domain, status, completed_at);
            CREATE INDEX IF NOT EXISTS idx_queries_created ON queries(created_at);",
        )?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // 连接本身在 panic 后仍然可用
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(conn: &Connection, q: &Query) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO queries
             (id, prompt, domain, strategy, status, created_at, completed_at,
              duration_ms, answer, evidence, error, source_query_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                q.id,
                q.prompt,
                q.domain,
                q.strategy,
                q.status.as_str(),
                q.created_at.timestamp_millis(),
                q.completed_at.map(|t| t.timestamp_millis()),
                q.duration_ms.map(|d| d as i64),
                q.answer,
                serde_json::to_string(&q.evidence)?,
                q.error,
                q.source_query_id,
            ],
        )?;
        Ok(())
    }

    /// 条件更新未命中时区分「不存在」与「已是终态」
    fn transition_error(conn: &Connection, id: &str) -> StoreError {
        let status: Result<Option<String>, _> = conn
            .query_row("SELECT status FROM queries WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .optional();
        match status {
            Ok(Some(s)) => StoreError::AlreadyTerminal {
                id: id.to_string(),
                status: QueryStatus::parse(&s).unwrap_or(QueryStatus::Failed),
            },
            Ok(None) => StoreError::NotFound(id.to_string()),
            Err(e) => StoreError::Sqlite(e),
        }
    }

    fn query_many(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Query>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawRow::from_row)?;
        let queries = rows
            .map(|r| r.map_err(StoreError::from).and_then(RawRow::into_query))
            .collect();
        queries
    }
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("invalid timestamp {}", ms)))
}

/// 数据库行的原始列值，转换为 Query 时再校验
struct RawRow {
    id: String,
    prompt: String,
    domain: String,
    strategy: Option<String>,
    status: String,
    created_at: i64,
    completed_at: Option<i64>,
    duration_ms: Option<i64>,
    answer: Option<String>,
    evidence: String,
    error: Option<String>,
    source_query_id: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            prompt: row.get(1)?,
            domain: row.get(2)?,
            strategy: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            completed_at: row.get(6)?,
            duration_ms: row.get(7)?,
            answer: row.get(8)?,
            evidence: row.get(9)?,
            error: row.get(10)?,
            source_query_id: row.get(11)?,
        })
    }

    fn into_query(self) -> Result<Query, StoreError> {
        let status = QueryStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status '{}'", self.status)))?;
        Ok(Query {
            status,
            created_at: millis_to_datetime(self.created_at)?,
            completed_at: self.completed_at.map(millis_to_datetime).transpose()?,
            duration_ms: self.duration_ms.map(|d| d.max(0) as u64),
            evidence: serde_json::from_str(&self.evidence)?,
            id: self.id,
            prompt: self.prompt,
            domain: self.domain,
            strategy: self.strategy,
            answer: self.answer,
            error: self.error,
            source_query_id: self.source_query_id,
        })
    }
}

#[async_trait]
impl QueryStore for SqliteQueryStore {
    async fn insert_running(
        &self,
        prompt: &str,
        domain: &str,
        strategy: &str,
    ) -> Result<QueryId, StoreError> {
        let query = Query::running(prompt, domain, strategy);
        Self::insert(&self.lock(), &query)?;
        Ok(query.id)
    }

    async fn complete(
        &self,
        id: &str,
        answer: &str,
        evidence: &[Evidence],
        duration: Duration,
    ) -> Result<(), StoreError> {
        let evidence_json = serde_json::to_string(evidence)?;
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE queries
             SET status = 'completed', answer = ?1, evidence = ?2,
                 completed_at = ?3, duration_ms = ?4
             WHERE id = ?5 AND status = 'running'",
            params![
                answer,
                evidence_json,
                Utc::now().timestamp_millis(),
                duration.as_millis() as i64,
                id
            ],
        )?;
        if updated == 0 {
            return Err(Self::transition_error(&conn, id));
        }
        Ok(())
    }

    async fn fail(&self, id: &str, error: &str) -> Result<(), StoreError> {
        let now = Utc::now().timestamp_millis();
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE queries
             SET status = 'failed', error = ?1, completed_at = ?2,
                 duration_ms = MAX(?2 - created_at, 0)
             WHERE id = ?3 AND status = 'running'",
            params![error, now, id],
        )?;
        if updated == 0 {
            return Err(Self::transition_error(&conn, id));
        }
        Ok(())
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
        Self::insert(&self.lock(), &query)?;
        Ok(query.id)
    }

    async fn get(&self, id: &str) -> Result<Option<Query>, StoreError> {
        let conn = self.lock();
        let sql = format!("SELECT {} FROM queries WHERE id = ?1", SELECT_COLUMNS);
        let raw = conn
            .query_row(&sql, params![id], RawRow::from_row)
            .optional()?;
        raw.map(RawRow::into_query).transpose()
    }

    async fn list_completed_since(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Query>, StoreError> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {} FROM queries
             WHERE status = 'completed' AND completed_at >= ?1
             ORDER BY completed_at DESC
             LIMIT ?2",
            SELECT_COLUMNS
        );
        let since_ms = since.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN);
        Self::query_many(&conn, &sql, params![since_ms, limit as i64])
    }

    async fn list_completed_in_domain(
        &self,
        domain: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Query>, StoreError> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {} FROM queries
             WHERE domain = ?1 AND status = 'completed' AND completed_at >= ?2
             ORDER BY completed_at DESC
             LIMIT ?3",
            SELECT_COLUMNS
        );
        let since_ms = since.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN);
        Self::query_many(&conn, &sql, params![domain, since_ms, limit as i64])
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Query>, StoreError> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {} FROM queries ORDER BY created_at DESC LIMIT ?1",
            SELECT_COLUMNS
        );
        Self::query_many(&conn, &sql, params![limit as i64])
    }
}
