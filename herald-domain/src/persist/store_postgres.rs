//! Postgres 事件存储（PgEventStore）
//!
//! 表结构见 `SCHEMA`；状态转换在 SQL 条件中约束，
//! 受影响行数为 0 时再查询一次以区分“不存在”与“非法转换”。
//!
use super::{EventRecord, EventStatus, EventStore, EventStoreConfig};
use crate::error::{EventError, EventResult as Result};
use crate::event::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::{debug, warn};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS event_records (
    id            BIGSERIAL PRIMARY KEY,
    event_type    VARCHAR(100) NOT NULL,
    event_id      VARCHAR(160) NOT NULL UNIQUE,
    user_id       BIGINT NULL,
    payload       TEXT NOT NULL,
    created_at    TIMESTAMPTZ NOT NULL,
    processed_at  TIMESTAMPTZ NULL,
    status        VARCHAR(20) NOT NULL DEFAULT 'pending',
    retry_count   INTEGER NOT NULL DEFAULT 0,
    error_message TEXT NULL
);
CREATE INDEX IF NOT EXISTS idx_event_records_event_type ON event_records (event_type);
CREATE INDEX IF NOT EXISTS idx_event_records_user_id ON event_records (user_id);
CREATE INDEX IF NOT EXISTS idx_event_records_created_at ON event_records (created_at);
CREATE INDEX IF NOT EXISTS idx_event_records_status ON event_records (status, retry_count);
"#;

const COLUMNS: &str = "id, event_type, event_id, user_id, payload, created_at, processed_at, status, retry_count, error_message";

#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
    config: EventStoreConfig,
}

impl PgEventStore {
    pub fn new(pool: PgPool, config: EventStoreConfig) -> Self {
        Self { pool, config }
    }

    /// 建表与索引（幂等）
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn to_record(row: &PgRow) -> Result<EventRecord> {
        let status: String = row.try_get("status")?;
        let user_id: Option<i64> = row.try_get("user_id")?;
        let retry_count: i32 = row.try_get("retry_count")?;

        Ok(EventRecord {
            id: row.try_get("id")?,
            event_type: row.try_get("event_type")?,
            event_id: row.try_get("event_id")?,
            user_id: user_id.and_then(|v| u64::try_from(v).ok()),
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            status: status.parse()?,
            retry_count: u32::try_from(retry_count).unwrap_or(0),
            error_message: row.try_get("error_message")?,
        })
    }

    fn to_records(rows: &[PgRow]) -> Result<Vec<EventRecord>> {
        rows.iter().map(Self::to_record).collect()
    }

    /// `LIMIT`/`OFFSET` 子句，0 表示不限制
    fn page_clause(limit: usize, offset: usize) -> String {
        let mut clause = String::new();
        if limit > 0 {
            clause.push_str(&format!(" LIMIT {limit}"));
        }
        if offset > 0 {
            clause.push_str(&format!(" OFFSET {offset}"));
        }
        clause
    }

    /// 更新未命中时区分“不存在”与“非法转换”
    async fn explain_miss(&self, event_id: &str, to: EventStatus) -> EventError {
        let status = sqlx::query("SELECT status FROM event_records WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await;

        match status {
            Ok(Some(row)) => {
                let from = row
                    .try_get::<String, _>("status")
                    .ok()
                    .and_then(|s| s.parse::<EventStatus>().ok())
                    .map_or("unknown", |s| s.as_str());
                EventError::InvalidTransition {
                    event_id: event_id.to_string(),
                    from,
                    to: to.as_str(),
                }
            }
            Ok(None) => EventError::not_found(format!("event {event_id}")),
            Err(err) => err.into(),
        }
    }
}

fn user_id_param(user_id: Option<u64>) -> Option<i64> {
    user_id.and_then(|v| i64::try_from(v).ok())
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn store(&self, event: &Event) -> Result<EventRecord> {
        let record = EventRecord::from_event(event)?;
        let sql = format!(
            "INSERT INTO event_records (event_type, event_id, user_id, payload, created_at, status, retry_count) \
             VALUES ($1, $2, $3, $4, $5, $6, 0) RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&record.event_type)
            .bind(&record.event_id)
            .bind(user_id_param(record.user_id))
            .bind(&record.payload)
            .bind(record.created_at)
            .bind(record.status.as_str())
            .fetch_one(&self.pool)
            .await?;

        let stored = Self::to_record(&row)?;
        debug!(
            event_type = %stored.event_type,
            event_id = %stored.event_id,
            user_id = stored.user_id,
            "event stored"
        );
        Ok(stored)
    }

    async fn get_event(&self, event_id: &str) -> Result<EventRecord> {
        let sql = format!("SELECT {COLUMNS} FROM event_records WHERE event_id = $1");
        let row = sqlx::query(&sql)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EventError::not_found(format!("event {event_id}")))?;
        Self::to_record(&row)
    }

    async fn get_events(
        &self,
        event_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM event_records WHERE event_type = $1 ORDER BY created_at DESC, id DESC{}",
            Self::page_clause(limit, offset)
        );
        let rows = sqlx::query(&sql).bind(event_type).fetch_all(&self.pool).await?;
        Self::to_records(&rows)
    }

    async fn get_events_by_user(
        &self,
        user_id: u64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM event_records WHERE user_id = $1 ORDER BY created_at DESC, id DESC{}",
            Self::page_clause(limit, offset)
        );
        let rows = sqlx::query(&sql)
            .bind(user_id_param(Some(user_id)))
            .fetch_all(&self.pool)
            .await?;
        Self::to_records(&rows)
    }

    async fn get_events_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM event_records WHERE created_at BETWEEN $1 AND $2 \
             ORDER BY created_at DESC, id DESC{}",
            Self::page_clause(limit, offset)
        );
        let rows = sqlx::query(&sql)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
        Self::to_records(&rows)
    }

    async fn mark_as_processed(&self, event_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE event_records SET status = 'processed', processed_at = $2 WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EventError::not_found(format!("event {event_id}")));
        }
        Ok(())
    }

    async fn mark_as_failed(&self, event_id: &str, message: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE event_records SET status = 'failed', retry_count = retry_count + 1, \
             error_message = CASE WHEN error_message IS NULL OR error_message = '' THEN $2 \
                                  ELSE error_message || E'\\n' || $2 END \
             WHERE event_id = $1 AND status <> 'processed'",
        )
        .bind(event_id)
        .bind(message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.explain_miss(event_id, EventStatus::Failed).await);
        }
        Ok(())
    }

    async fn get_failed_events(&self, limit: usize) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM event_records WHERE status = 'failed' AND retry_count < $1 \
             ORDER BY created_at ASC, id ASC{}",
            Self::page_clause(limit, 0)
        );
        let rows = sqlx::query(&sql)
            .bind(i32::try_from(self.config.max_retries).unwrap_or(i32::MAX))
            .fetch_all(&self.pool)
            .await?;
        Self::to_records(&rows)
    }

    async fn replay_events(
        &self,
        event_type: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM event_records WHERE created_at BETWEEN $1 AND $2 \
             AND ($3::TEXT IS NULL OR event_type = $3) ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(start)
            .bind(end)
            .bind(event_type)
            .fetch_all(&self.pool)
            .await?;

        let mut events = Vec::with_capacity(rows.len());
        for record in Self::to_records(&rows)? {
            match record.to_event() {
                Ok(event) => events.push(event),
                Err(err) => warn!(
                    event_id = %record.event_id,
                    error = %err,
                    "failed to deserialize event payload for replay"
                ),
            }
        }
        Ok(events)
    }
}
