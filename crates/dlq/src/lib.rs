//! C6 dead-letter sink. Events that exhaust the worker's retry budget land
//! here instead of being dropped (spec.md §4.7). Writes are idempotent on
//! `original_event_id` so a redelivery that fails again after a prior
//! successful DLQ write is a no-op, not a duplicate row.
use async_trait::async_trait;
use pipeline_core::DeadLetterRecord;
use sqlx::postgres::PgPool;
use sqlx::Row;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DlqError {
    #[error("dlq write failed: {0}")]
    WriteFailed(#[from] sqlx::Error),
}

#[async_trait]
pub trait DlqSink: Send + Sync {
    async fn write(&self, records: &[DeadLetterRecord]) -> Result<(), DlqError>;
    async fn list_recent(&self, limit: i64) -> Result<Vec<DeadLetterRecord>, DlqError>;
    async fn count(&self) -> Result<i64, DlqError>;
}

pub struct PostgresDlqSink {
    pool: PgPool,
}

impl PostgresDlqSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl DlqSink for PostgresDlqSink {
    async fn write(&self, records: &[DeadLetterRecord]) -> Result<(), DlqError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO events_dlq
                    (original_event_id, user_id, original_event_payload, error_message, failed_at, retry_count, stream_entry_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (original_event_id) DO NOTHING
                "#,
            )
            .bind(&record.original_event_id)
            .bind(&record.user_id)
            .bind(&record.original_event_payload)
            .bind(&record.error_message)
            .bind(record.failed_at)
            .bind(record.retry_count as i32)
            .bind(&record.stream_entry_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<DeadLetterRecord>, DlqError> {
        let rows = sqlx::query(
            r#"
            SELECT original_event_id, user_id, original_event_payload, error_message, failed_at, retry_count, stream_entry_id
            FROM events_dlq
            ORDER BY failed_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| DeadLetterRecord {
                original_event_id: row.get("original_event_id"),
                user_id: row.get("user_id"),
                original_event_payload: row.get("original_event_payload"),
                error_message: row.get("error_message"),
                failed_at: row.get("failed_at"),
                retry_count: row.get::<i32, _>("retry_count") as u32,
                stream_entry_id: row.get("stream_entry_id"),
            })
            .collect())
    }

    async fn count(&self) -> Result<i64, DlqError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM events_dlq")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }
}
