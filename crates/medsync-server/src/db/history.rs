//! Import history persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::ingest::error::StoreError;
use crate::ingest::history::{ImportHistoryRecord, RunStatus};
use crate::ingest::store::HistoryStore;

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    source: String,
    triggered_by: String,
    file_name: Option<String>,
    file_sha256: Option<String>,
    started_at: DateTime<Utc>,
    duration_ms: i64,
    status: String,
    success: i64,
    errors: i64,
    duplicates: i64,
    skipped: i64,
    total_processed: i64,
    inserted: i64,
    updated: i64,
    complemented: i64,
    retired: i64,
    detail: Json<serde_json::Value>,
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl From<HistoryRow> for ImportHistoryRecord {
    fn from(row: HistoryRow) -> Self {
        ImportHistoryRecord {
            id: row.id,
            source: row.source,
            triggered_by: row.triggered_by,
            file_name: row.file_name,
            file_sha256: row.file_sha256,
            started_at: row.started_at,
            duration_ms: count(row.duration_ms),
            status: RunStatus::parse(&row.status).unwrap_or(RunStatus::Failed),
            success: count(row.success),
            errors: count(row.errors),
            duplicates: count(row.duplicates),
            skipped: count(row.skipped),
            total_processed: count(row.total_processed),
            inserted: count(row.inserted),
            updated: count(row.updated),
            complemented: count(row.complemented),
            retired: count(row.retired),
            detail: row.detail.0,
        }
    }
}

#[derive(Clone)]
pub struct PgHistoryStore {
    pool: PgPool,
}

impl PgHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn append(&self, record: &ImportHistoryRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO import_history (
                id, source, triggered_by, file_name, file_sha256, started_at,
                duration_ms, status, success, errors, duplicates, skipped,
                total_processed, inserted, updated, complemented, retired, detail
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(record.id)
        .bind(&record.source)
        .bind(&record.triggered_by)
        .bind(&record.file_name)
        .bind(&record.file_sha256)
        .bind(record.started_at)
        .bind(to_db(record.duration_ms))
        .bind(record.status.as_str())
        .bind(to_db(record.success))
        .bind(to_db(record.errors))
        .bind(to_db(record.duplicates))
        .bind(to_db(record.skipped))
        .bind(to_db(record.total_processed))
        .bind(to_db(record.inserted))
        .bind(to_db(record.updated))
        .bind(to_db(record.complemented))
        .bind(to_db(record.retired))
        .bind(Json(&record.detail))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(
        &self,
        source: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ImportHistoryRecord>, StoreError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, source, triggered_by, file_name, file_sha256, started_at,
                   duration_ms, status, success, errors, duplicates, skipped,
                   total_processed, inserted, updated, complemented, retired, detail
            FROM import_history
            WHERE ($1::TEXT IS NULL OR source = $1)
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(source)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ImportHistoryRecord::from).collect())
    }
}
