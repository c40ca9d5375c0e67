//! Canonical record table
//!
//! All targets share `import_records`, keyed by `(target_table,
//! natural_key)` with the field map in a JSONB column. A chunk is merged in
//! one transaction: the stored rows are locked, the merge is decided in Rust
//! and the result is written back with a single multi-row upsert.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::ingest::error::StoreError;
use crate::ingest::priority::{merge_record, MergeAction};
use crate::ingest::store::{MergeChunk, MergeCounts, RecordStatus, RecordStore, StoredRecord};

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    natural_key: String,
    fields: Json<BTreeMap<String, String>>,
    owner_source: String,
    status: String,
    last_seen_at: DateTime<Utc>,
}

impl From<RecordRow> for StoredRecord {
    fn from(row: RecordRow) -> Self {
        StoredRecord {
            key: row.natural_key,
            fields: row.fields.0,
            owner: row.owner_source,
            // Unknown statuses come from manual edits; treat them as reviewed
            status: RecordStatus::parse(&row.status).unwrap_or(RecordStatus::NeedsRevalidation),
            last_seen_at: row.last_seen_at,
        }
    }
}

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn merge_chunk(&self, chunk: MergeChunk<'_>) -> Result<MergeCounts, StoreError> {
        if chunk.rows.is_empty() {
            return Ok(MergeCounts::default());
        }

        let mut tx = self.pool.begin().await?;

        let keys: Vec<&str> = chunk.rows.iter().map(|r| r.key.as_str()).collect();
        let existing: HashMap<String, StoredRecord> = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT natural_key, fields, owner_source, status, last_seen_at
            FROM import_records
            WHERE target_table = $1 AND natural_key = ANY($2)
            FOR UPDATE
            "#,
        )
        .bind(chunk.target_table)
        .bind(&keys)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|row| (row.natural_key.clone(), StoredRecord::from(row)))
        .collect();

        let mut counts = MergeCounts::default();
        let mut merged = Vec::with_capacity(chunk.rows.len());
        for row in chunk.rows {
            let (action, record) = merge_record(
                existing.get(&row.key),
                row,
                chunk.source,
                chunk.run_start,
                chunk.priorities,
            );
            match action {
                MergeAction::Insert => counts.inserted += 1,
                MergeAction::Update => counts.updated += 1,
                MergeAction::Complement => counts.complemented += 1,
            }
            merged.push(record);
        }

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            INSERT INTO import_records (
                target_table,
                natural_key,
                fields,
                owner_source,
                status,
                last_seen_at
            )
            "#,
        );

        query_builder.push_values(&merged, |mut b, record| {
            b.push_bind(chunk.target_table)
                .push_bind(&record.key)
                .push_bind(Json(&record.fields))
                .push_bind(&record.owner)
                .push_bind(record.status.as_str())
                .push_bind(record.last_seen_at);
        });

        query_builder.push(
            r#"
            ON CONFLICT (target_table, natural_key)
            DO UPDATE SET
                fields = EXCLUDED.fields,
                owner_source = EXCLUDED.owner_source,
                status = EXCLUDED.status,
                last_seen_at = EXCLUDED.last_seen_at,
                updated_at = NOW()
            "#,
        );

        query_builder.build().execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(counts)
    }

    async fn retire(
        &self,
        target_table: &str,
        source: &str,
        run_start: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE import_records
            SET status = 'needs_revalidation', updated_at = NOW()
            WHERE target_table = $1
              AND owner_source = $2
              AND status = 'active'
              AND last_seen_at < $3
            "#,
        )
        .bind(target_table)
        .bind(source)
        .bind(run_start)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
