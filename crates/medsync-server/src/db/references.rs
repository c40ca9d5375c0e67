//! Reference code lookups

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::ingest::error::StoreError;
use crate::ingest::sources::ReferenceTable;
use crate::ingest::store::ReferenceStore;

#[derive(Clone)]
pub struct PgReferenceStore {
    pool: PgPool,
}

impl PgReferenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferenceStore for PgReferenceStore {
    async fn existing_codes(
        &self,
        table: ReferenceTable,
        codes: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        if codes.is_empty() {
            return Ok(HashSet::new());
        }

        // Table names come from a closed enum, never from input
        let sql = format!("SELECT code FROM {} WHERE code = ANY($1)", table.table_name());
        let found: Vec<(String,)> = sqlx::query_as(&sql)
            .bind(codes)
            .fetch_all(&self.pool)
            .await?;

        Ok(found.into_iter().map(|(code,)| code).collect())
    }
}
