//! Storage seams of the pipeline
//!
//! The pipeline reads reference codes, merges rows and appends history only
//! through these traits. `crate::db` implements them on Postgres and
//! `crate::ingest::memory` in process.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StoreError;
use super::history::ImportHistoryRecord;
use super::priority::PriorityTable;
use super::sources::ReferenceTable;
use super::transform::TransformedRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    /// Left its owner's feed; kept until someone reviews it
    NeedsRevalidation,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::NeedsRevalidation => "needs_revalidation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(RecordStatus::Active),
            "needs_revalidation" => Some(RecordStatus::NeedsRevalidation),
            _ => None,
        }
    }
}

/// A canonical row as the store holds it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: String,
    pub fields: BTreeMap<String, String>,
    pub owner: String,
    pub status: RecordStatus,
    pub last_seen_at: DateTime<Utc>,
}

/// One load chunk addressed to a target table
#[derive(Debug, Clone, Copy)]
pub struct MergeChunk<'a> {
    pub target_table: &'a str,
    pub source: &'a str,
    pub rows: &'a [TransformedRow],
    pub run_start: DateTime<Utc>,
    pub priorities: &'a PriorityTable,
}

/// Per-action row counts of one merged chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub inserted: u64,
    pub updated: u64,
    pub complemented: u64,
}

impl MergeCounts {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.complemented
    }
}

impl std::ops::AddAssign for MergeCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
        self.complemented += rhs.complemented;
    }
}

/// Write path of the canonical store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Merge one chunk atomically; on error nothing of the chunk is applied
    async fn merge_chunk(&self, chunk: MergeChunk<'_>) -> Result<MergeCounts, StoreError>;

    /// Flag active rows owned by `source` not seen since `run_start`
    async fn retire(
        &self,
        target_table: &str,
        source: &str,
        run_start: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

/// Read access to reference code tables
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// The subset of `codes` present in `table`
    async fn existing_codes(
        &self,
        table: ReferenceTable,
        codes: &[String],
    ) -> Result<HashSet<String>, StoreError>;
}

/// Append-only audit trail of import runs
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, record: &ImportHistoryRecord) -> Result<(), StoreError>;

    /// Newest first, optionally restricted to one source
    async fn recent(
        &self,
        source: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ImportHistoryRecord>, StoreError>;
}
