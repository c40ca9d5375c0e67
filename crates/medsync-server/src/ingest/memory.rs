//! In-process store implementations
//!
//! Used by the test suites and by dry runs that must not touch Postgres. They
//! follow the same contracts as the database adapters, including chunk
//! atomicity, and can be told to fail to exercise error paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StoreError;
use super::history::ImportHistoryRecord;
use super::priority::{merge_record, MergeAction};
use super::sources::ReferenceTable;
use super::store::{
    HistoryStore, MergeChunk, MergeCounts, RecordStatus, RecordStore, ReferenceStore, StoredRecord,
};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
}

// ============================================================================
// Reference codes
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryReferenceStore {
    codes: HashMap<ReferenceTable, HashSet<String>>,
    failing: HashSet<ReferenceTable>,
    lookups: AtomicUsize,
}

impl MemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codes<I, S>(mut self, table: ReferenceTable, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codes
            .entry(table)
            .or_default()
            .extend(codes.into_iter().map(Into::into));
        self
    }

    /// Every lookup against `table` fails
    pub fn failing_for(mut self, table: ReferenceTable) -> Self {
        self.failing.insert(table);
        self
    }

    /// Backend round trips served so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReferenceStore for MemoryReferenceStore {
    async fn existing_codes(
        &self,
        table: ReferenceTable,
        codes: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&table) {
            return Err(StoreError::Unavailable(format!("{table} lookup refused")));
        }
        let known = self.codes.get(&table);
        Ok(codes
            .iter()
            .filter(|c| known.is_some_and(|k| k.contains(*c)))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Canonical records
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<(String, String), StoredRecord>>,
    poisoned_keys: Mutex<HashSet<String>>,
    merge_calls: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any chunk containing `key` fails as a whole
    pub fn fail_chunks_with(&self, key: &str) {
        if let Ok(mut keys) = self.poisoned_keys.lock() {
            keys.insert(key.to_string());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut keys) = self.poisoned_keys.lock() {
            keys.clear();
        }
    }

    pub fn merge_calls(&self) -> usize {
        self.merge_calls.load(Ordering::SeqCst)
    }

    pub fn get(&self, target_table: &str, key: &str) -> Option<StoredRecord> {
        self.records
            .lock()
            .ok()?
            .get(&(target_table.to_string(), key.to_string()))
            .cloned()
    }

    /// Rows of a table, in key order
    pub fn rows(&self, target_table: &str) -> Vec<StoredRecord> {
        self.records
            .lock()
            .map(|records| {
                records
                    .iter()
                    .filter(|((table, _), _)| table == target_table)
                    .map(|(_, r)| r.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn seed(&self, target_table: &str, record: StoredRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.insert((target_table.to_string(), record.key.clone()), record);
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn merge_chunk(&self, chunk: MergeChunk<'_>) -> Result<MergeCounts, StoreError> {
        self.merge_calls.fetch_add(1, Ordering::SeqCst);
        {
            let poisoned = lock(&self.poisoned_keys)?;
            if let Some(row) = chunk.rows.iter().find(|r| poisoned.contains(&r.key)) {
                return Err(StoreError::Unavailable(format!(
                    "simulated failure on key {}",
                    row.key
                )));
            }
        }

        let mut records = lock(&self.records)?;
        let mut counts = MergeCounts::default();
        for row in chunk.rows {
            let slot = (chunk.target_table.to_string(), row.key.clone());
            let (action, merged) = merge_record(
                records.get(&slot),
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
            records.insert(slot, merged);
        }
        Ok(counts)
    }

    async fn retire(
        &self,
        target_table: &str,
        source: &str,
        run_start: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut records = lock(&self.records)?;
        let mut retired = 0;
        for ((table, _), record) in records.iter_mut() {
            if table == target_table
                && record.owner == source
                && record.status == RecordStatus::Active
                && record.last_seen_at < run_start
            {
                record.status = RecordStatus::NeedsRevalidation;
                retired += 1;
            }
        }
        Ok(retired)
    }
}

// ============================================================================
// History
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<ImportHistoryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<ImportHistoryRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, record: &ImportHistoryRecord) -> Result<(), StoreError> {
        lock(&self.records)?.push(record.clone());
        Ok(())
    }

    async fn recent(
        &self,
        source: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ImportHistoryRecord>, StoreError> {
        let records = lock(&self.records)?;
        Ok(records
            .iter()
            .rev()
            .filter(|r| source.map_or(true, |s| r.source == s))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}
