//! Chunked, priority-aware loading into the canonical store
//!
//! Rows go to the store in chunks of the source's chunk size. Each chunk is
//! one atomic merge; a failed chunk is counted, logged and left behind while
//! the remaining chunks still load.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::error::{ImportError, Result};
use super::priority::PriorityTable;
use super::progress::ProgressTracker;
use super::sources::SourceSpec;
use super::store::{MergeChunk, MergeCounts, RecordStore};
use super::transform::TransformedRow;

/// A chunk the store refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedChunk {
    pub index: usize,
    pub rows: u64,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub counts: MergeCounts,
    /// Rows lost to failed chunks
    pub errors: u64,
    pub failed_chunks: Vec<FailedChunk>,
}

impl LoadSummary {
    pub fn has_failures(&self) -> bool {
        !self.failed_chunks.is_empty()
    }
}

pub struct BatchLoader<'a> {
    store: &'a dyn RecordStore,
    priorities: &'a PriorityTable,
}

impl<'a> BatchLoader<'a> {
    pub fn new(store: &'a dyn RecordStore, priorities: &'a PriorityTable) -> Self {
        Self { store, priorities }
    }

    /// Merge `rows` chunk by chunk, stopping early only on cancellation
    pub async fn upsert(
        &self,
        spec: &SourceSpec,
        rows: &[TransformedRow],
        run_start: DateTime<Utc>,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<LoadSummary> {
        let chunk_size = spec.chunk_size.max(1);
        let total_chunks = rows.len().div_ceil(chunk_size);
        let mut summary = LoadSummary::default();

        for (index, chunk) in rows.chunks(chunk_size).enumerate() {
            if cancel.is_cancelled() {
                return Err(ImportError::Cancelled);
            }

            let merge = MergeChunk {
                target_table: spec.target_table,
                source: spec.id,
                rows: chunk,
                run_start,
                priorities: self.priorities,
            };

            match self.store.merge_chunk(merge).await {
                Ok(counts) => {
                    debug!(
                        source = spec.id,
                        chunk = index,
                        rows = chunk.len(),
                        inserted = counts.inserted,
                        updated = counts.updated,
                        complemented = counts.complemented,
                        "Chunk merged"
                    );
                    summary.counts += counts;
                }
                Err(e) => {
                    error!(
                        source = spec.id,
                        chunk = index,
                        rows = chunk.len(),
                        error = %e,
                        "Chunk failed; continuing with next chunk"
                    );
                    summary.errors += chunk.len() as u64;
                    summary.failed_chunks.push(FailedChunk {
                        index,
                        rows: chunk.len() as u64,
                        error: e.to_string(),
                    });
                }
            }

            tracker.within(
                &format!("Loading chunk {}/{}", index + 1, total_chunks),
                (index + 1) as u64,
                total_chunks as u64,
            );
        }

        Ok(summary)
    }
}
