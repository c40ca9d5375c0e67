//! Retirement of rows that left their owner's feed

use chrono::{DateTime, Utc};
use tracing::info;

use super::error::Result;
use super::sources::SourceSpec;
use super::store::RecordStore;

/// Flag rows of `spec`'s table owned by `spec` and not seen since `run_start`
///
/// Call only after every load chunk of the run has been merged; rows merged
/// by the run carry `last_seen_at == run_start` and are left alone.
pub async fn retire(
    store: &dyn RecordStore,
    spec: &SourceSpec,
    run_start: DateTime<Utc>,
) -> Result<u64> {
    let retired = store.retire(spec.target_table, spec.id, run_start).await?;
    info!(source = spec.id, table = spec.target_table, retired, "Orphaned rows flagged");
    Ok(retired)
}
