use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::features::imports::ImportState;
use crate::ingest::{ImportHistoryRecord, StoreError};

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 500;

/// Recent runs, newest first, optionally for one source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportHistoryQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ImportHistoryError {
    #[error("Limit must be between 1 and {MAX_HISTORY_LIMIT}")]
    InvalidLimit,
    #[error("Unknown import source: {0}")]
    UnknownSource(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ImportHistoryError> for AppError {
    fn from(err: ImportHistoryError) -> Self {
        match err {
            ImportHistoryError::InvalidLimit => AppError::Validation(err.to_string()),
            ImportHistoryError::UnknownSource(_) => AppError::NotFound(err.to_string()),
            ImportHistoryError::Store(e) => AppError::Store(e),
        }
    }
}

impl ImportHistoryQuery {
    pub fn validate(&self) -> Result<(), ImportHistoryError> {
        if let Some(limit) = self.limit {
            if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
                return Err(ImportHistoryError::InvalidLimit);
            }
        }
        Ok(())
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)
    }
}

#[tracing::instrument(skip(state))]
pub async fn handle(
    state: &ImportState,
    query: ImportHistoryQuery,
) -> Result<Vec<ImportHistoryRecord>, ImportHistoryError> {
    query.validate()?;

    let source = query.source.as_deref().filter(|s| !s.trim().is_empty());
    if let Some(source) = source {
        if state.catalog.get(source).is_err() {
            return Err(ImportHistoryError::UnknownSource(source.to_string()));
        }
    }

    let records = state.pipeline.history().recent(source, query.limit()).await?;
    tracing::debug!(count = records.len(), "Import history fetched");
    Ok(records)
}
