use std::sync::Arc;

use bytes::Bytes;
use medsync_common::ImportResult;
use serde::Serialize;

use crate::error::AppError;
use crate::features::imports::ImportState;
use crate::ingest::sources::SourceMode;
use crate::ingest::{ImportError, RunContext, TracingProgress};

/// Longest accepted original file name
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Import one uploaded spreadsheet into a file-mode source
#[derive(Debug, Clone, Serialize)]
pub struct UploadImportCommand {
    pub source: String,
    pub file_name: String,
    pub file_sha256: String,
    pub triggered_by: String,
    #[serde(skip)]
    pub content: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadImportError {
    #[error("Multipart field 'file' is required")]
    FileRequired,
    #[error("File name must not exceed {MAX_FILE_NAME_LEN} characters")]
    FileNameLength,
    #[error("Upload exceeds the limit of {0} bytes")]
    TooLarge(usize),
    #[error("Failed to read upload: {0}")]
    Multipart(String),
    #[error(transparent)]
    Import(#[from] ImportError),
}

impl From<UploadImportError> for AppError {
    fn from(err: UploadImportError) -> Self {
        match err {
            UploadImportError::Import(e) => AppError::Import(e),
            UploadImportError::FileRequired | UploadImportError::FileNameLength => {
                AppError::Validation(err.to_string())
            },
            UploadImportError::TooLarge(_) | UploadImportError::Multipart(_) => {
                AppError::BadRequest(err.to_string())
            },
        }
    }
}

impl UploadImportCommand {
    /// Empty content is left to the pipeline so the run is recorded as failed
    pub fn validate(&self) -> Result<(), UploadImportError> {
        if self.file_name.chars().count() > MAX_FILE_NAME_LEN {
            return Err(UploadImportError::FileNameLength);
        }
        Ok(())
    }
}

#[tracing::instrument(
    skip(state, command),
    fields(source = %command.source, file = %command.file_name, bytes = command.content.len())
)]
pub async fn handle(
    state: &ImportState,
    command: UploadImportCommand,
) -> Result<ImportResult, UploadImportError> {
    command.validate()?;

    let spec = state.catalog.get(&command.source)?;
    spec.ensure_runnable(SourceMode::File)?;

    let ctx = RunContext::new(command.triggered_by)
        .with_file(command.file_name, command.file_sha256);

    let _guard = state.locks.acquire(spec.id).await;
    let result = state
        .pipeline
        .import_file(
            spec,
            &command.content,
            &ctx,
            Arc::new(TracingProgress::new(spec.id)),
            &state.shutdown.child_token(),
        )
        .await?;

    Ok(result)
}
