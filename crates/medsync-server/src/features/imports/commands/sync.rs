//! Cloud-triggered import streamed back as NDJSON progress frames

use std::sync::Arc;

use chrono::Utc;
use medsync_common::StreamFrame;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::features::imports::ImportState;
use crate::ingest::sources::{SourceMode, SourceSpec};
use crate::ingest::{ChannelProgress, ImportError, ImportHistoryRecord, RunContext};

/// Frames buffered between the run and a slow reader
pub const FRAME_BUFFER: usize = 64;

/// Start a sync of one cloud source
#[derive(Debug, Clone, Serialize)]
pub struct SyncImportCommand {
    pub source: String,
    pub triggered_by: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncImportError {
    #[error(transparent)]
    Import(#[from] ImportError),
}

impl From<SyncImportError> for AppError {
    fn from(err: SyncImportError) -> Self {
        match err {
            SyncImportError::Import(e) => AppError::Import(e),
        }
    }
}

impl SyncImportCommand {
    /// Resolve the source and its endpoint; failures here are plain HTTP errors
    pub fn validate<'a>(
        &self,
        state: &'a ImportState,
    ) -> Result<(&'a SourceSpec, String), SyncImportError> {
        let spec = state.catalog.get(&self.source)?;
        spec.ensure_runnable(SourceMode::Cloud)?;
        let url = spec
            .cloud_url
            .clone()
            .ok_or_else(|| ImportError::NoCloudUrl(spec.id.to_string()))?;
        Ok((spec, url))
    }
}

/// Spawn the run and hand back its frame stream
///
/// The stream always ends with exactly one result or error frame. Dropping
/// it cancels the run at the next chunk boundary.
#[tracing::instrument(skip(state, command), fields(source = %command.source))]
pub async fn handle(
    state: &ImportState,
    command: SyncImportCommand,
) -> Result<ReceiverStream<StreamFrame>, SyncImportError> {
    let (spec, url) = command.validate(state)?;
    let spec = spec.clone();

    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    let cancel = state.shutdown.child_token();

    {
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tx.closed() => {
                    tracing::info!("Progress reader went away; cancelling sync");
                    cancel.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        });
    }

    let state = state.clone();
    let ctx = RunContext {
        triggered_by: command.triggered_by,
        file_name: Some(url.clone()),
        file_sha256: None,
    };
    tokio::spawn(async move {
        let _guard = state.locks.acquire(spec.id).await;
        let frame = match run(&state, &spec, &url, &ctx, tx.clone(), &cancel).await {
            Ok(result) => StreamFrame::result(result),
            Err(e) => StreamFrame::error(e.to_string()),
        };
        if tx.send(frame).await.is_err() {
            tracing::debug!(source = spec.id, "Final frame not delivered; reader closed");
        }
        // Stop the disconnect watcher
        cancel.cancel();
    });

    Ok(ReceiverStream::new(rx))
}

async fn run(
    state: &ImportState,
    spec: &SourceSpec,
    url: &str,
    ctx: &RunContext,
    tx: mpsc::Sender<StreamFrame>,
    cancel: &CancellationToken,
) -> Result<medsync_common::ImportResult, ImportError> {
    let sink = Arc::new(ChannelProgress::new(tx));

    tracing::info!(source = spec.id, url, "Fetching cloud source");
    let started_at = Utc::now();
    let response = match state
        .http
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
    {
        Ok(response) => response,
        Err(e) => {
            let error = ImportError::Read(e.to_string());
            let elapsed = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
            let record = ImportHistoryRecord::failed(
                spec.id,
                ctx,
                started_at,
                elapsed,
                &error.to_string(),
                error.code(),
            );
            if let Err(e) = state.pipeline.history().append(&record).await {
                tracing::error!(source = spec.id, error = %e, "Failed to write import history");
            }
            return Err(error);
        },
    };

    let content_length = response.content_length();
    let body = Box::pin(response.bytes_stream());
    state
        .pipeline
        .import_stream(spec, body, content_length, ctx, sink, cancel)
        .await
}
