//! Import run orchestration
//!
//! One run reads a file or a streamed body for one source, then walks the
//! fixed phase sequence: parse, normalize, deduplicate, validate references,
//! load in chunks, retire orphans, build reports. Structural failures abort
//! the run and are recorded as failed; everything row- or chunk-level is
//! counted into the `ImportResult`.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use medsync_common::ImportResult;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::dedup::Deduplicator;
use super::document::RawDocument;
use super::error::{ImportError, Result};
use super::header::locate;
use super::history::{ImportHistoryRecord, RunContext};
use super::loader::BatchLoader;
use super::priority::PriorityTable;
use super::progress::{ProgressSink, ProgressTracker, RunPhase};
use super::reconcile;
use super::reference::{ReferenceCache, ReferenceValidator, DEFAULT_REFERENCE_CHUNK_SIZE};
use super::report::{self, Retirement, RunStats};
use super::sniff::{self, FileFormat};
use super::sources::{InputFormat, SourceSpec};
use super::store::{HistoryStore, RecordStore, ReferenceStore};
use super::streaming::DelimitedCollector;
use super::transform::{RowOutcome, RowTransformer, TransformStats};
use super::{html, workbook};

/// Default bound on one streamed read
pub const DEFAULT_READ_CHUNK_BYTES: usize = 64 * 1024;

/// Rows that survived transformation, before validation
#[derive(Debug, Default)]
pub struct Collected {
    pub dedup: Deduplicator,
    pub skipped: u64,
    pub transform: TransformStats,
}

impl Collected {
    /// Non-blank data rows read
    pub fn total_processed(&self) -> u64 {
        self.dedup.seen() + self.skipped
    }
}

/// Backends and tunables shared by every run
#[derive(Clone)]
pub struct ImportPipeline {
    records: Arc<dyn RecordStore>,
    references: Arc<dyn ReferenceStore>,
    history: Arc<dyn HistoryStore>,
    priorities: PriorityTable,
    reference_chunk_size: usize,
    read_chunk_bytes: usize,
}

impl ImportPipeline {
    pub fn new(
        records: Arc<dyn RecordStore>,
        references: Arc<dyn ReferenceStore>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            records,
            references,
            history,
            priorities: PriorityTable::default(),
            reference_chunk_size: DEFAULT_REFERENCE_CHUNK_SIZE,
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
        }
    }

    pub fn with_priorities(mut self, priorities: PriorityTable) -> Self {
        self.priorities = priorities;
        self
    }

    pub fn with_reference_chunk_size(mut self, size: usize) -> Self {
        self.reference_chunk_size = size.max(1);
        self
    }

    pub fn with_read_chunk_bytes(mut self, size: usize) -> Self {
        self.read_chunk_bytes = size.max(1);
        self
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// Import an uploaded file held in memory
    pub async fn import_file(
        &self,
        spec: &SourceSpec,
        bytes: &[u8],
        ctx: &RunContext,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<ImportResult> {
        let span = info_span!("import", source = spec.id, mode = "file", bytes = bytes.len());
        async {
            let mut run = RunState::start(spec, ctx, sink);
            let outcome = self.run_file(spec, bytes, &mut run, cancel).await;
            self.conclude(spec, ctx, &mut run, outcome).await
        }
        .instrument(span)
        .await
    }

    /// Import a streamed body, consumed in bounded chunks
    pub async fn import_stream<S, E>(
        &self,
        spec: &SourceSpec,
        body: S,
        content_length: Option<u64>,
        ctx: &RunContext,
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<ImportResult>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin,
        E: std::fmt::Display,
    {
        let span = info_span!("import", source = spec.id, mode = "stream", content_length = ?content_length);
        async {
            let mut run = RunState::start(spec, ctx, sink);
            let outcome = self
                .run_stream(spec, body, content_length, &mut run, cancel)
                .await;
            self.conclude(spec, ctx, &mut run, outcome).await
        }
        .instrument(span)
        .await
    }

    async fn run_file(
        &self,
        spec: &SourceSpec,
        bytes: &[u8],
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<ImportResult> {
        run.tracker.enter(RunPhase::Reading)?;
        let collected = match spec.format {
            InputFormat::Spreadsheet => collect_spreadsheet(spec, bytes, &mut run.tracker)?,
            InputFormat::Delimited => {
                let chunks = bytes
                    .chunks(self.read_chunk_bytes)
                    .map(|c| Ok::<_, std::io::Error>(Bytes::copy_from_slice(c)));
                let total = bytes.len() as u64;
                self.collect_delimited(spec, futures::stream::iter(chunks), Some(total), run, cancel)
                    .await?
            }
        };
        self.finish_run(spec, collected, run, cancel).await
    }

    async fn run_stream<S, E>(
        &self,
        spec: &SourceSpec,
        body: S,
        content_length: Option<u64>,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<ImportResult>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        run.tracker.enter(RunPhase::Reading)?;
        let collected = self
            .collect_delimited(spec, body, content_length, run, cancel)
            .await?;
        self.finish_run(spec, collected, run, cancel).await
    }

    /// Record the run in history and log its outcome
    async fn conclude(
        &self,
        spec: &SourceSpec,
        ctx: &RunContext,
        run: &mut RunState,
        outcome: Result<ImportResult>,
    ) -> Result<ImportResult> {
        match outcome {
            Ok(result) => {
                let record = ImportHistoryRecord::completed(spec.id, ctx, run.started_at, &result);
                self.append_history(&record).await;
                info!(
                    source = spec.id,
                    success = result.success,
                    errors = result.errors,
                    duplicates = result.duplicates,
                    skipped = result.skipped,
                    total = result.total_processed,
                    duration_ms = result.duration_ms,
                    "Import completed"
                );
                Ok(result)
            }
            Err(e) => {
                run.tracker.fail();
                let record = ImportHistoryRecord::failed(
                    spec.id,
                    ctx,
                    run.started_at,
                    run.elapsed_ms(),
                    &e.to_string(),
                    e.code(),
                );
                self.append_history(&record).await;
                error!(source = spec.id, error = %e, "Import failed");
                Err(e)
            }
        }
    }

    async fn append_history(&self, record: &ImportHistoryRecord) {
        if let Err(e) = self.history.append(record).await {
            error!(source = %record.source, error = %e, "Failed to write import history");
        }
    }

    async fn collect_delimited<S, E>(
        &self,
        spec: &SourceSpec,
        mut body: S,
        content_length: Option<u64>,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<Collected>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let mut collector = DelimitedCollector::new(spec);

        while let Some(next) = body.next().await {
            if cancel.is_cancelled() {
                return Err(ImportError::Cancelled);
            }
            let bytes = next.map_err(|e| ImportError::Read(e.to_string()))?;
            for piece in bytes.chunks(self.read_chunk_bytes) {
                collector.push(piece)?;
            }

            if collector.header_found() && run.tracker.phase() == RunPhase::Reading {
                run.tracker.enter(RunPhase::Parsing)?;
                run.tracker.enter(RunPhase::Transforming)?;
            }
            if let (Some(total), RunPhase::Transforming) = (content_length, run.tracker.phase()) {
                run.tracker.within("Reading rows", collector.bytes_read(), total);
            }
        }

        let collected = collector.finish()?;
        if run.tracker.phase() == RunPhase::Reading {
            run.tracker.enter(RunPhase::Parsing)?;
            run.tracker.enter(RunPhase::Transforming)?;
        }
        Ok(collected)
    }

    /// Validate, load, reconcile and report on collected rows
    async fn finish_run(
        &self,
        spec: &SourceSpec,
        collected: Collected,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<ImportResult> {
        let total_processed = collected.total_processed();
        let duplicates = collected.dedup.duplicates();
        let skipped = collected.skipped;
        let transform = collected.transform;

        run.tracker.enter(RunPhase::Validating)?;
        let mut validator = ReferenceValidator::new(
            self.references.as_ref(),
            ReferenceCache::new(),
            self.reference_chunk_size,
        );
        let validation = validator.check_rows(spec, collected.dedup.into_rows()).await;

        run.tracker.enter(RunPhase::Loading)?;
        let load = BatchLoader::new(self.records.as_ref(), &self.priorities)
            .upsert(spec, &validation.accepted, run.started_at, &mut run.tracker, cancel)
            .await?;

        run.tracker.enter(RunPhase::Reconciling)?;
        // A row dropped for a chunk-level cause keeps its old last_seen_at,
        // so retiring now would flag it as gone from the feed.
        let unverified = validation.findings.unverified_codes();
        let retirement = if load.has_failures() || unverified > 0 {
            warn!(
                source = spec.id,
                failed_chunks = load.failed_chunks.len(),
                unverified_codes = unverified,
                "Skipping orphan retirement after chunk-level failures"
            );
            Retirement::Skipped
        } else {
            match reconcile::retire(self.records.as_ref(), spec, run.started_at).await {
                Ok(n) => Retirement::Done(n),
                Err(e) => {
                    error!(source = spec.id, error = %e, "Orphan retirement failed");
                    Retirement::Failed(e.to_string())
                }
            }
        };

        run.tracker.enter(RunPhase::Reporting)?;
        let mut result = ImportResult {
            success: load.counts.total(),
            errors: validation.rejected + load.errors,
            duplicates,
            skipped,
            total_processed,
            duration_ms: 0,
            inserted: load.counts.inserted,
            updated: load.counts.updated,
            complemented: load.counts.complemented,
            retired: match retirement {
                Retirement::Done(n) => n,
                _ => 0,
            },
            ..Default::default()
        };

        let reports = report::compile(&RunStats {
            result: &result,
            rejected: validation.rejected,
            findings: &validation.findings,
            transform: &transform,
            load: &load,
            retirement: &retirement,
        });
        result.error_report = reports.error_report;
        result.info_report = reports.info_report;
        result.error_message = reports.error_message;
        result.duration_ms = run.elapsed_ms();

        debug_assert!(result.is_balanced(), "unbalanced import counters: {result:?}");
        run.tracker.enter(RunPhase::Done)?;
        Ok(result)
    }
}

/// Mutable state of one run
pub struct RunState {
    tracker: ProgressTracker,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl RunState {
    fn start(spec: &SourceSpec, ctx: &RunContext, sink: Arc<dyn ProgressSink>) -> Self {
        info!(source = spec.id, triggered_by = %ctx.triggered_by, "Import started");
        Self {
            tracker: ProgressTracker::new(sink),
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.clock.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Read a spreadsheet and transform its data rows
fn collect_spreadsheet(
    spec: &SourceSpec,
    bytes: &[u8],
    tracker: &mut ProgressTracker,
) -> Result<Collected> {
    if bytes.is_empty() {
        return Err(ImportError::EmptyFile);
    }
    let doc: RawDocument = match sniff::detect(bytes) {
        FileFormat::Html => html::parse(bytes)?,
        FileFormat::BinaryWorkbook => workbook::parse(bytes)?,
    };

    tracker.enter(RunPhase::Parsing)?;
    let found = locate(&doc, spec)?;

    tracker.enter(RunPhase::Transforming)?;
    let mut transformer = RowTransformer::new(spec, found.columns);
    let mut collected = Collected::default();
    let data_rows = doc.tables[found.table].rows.iter().skip(found.header_row + 1);
    for row in data_rows {
        match transformer.transform(row) {
            RowOutcome::Row(row) => {
                collected.dedup.insert(row);
            }
            RowOutcome::Skip => collected.skipped += 1,
            RowOutcome::Blank => {}
        }
    }
    collected.transform = transformer.into_stats();
    Ok(collected)
}
