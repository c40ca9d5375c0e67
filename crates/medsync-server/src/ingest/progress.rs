//! Run phases and progress reporting
//!
//! A run walks a fixed sequence of phases. Each phase has a checkpoint
//! percentage that is pushed to a `ProgressSink`; the percentage is for
//! display only and never drives control flow.

use std::sync::Arc;

use medsync_common::StreamFrame;
use tokio::sync::mpsc;

use super::error::{ImportError, Result};

/// Receives progress checkpoints
pub trait ProgressSink: Send + Sync {
    fn report(&self, status: &str, pct: Option<u8>);
}

impl<F> ProgressSink for F
where
    F: Fn(&str, Option<u8>) + Send + Sync,
{
    fn report(&self, status: &str, pct: Option<u8>) {
        self(status, pct)
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _status: &str, _pct: Option<u8>) {}
}

/// Logs checkpoints at debug level
#[derive(Debug, Clone)]
pub struct TracingProgress {
    source: String,
}

impl TracingProgress {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl ProgressSink for TracingProgress {
    fn report(&self, status: &str, pct: Option<u8>) {
        tracing::debug!(source = %self.source, status, pct = ?pct, "Import progress");
    }
}

/// Forwards checkpoints as NDJSON progress frames
///
/// Frames are dropped when the channel is full; a slow reader sees fewer
/// checkpoints but never stalls the run.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::Sender<StreamFrame>,
}

impl ChannelProgress {
    pub fn new(tx: mpsc::Sender<StreamFrame>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgress {
    fn report(&self, status: &str, pct: Option<u8>) {
        if let Err(e) = self.tx.try_send(StreamFrame::progress(status, pct)) {
            tracing::trace!(error = %e, "Progress frame dropped");
        }
    }
}

/// Phases of one import run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunPhase {
    Idle,
    Reading,
    Parsing,
    Transforming,
    Validating,
    Loading,
    Reconciling,
    Reporting,
    Done,
    Failed,
}

impl RunPhase {
    pub fn label(self) -> &'static str {
        match self {
            RunPhase::Idle => "Waiting",
            RunPhase::Reading => "Reading file",
            RunPhase::Parsing => "Locating table",
            RunPhase::Transforming => "Normalizing rows",
            RunPhase::Validating => "Validating references",
            RunPhase::Loading => "Loading records",
            RunPhase::Reconciling => "Reconciling removed records",
            RunPhase::Reporting => "Building report",
            RunPhase::Done => "Done",
            RunPhase::Failed => "Failed",
        }
    }

    /// Percentage reported on entering the phase
    pub fn checkpoint(self) -> Option<u8> {
        match self {
            RunPhase::Idle => Some(0),
            RunPhase::Reading => Some(5),
            RunPhase::Parsing => Some(15),
            RunPhase::Transforming => Some(30),
            RunPhase::Validating => Some(50),
            RunPhase::Loading => Some(60),
            RunPhase::Reconciling => Some(92),
            RunPhase::Reporting => Some(96),
            RunPhase::Done => Some(100),
            RunPhase::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }

    fn successor(self) -> Option<RunPhase> {
        match self {
            RunPhase::Idle => Some(RunPhase::Reading),
            RunPhase::Reading => Some(RunPhase::Parsing),
            RunPhase::Parsing => Some(RunPhase::Transforming),
            RunPhase::Transforming => Some(RunPhase::Validating),
            RunPhase::Validating => Some(RunPhase::Loading),
            RunPhase::Loading => Some(RunPhase::Reconciling),
            RunPhase::Reconciling => Some(RunPhase::Reporting),
            RunPhase::Reporting => Some(RunPhase::Done),
            RunPhase::Done | RunPhase::Failed => None,
        }
    }

    /// Move to `next` if the transition is legal
    pub fn advance(self, next: RunPhase) -> Result<RunPhase> {
        let legal = (next == RunPhase::Failed && !self.is_terminal()) || self.successor() == Some(next);
        if legal {
            Ok(next)
        } else {
            Err(ImportError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

/// Drives the phase machine of one run and reports to its sink
pub struct ProgressTracker {
    sink: Arc<dyn ProgressSink>,
    phase: RunPhase,
    last_pct: u8,
}

impl ProgressTracker {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            phase: RunPhase::Idle,
            last_pct: 0,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn enter(&mut self, next: RunPhase) -> Result<()> {
        self.phase = self.phase.advance(next)?;
        match next.checkpoint() {
            Some(pct) => self.emit(next.label(), pct),
            None => self.sink.report(next.label(), None),
        }
        Ok(())
    }

    /// Report progress inside the current phase, `done` out of `total`
    ///
    /// Interpolates between this phase's checkpoint and the next one's.
    pub fn within(&mut self, status: &str, done: u64, total: u64) {
        let (Some(from), Some(to)) = (
            self.phase.checkpoint(),
            self.phase.successor().and_then(RunPhase::checkpoint),
        ) else {
            return;
        };
        // Loading ends at 90 to leave room for the tail phases
        let to = if self.phase == RunPhase::Loading { 90 } else { to };
        let fraction = if total == 0 { 1.0 } else { (done as f64 / total as f64).min(1.0) };
        let pct = from as f64 + (to.saturating_sub(from)) as f64 * fraction;
        self.emit(status, pct.floor() as u8);
    }

    /// Enter `Failed`; a no-op when already terminal
    pub fn fail(&mut self) {
        if self.enter(RunPhase::Failed).is_err() {
            tracing::debug!(phase = ?self.phase, "Run already terminal");
        }
    }

    fn emit(&mut self, status: &str, pct: u8) {
        // Percent never goes backwards within a run
        let pct = pct.max(self.last_pct).min(100);
        self.last_pct = pct;
        self.sink.report(status, Some(pct));
    }
}
