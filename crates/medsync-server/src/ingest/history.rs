//! Import audit records
//!
//! One row per finished run, successful or not. Records are appended and
//! never updated.

use chrono::{DateTime, Utc};
use medsync_common::ImportResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Who started a run and on what input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub triggered_by: String,
    pub file_name: Option<String>,
    pub file_sha256: Option<String>,
}

impl RunContext {
    pub fn new(triggered_by: impl Into<String>) -> Self {
        Self {
            triggered_by: triggered_by.into(),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, name: impl Into<String>, sha256: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self.file_sha256 = Some(sha256.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportHistoryRecord {
    pub id: Uuid,
    pub source: String,
    pub triggered_by: String,
    pub file_name: Option<String>,
    pub file_sha256: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: RunStatus,
    pub success: u64,
    pub errors: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub total_processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub complemented: u64,
    pub retired: u64,
    /// Error message and reports of the run
    pub detail: serde_json::Value,
}

impl ImportHistoryRecord {
    pub fn completed(
        source: &str,
        ctx: &RunContext,
        started_at: DateTime<Utc>,
        result: &ImportResult,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.to_string(),
            triggered_by: ctx.triggered_by.clone(),
            file_name: ctx.file_name.clone(),
            file_sha256: ctx.file_sha256.clone(),
            started_at,
            duration_ms: result.duration_ms,
            status: RunStatus::Completed,
            success: result.success,
            errors: result.errors,
            duplicates: result.duplicates,
            skipped: result.skipped,
            total_processed: result.total_processed,
            inserted: result.inserted,
            updated: result.updated,
            complemented: result.complemented,
            retired: result.retired,
            detail: serde_json::json!({
                "errorMessage": result.error_message,
                "errorReport": result.error_report,
                "infoReport": result.info_report,
            }),
        }
    }

    pub fn failed(
        source: &str,
        ctx: &RunContext,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        error: &str,
        code: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.to_string(),
            triggered_by: ctx.triggered_by.clone(),
            file_name: ctx.file_name.clone(),
            file_sha256: ctx.file_sha256.clone(),
            started_at,
            duration_ms,
            status: RunStatus::Failed,
            success: 0,
            errors: 0,
            duplicates: 0,
            skipped: 0,
            total_processed: 0,
            inserted: 0,
            updated: 0,
            complemented: 0,
            retired: 0,
            detail: serde_json::json!({ "error": error, "code": code }),
        }
    }
}
