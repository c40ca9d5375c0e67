//! Wire types shared by the server and its clients
//!
//! `ImportResult` is the stable contract every presentation layer consumes.
//! `StreamFrame` is one line of the NDJSON progress protocol used by
//! cloud-triggered imports.

use serde::{Deserialize, Serialize};

/// Outcome of one import run
///
/// Counters satisfy `duplicates + skipped + success + errors == total_processed`.
/// Duplicates and rows skipped for a missing natural key are accounted apart
/// from `errors`, so `success + errors <= total_processed` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    /// Rows that reached the store (inserted + updated + complemented)
    pub success: u64,
    /// Rows rejected by blocking validation or lost to a failed chunk
    pub errors: u64,
    /// Rows superseded by a later row with the same natural key
    pub duplicates: u64,
    /// Rows missing at least one natural-key field
    pub skipped: u64,
    /// Non-empty data rows read from the file
    pub total_processed: u64,
    /// Wall-clock duration of the run in milliseconds
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    #[serde(default)]
    pub inserted: u64,
    #[serde(default)]
    pub updated: u64,
    #[serde(default)]
    pub complemented: u64,
    /// Rows of this source flagged for revalidation because they left the feed
    #[serde(default)]
    pub retired: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ImportResult {
    /// True when every processed row is accounted for exactly once
    pub fn is_balanced(&self) -> bool {
        self.duplicates + self.skipped + self.success + self.errors == self.total_processed
    }
}

/// A progress checkpoint emitted while an import runs
///
/// `pct` is advisory UI state and never drives control flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pct: Option<u8>,
}

impl ProgressEvent {
    pub fn new(status: impl Into<String>, pct: Option<u8>) -> Self {
        Self {
            status: status.into(),
            pct: pct.map(|p| p.min(100)),
        }
    }
}

/// Discriminator carried by error frames: `{"phase":"error", ...}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramePhase {
    Error,
}

/// One line of the NDJSON progress stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamFrame {
    /// `{"phase":"error","error":"..."}` aborts the call
    Error { phase: FramePhase, error: String },
    /// `{"result":{...}}` terminal success
    Result { result: ImportResult },
    /// `{"status":"...","pct":42}`
    Progress(ProgressEvent),
}

impl StreamFrame {
    pub fn progress(status: impl Into<String>, pct: Option<u8>) -> Self {
        StreamFrame::Progress(ProgressEvent::new(status, pct))
    }

    pub fn result(result: ImportResult) -> Self {
        StreamFrame::Result { result }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamFrame::Error {
            phase: FramePhase::Error,
            error: message.into(),
        }
    }

    /// Serialize as a single `\n`-terminated NDJSON line
    pub fn to_line(&self) -> crate::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parse one line; anything that is not a recognizable frame yields `None`
    pub fn parse_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_import_result_uses_camel_case_contract() {
        let result = ImportResult {
            success: 3,
            total_processed: 5,
            duplicates: 1,
            skipped: 1,
            duration_ms: 42,
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["totalProcessed"], 5);
        assert_eq!(json["duration"], 42);
        assert!(json.get("errorReport").is_none());
        assert!(result.is_balanced());
    }

    #[test]
    fn test_frames_serialize_to_protocol_shapes() {
        let progress = StreamFrame::progress("Cargando", Some(60)).to_line().unwrap();
        assert_eq!(progress, "{\"status\":\"Cargando\",\"pct\":60}\n");

        let error = StreamFrame::error("sin tabla").to_line().unwrap();
        assert_eq!(error, "{\"phase\":\"error\",\"error\":\"sin tabla\"}\n");

        let result = StreamFrame::result(ImportResult::default()).to_line().unwrap();
        assert!(result.starts_with("{\"result\":{"));
    }

    #[test]
    fn test_parse_line_recognizes_each_frame() {
        assert_eq!(
            StreamFrame::parse_line("{\"status\":\"Leyendo\",\"pct\":5}"),
            Some(StreamFrame::progress("Leyendo", Some(5)))
        );
        assert_eq!(
            StreamFrame::parse_line("{\"phase\":\"error\",\"error\":\"boom\"}"),
            Some(StreamFrame::error("boom"))
        );
        let frame = StreamFrame::parse_line("{\"result\":{\"success\":1,\"errors\":0,\"duplicates\":0,\"skipped\":0,\"totalProcessed\":1,\"duration\":7}}");
        assert!(matches!(frame, Some(StreamFrame::Result { result }) if result.success == 1));
    }

    #[test]
    fn test_parse_line_ignores_framing_artifacts() {
        assert_eq!(StreamFrame::parse_line(""), None);
        assert_eq!(StreamFrame::parse_line("   "), None);
        assert_eq!(StreamFrame::parse_line("{\"status\":"), None);
        assert_eq!(StreamFrame::parse_line("<html>"), None);
    }

    #[test]
    fn test_progress_pct_is_clamped() {
        assert_eq!(ProgressEvent::new("x", Some(140)).pct, Some(100));
    }
}
