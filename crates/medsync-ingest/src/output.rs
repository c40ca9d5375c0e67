//! Terminal rendering of import results

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use medsync_common::ImportResult;

use crate::client::{HistoryEntry, SourceSummary};

pub const ERROR_REPORT_FILE: &str = "error_report.csv";
pub const INFO_REPORT_FILE: &str = "info_report.csv";

/// Multi-line summary of one run
pub fn summarize(source: &str, result: &ImportResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Import of '{source}' finished in {} ms", result.duration_ms);
    let _ = writeln!(out, "  processed   {:>8}", result.total_processed);
    let _ = writeln!(
        out,
        "  imported    {:>8}  (inserted {}, updated {}, complemented {})",
        result.success, result.inserted, result.updated, result.complemented
    );
    let _ = writeln!(out, "  errors      {:>8}", result.errors);
    let _ = writeln!(out, "  duplicates  {:>8}", result.duplicates);
    let _ = writeln!(out, "  skipped     {:>8}", result.skipped);
    if result.retired > 0 {
        let _ = writeln!(out, "  retired     {:>8}", result.retired);
    }
    if let Some(message) = &result.error_message {
        let _ = writeln!(out, "{message}");
    }
    out
}

/// Write the run's CSV reports into `dir`, returning the files written
pub async fn write_reports(dir: &Path, result: &ImportResult) -> std::io::Result<Vec<PathBuf>> {
    let reports = [
        (ERROR_REPORT_FILE, result.error_report.as_deref()),
        (INFO_REPORT_FILE, result.info_report.as_deref()),
    ];

    let mut written = Vec::new();
    for (name, content) in reports {
        let Some(content) = content else { continue };
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(name);
        tokio::fs::write(&path, content).await?;
        written.push(path);
    }
    Ok(written)
}

pub fn sources_table(sources: &[SourceSummary]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16} {:<6} {:<12} {:<9} {:<12} LABEL",
        "ID", "MODE", "FORMAT", "STATUS", "TARGET"
    );
    for source in sources {
        let _ = writeln!(
            out,
            "{:<16} {:<6} {:<12} {:<9} {:<12} {}",
            source.id, source.mode, source.format, source.status, source.target_table, source.label
        );
    }
    out
}

pub fn history_table(entries: &[HistoryEntry]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<25} {:<16} {:<10} {:>8} {:>8} {:>8}  FILE",
        "STARTED", "SOURCE", "STATUS", "TOTAL", "OK", "ERRORS"
    );
    for entry in entries {
        let _ = writeln!(
            out,
            "{:<25} {:<16} {:<10} {:>8} {:>8} {:>8}  {}",
            entry.started_at,
            entry.source,
            entry.status,
            entry.total_processed,
            entry.success,
            entry.errors,
            entry.file_name.as_deref().unwrap_or("-")
        );
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_mentions_error_message() {
        let result = ImportResult {
            success: 8,
            errors: 2,
            total_processed: 10,
            error_message: Some("2 of 10 rows could not be imported".to_string()),
            ..Default::default()
        };
        let text = summarize("procedures", &result);
        assert!(text.contains("'procedures'"));
        assert!(text.contains("2 of 10 rows"));
        assert!(!text.contains("retired"));
    }

    #[tokio::test]
    async fn test_only_present_reports_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let result = ImportResult {
            error_report: Some("# ref_cups\ncode,patient,rows\n".to_string()),
            ..Default::default()
        };

        let written = write_reports(dir.path(), &result).await.unwrap();
        assert_eq!(written, vec![dir.path().join(ERROR_REPORT_FILE)]);
        let content = std::fs::read_to_string(&written[0]).unwrap();
        assert!(content.starts_with("# ref_cups"));
    }
}
