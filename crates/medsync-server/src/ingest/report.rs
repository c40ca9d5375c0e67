//! Sectioned CSV reports attached to an import result
//!
//! A report is a sequence of CSV sections separated by a blank line. Each
//! section opens with a `# title` record followed by its own header row, so
//! one file can carry tables of different shapes.

use medsync_common::ImportResult;
use tracing::warn;

use super::loader::LoadSummary;
use super::reference::{IssuesByTable, ReferenceFindings};
use super::transform::TransformStats;

/// What happened to orphan retirement in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retirement {
    Done(u64),
    /// Not attempted because a load chunk or a reference lookup failed
    Skipped,
    Failed(String),
}

/// Everything the reports are compiled from
#[derive(Debug, Clone, Copy)]
pub struct RunStats<'a> {
    pub result: &'a ImportResult,
    pub rejected: u64,
    pub findings: &'a ReferenceFindings,
    pub transform: &'a TransformStats,
    pub load: &'a LoadSummary,
    pub retirement: &'a Retirement,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reports {
    pub error_report: Option<String>,
    pub info_report: Option<String>,
    pub error_message: Option<String>,
}

pub fn compile(stats: &RunStats<'_>) -> Reports {
    Reports {
        error_report: join_sections(error_sections(stats)),
        info_report: info_sections(stats).and_then(|mut sections| {
            sections.extend(summary_section(stats.result));
            join_sections(sections)
        }),
        error_message: error_message(stats),
    }
}

fn error_sections(stats: &RunStats<'_>) -> Vec<String> {
    let mut sections = issue_sections(&stats.findings.blocking, "Invalid codes in", "rows rejected");

    let unverified: Vec<Vec<String>> = stats
        .findings
        .unverified
        .iter()
        .flat_map(|(table, codes)| {
            codes.iter().map(move |(code, issue)| {
                vec![
                    table.to_string(),
                    code.clone(),
                    issue.example_patient.clone(),
                    issue.affected_rows.to_string(),
                ]
            })
        })
        .collect();
    sections.extend(section(
        "Unverified codes (reference lookup failed)",
        &["table", "code", "example_patient", "affected_rows"],
        unverified,
    ));

    let chunks = stats
        .load
        .failed_chunks
        .iter()
        .map(|c| vec![c.index.to_string(), c.rows.to_string(), c.error.clone()])
        .collect();
    sections.extend(section("Failed load chunks", &["chunk", "rows", "error"], chunks));

    sections
}

/// Informational sections, `None` when there is nothing to say
fn info_sections(stats: &RunStats<'_>) -> Option<Vec<String>> {
    let mut sections = issue_sections(&stats.findings.advisory, "Codes not found in", "rows kept");

    let counted = |title: &str, counts: &std::collections::BTreeMap<&'static str, u64>| {
        section(
            title,
            &["field", "rows"],
            counts
                .iter()
                .map(|(field, n)| vec![field.to_string(), n.to_string()])
                .collect(),
        )
    };
    sections.extend(counted("Invalid dates (value cleared)", &stats.transform.invalid_dates));
    sections.extend(counted("Invalid codes (value cleared)", &stats.transform.invalid_codes));

    let notice = match stats.retirement {
        Retirement::Done(_) => None,
        Retirement::Skipped => Some(
            "Orphan retirement skipped because a load chunk or a reference lookup failed"
                .to_string(),
        ),
        Retirement::Failed(e) => Some(format!("Orphan retirement failed: {e}")),
    };
    sections.extend(section("Notices", &["notice"], notice.into_iter().map(|n| vec![n]).collect()));

    (!sections.is_empty()).then_some(sections)
}

fn summary_section(result: &ImportResult) -> Option<String> {
    let metrics = [
        ("total_processed", result.total_processed),
        ("success", result.success),
        ("errors", result.errors),
        ("duplicates", result.duplicates),
        ("skipped", result.skipped),
        ("inserted", result.inserted),
        ("updated", result.updated),
        ("complemented", result.complemented),
        ("retired", result.retired),
    ];
    section(
        "SUMMARY",
        &["metric", "value"],
        metrics
            .iter()
            .map(|(m, v)| vec![m.to_string(), v.to_string()])
            .collect(),
    )
}

fn issue_sections(issues: &IssuesByTable, prefix: &str, effect: &str) -> Vec<String> {
    issues
        .iter()
        .filter_map(|(table, codes)| {
            section(
                &format!("{prefix} {table} ({effect})"),
                &["code", "example_patient", "affected_rows"],
                codes
                    .iter()
                    .map(|(code, issue)| {
                        vec![
                            code.clone(),
                            issue.example_patient.clone(),
                            issue.affected_rows.to_string(),
                        ]
                    })
                    .collect(),
            )
        })
        .collect()
}

/// One CSV section, or `None` when it has no rows
fn section(title: &str, header: &[&str], rows: Vec<Vec<String>>) -> Option<String> {
    if rows.is_empty() {
        return None;
    }

    let write = || -> Result<String, Box<dyn std::error::Error>> {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(Vec::new());
        writer.write_record([format!("# {title}")])?;
        writer.write_record(header)?;
        for row in &rows {
            writer.write_record(row)?;
        }
        let bytes = writer.into_inner().map_err(|e| e.into_error())?;
        Ok(String::from_utf8(bytes)?)
    };

    match write() {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(section = title, error = %e, "Failed to render report section");
            None
        }
    }
}

fn join_sections(sections: Vec<String>) -> Option<String> {
    (!sections.is_empty()).then(|| sections.join("\n"))
}

fn error_message(stats: &RunStats<'_>) -> Option<String> {
    let result = stats.result;
    if result.errors == 0 {
        return None;
    }
    Some(format!(
        "{} of {} rows could not be imported ({} rejected by reference validation, {} in failed load chunks)",
        result.errors, result.total_processed, stats.rejected, stats.load.errors
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ingest::loader::FailedChunk;
    use crate::ingest::reference::CodeIssue;
    use crate::ingest::sources::ReferenceTable;

    fn empty_stats<'a>(
        result: &'a ImportResult,
        findings: &'a ReferenceFindings,
        transform: &'a TransformStats,
        load: &'a LoadSummary,
        retirement: &'a Retirement,
    ) -> RunStats<'a> {
        RunStats {
            result,
            rejected: 0,
            findings,
            transform,
            load,
            retirement,
        }
    }

    #[test]
    fn test_clean_run_has_no_reports() {
        let result = ImportResult {
            success: 2,
            total_processed: 2,
            ..Default::default()
        };
        let reports = compile(&empty_stats(
            &result,
            &ReferenceFindings::default(),
            &TransformStats::default(),
            &LoadSummary::default(),
            &Retirement::Done(0),
        ));
        assert_eq!(reports, Reports::default());
    }

    #[test]
    fn test_error_report_sections() {
        let result = ImportResult {
            success: 1,
            errors: 3,
            total_processed: 4,
            ..Default::default()
        };
        let mut findings = ReferenceFindings::default();
        findings.blocking.entry(ReferenceTable::Procedure).or_default().insert(
            "111111".to_string(),
            CodeIssue {
                example_patient: "1032".to_string(),
                affected_rows: 2,
            },
        );
        let load = LoadSummary {
            errors: 1,
            failed_chunks: vec![FailedChunk {
                index: 0,
                rows: 1,
                error: "timeout, retry later".to_string(),
            }],
            ..Default::default()
        };
        let transform = TransformStats::default();
        let mut stats = empty_stats(
            &result,
            &findings,
            &transform,
            &load,
            &Retirement::Skipped,
        );
        stats.rejected = 2;

        let reports = compile(&stats);
        let errors = reports.error_report.unwrap();
        assert!(errors.starts_with("# Invalid codes in ref_cups (rows rejected)\n"));
        assert!(errors.contains("code,example_patient,affected_rows\n111111,1032,2\n"));
        assert!(errors.contains("\n\n# Failed load chunks\nchunk,rows,error\n0,1,\"timeout, retry later\"\n"));

        let info = reports.info_report.unwrap();
        assert!(info.contains("Orphan retirement skipped"));
        assert!(info.contains("# SUMMARY\nmetric,value\ntotal_processed,4\n"));

        assert_eq!(
            reports.error_message.as_deref(),
            Some("3 of 4 rows could not be imported (2 rejected by reference validation, 1 in failed load chunks)")
        );
    }

    #[test]
    fn test_invalid_dates_land_in_info_report() {
        let result = ImportResult::default();
        let mut transform = TransformStats::default();
        transform.invalid_dates.insert("birth_date", 3);
        let reports = compile(&empty_stats(
            &result,
            &ReferenceFindings::default(),
            &transform,
            &LoadSummary::default(),
            &Retirement::Done(0),
        ));
        assert!(reports.error_report.is_none());
        assert!(reports.info_report.unwrap().contains("birth_date,3\n"));
    }
}
