//! Shared fixtures for the pipeline integration tests

#![allow(dead_code)]

use std::sync::Arc;

use medsync_common::ImportResult;
use medsync_server::ingest::memory::{MemoryHistoryStore, MemoryRecordStore, MemoryReferenceStore};
use medsync_server::ingest::sources::ReferenceTable;
use medsync_server::ingest::{ImportPipeline, NoopProgress, Result, RunContext, SourceCatalog};
use tokio_util::sync::CancellationToken;

/// A pipeline over in-memory stores, with handles to inspect them
pub struct Harness {
    pub pipeline: ImportPipeline,
    pub records: Arc<MemoryRecordStore>,
    pub references: Arc<MemoryReferenceStore>,
    pub history: Arc<MemoryHistoryStore>,
    pub catalog: SourceCatalog,
}

impl Harness {
    pub fn new(references: MemoryReferenceStore) -> Self {
        let records = Arc::new(MemoryRecordStore::new());
        let references = Arc::new(references);
        let history = Arc::new(MemoryHistoryStore::new());
        let pipeline = ImportPipeline::new(records.clone(), references.clone(), history.clone());
        Self {
            pipeline,
            records,
            references,
            history,
            catalog: SourceCatalog::builtin(),
        }
    }

    /// Reference tables holding the codes the fixtures use
    pub fn with_standard_codes() -> Self {
        Self::new(
            MemoryReferenceStore::new()
                .with_codes(ReferenceTable::Procedure, ["640000", "890201", "070101"])
                .with_codes(ReferenceTable::Diagnosis, ["J189", "E119"])
                .with_codes(ReferenceTable::Roster, ["100", "200", "300"])
                .with_codes(ReferenceTable::Geographic, ["05001", "11001"]),
        )
    }

    /// A second pipeline over the same records and history, with other reference tables
    pub fn with_references(&self, references: MemoryReferenceStore) -> Self {
        let references = Arc::new(references);
        let pipeline = ImportPipeline::new(self.records.clone(), references.clone(), self.history.clone());
        Self {
            pipeline,
            records: self.records.clone(),
            references,
            history: self.history.clone(),
            catalog: SourceCatalog::builtin(),
        }
    }

    pub async fn import(&self, source: &str, bytes: &[u8]) -> Result<ImportResult> {
        let spec = self.catalog.get(source)?;
        self.pipeline
            .import_file(
                spec,
                bytes,
                &RunContext::new("test").with_file("fixture.xls", "00"),
                Arc::new(NoopProgress),
                &CancellationToken::new(),
            )
            .await
    }
}

/// An HTML table as saved by spreadsheet exporters, one `<tr>` per row
pub fn html_table(rows: &[&[&str]]) -> Vec<u8> {
    let mut html = String::from("<html><body><table>\n");
    for row in rows {
        html.push_str("<tr>");
        for cell in *row {
            html.push_str("<td>");
            html.push_str(cell);
            html.push_str("</td>");
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</table></body></html>\n");
    html.into_bytes()
}

/// Procedures export with a title block above the header row
pub fn procedures_export(rows: &[&[&str]]) -> Vec<u8> {
    let mut all: Vec<&[&str]> = vec![&["REPORTE DE PROCEDIMIENTOS"], &["Generado 2026-10-01"], &[]];
    all.push(&["FECHA", "TIPO ID", "IDPCTE", "CUPS", "CANTIDAD"]);
    all.extend_from_slice(rows);
    html_table(&all)
}
