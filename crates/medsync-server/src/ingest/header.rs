//! Header row location and column resolution
//!
//! Exports carry report titles, filter summaries and blank spacer rows above
//! the real header, and column names drift between versions of the same
//! source system. The header is found by content and every column is
//! resolved to a field by alias, never by position.

use std::collections::{BTreeMap, HashSet};

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::document::RawDocument;
use super::error::{ImportError, Result};
use super::sources::SourceSpec;

/// Rows scanned per table when looking for the header
pub const HEADER_SCAN_ROWS: usize = 20;

/// Shortest header allowed to match an alias that merely contains it
const MIN_CONTAINED_HEADER_LEN: usize = 3;

/// Field name to column index, fixed once the header is resolved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    columns: BTreeMap<&'static str, usize>,
}

impl ColumnMap {
    pub fn get(&self, field: &str) -> Option<usize> {
        self.columns.get(field).copied()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.columns.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.columns.iter().map(|(f, c)| (*f, *c))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Every natural-key field must have a column
    pub fn ensure_keys(&self, spec: &SourceSpec) -> Result<()> {
        match spec.natural_key.iter().find(|key| !self.contains(key)) {
            Some(missing) => Err(ImportError::MissingColumn((*missing).to_string())),
            None => Ok(()),
        }
    }
}

/// Where the data table starts and how its columns map to fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMatch {
    pub table: usize,
    pub header_row: usize,
    pub columns: ColumnMap,
}

/// Find the data table of a document and resolve its columns
pub fn locate(doc: &RawDocument, spec: &SourceSpec) -> Result<HeaderMatch> {
    for (table_idx, table) in doc.tables.iter().enumerate() {
        for (row_idx, row) in table.rows.iter().take(HEADER_SCAN_ROWS).enumerate() {
            if let Some(columns) = match_row(row, spec) {
                columns.ensure_keys(spec)?;
                tracing::debug!(
                    source = spec.id,
                    table = table_idx,
                    header_row = row_idx,
                    resolved = columns.len(),
                    "Header located"
                );
                return Ok(HeaderMatch {
                    table: table_idx,
                    header_row: row_idx,
                    columns,
                });
            }
        }
    }

    Err(ImportError::HeaderNotFound {
        expected: spec.required_headers.join(", "),
    })
}

/// Resolve a row's columns if it contains every required header token
pub fn match_row(row: &[String], spec: &SourceSpec) -> Option<ColumnMap> {
    let headers: Vec<String> = row.iter().map(|cell| normalize_header(cell)).collect();
    let present: HashSet<&str> = headers.iter().map(String::as_str).collect();

    if spec.required_headers.iter().all(|token| present.contains(token)) {
        Some(resolve_columns(&headers, spec))
    } else {
        None
    }
}

/// Map normalized header cells to fields: exact aliases first, then fuzzy
pub fn resolve_columns(headers: &[String], spec: &SourceSpec) -> ColumnMap {
    let mut columns = BTreeMap::new();
    let mut claimed = vec![false; headers.len()];

    for field in &spec.fields {
        let exact = headers
            .iter()
            .enumerate()
            .find(|(idx, h)| !claimed[*idx] && field.aliases.contains(&h.as_str()));
        if let Some((idx, _)) = exact {
            claimed[idx] = true;
            columns.insert(field.name, idx);
        }
    }

    for field in &spec.fields {
        if columns.contains_key(field.name) {
            continue;
        }
        let fuzzy = headers.iter().enumerate().find(|(idx, h)| {
            !claimed[*idx] && field.aliases.iter().any(|alias| fuzzy_match(h, alias))
        });
        if let Some((idx, _)) = fuzzy {
            claimed[idx] = true;
            columns.insert(field.name, idx);
        }
    }

    ColumnMap { columns }
}

fn fuzzy_match(header: &str, alias: &str) -> bool {
    if header.is_empty() {
        return false;
    }
    header.contains(alias)
        || (header.chars().count() >= MIN_CONTAINED_HEADER_LEN && alias.contains(header))
}

/// Accent-stripped, case-folded, whitespace-collapsed header text
pub fn normalize_header(raw: &str) -> String {
    // Decomposed so accents drop off as combining marks, whatever the
    // exporter's normalization form
    raw.nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c == '_' { ' ' } else { c })
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ingest::document::{RawDocument, Table};
    use crate::ingest::sources::SourceCatalog;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn procedures() -> SourceSpec {
        SourceCatalog::builtin().get("procedures").unwrap().clone()
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("  Fecha   Atención "), "fecha atencion");
        assert_eq!(normalize_header("NÚMERO_DOCUMENTO"), "numero documento");
        assert_eq!(normalize_header("Año\u{a0}Nacimiento"), "ano nacimiento");
        assert_eq!(normalize_header("Nu\u{301}mero Identificacio\u{301}n"), "numero identificacion");
        assert_eq!(normalize_header("Código Ação"), "codigo acao");
    }

    #[test]
    fn test_locate_skips_title_rows() {
        let doc = RawDocument::new(vec![
            Table::new(vec![cells(&["Reporte de procedimientos"])]),
            Table::new(vec![
                cells(&["Generado 2024-03-20", "", ""]),
                cells(&["", "", ""]),
                cells(&["FECHA", "IDPCTE", "CUPS", "Cantidad"]),
                cells(&["2024/03/15", "1032", "640000", "1"]),
            ]),
        ]);
        let found = locate(&doc, &procedures()).unwrap();
        assert_eq!(found.table, 1);
        assert_eq!(found.header_row, 2);
        assert_eq!(found.columns.get("cups"), Some(2));
        assert_eq!(found.columns.get("quantity"), Some(3));
    }

    #[test]
    fn test_header_beyond_scan_window_is_not_found() {
        let mut rows = vec![cells(&["x"]); HEADER_SCAN_ROWS];
        rows.push(cells(&["FECHA", "IDPCTE", "CUPS"]));
        let doc = RawDocument::new(vec![Table::new(rows)]);
        assert!(matches!(
            locate(&doc, &procedures()),
            Err(ImportError::HeaderNotFound { .. })
        ));
    }

    #[test]
    fn test_fuzzy_match_fills_unresolved_fields() {
        let headers = cells(&["fecha", "idpcte", "cups", "nombre prestador", "cant"]);
        let columns = resolve_columns(&headers, &procedures());
        assert_eq!(columns.get("provider"), Some(3));
        assert_eq!(columns.get("quantity"), Some(4));
    }

    #[test]
    fn test_short_headers_do_not_match_containing_aliases() {
        let headers = cells(&["fecha", "idpcte", "cups", "ip"]);
        let columns = resolve_columns(&headers, &procedures());
        assert!(!columns.contains("provider"));
    }

    #[test]
    fn test_exact_match_wins_over_earlier_fuzzy_candidate() {
        let headers = cells(&["codigo cups anterior", "fecha", "idpcte", "cups"]);
        let columns = resolve_columns(&headers, &procedures());
        assert_eq!(columns.get("cups"), Some(3));
    }

    #[test]
    fn test_resolution_is_column_order_independent() {
        let spec = procedures();
        let forward = cells(&["FECHA", "IDPCTE", "CUPS", "Cantidad", "IPS", "Médico"]);
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = match_row(&forward, &spec).unwrap();
        let b = match_row(&reversed, &spec).unwrap();

        let by_header = |row: &[String], map: &ColumnMap| {
            map.iter()
                .map(|(field, idx)| (field, normalize_header(&row[idx])))
                .collect::<Vec<_>>()
        };
        assert_eq!(by_header(&forward, &a), by_header(&reversed, &b));
    }

    #[test]
    fn test_missing_key_column_is_reported() {
        let mut spec = procedures();
        spec.required_headers = &["fecha", "idpcte"];
        let doc = RawDocument::single(vec![cells(&["FECHA", "IDPCTE", "Cantidad"])]);
        match locate(&doc, &spec) {
            Err(ImportError::MissingColumn(field)) => assert_eq!(field, "cups"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
