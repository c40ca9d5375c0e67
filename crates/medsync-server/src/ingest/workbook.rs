//! Binary workbook decoding (XLS, XLSX, ODS)

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use super::document::RawDocument;
use super::error::{ImportError, Result};
use super::transform::excel_serial_to_date;

/// Decode the first sheet of a workbook into a single-table document
pub fn parse(bytes: &[u8]) -> Result<RawDocument> {
    if bytes.is_empty() {
        return Err(ImportError::EmptyFile);
    }

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ImportError::Format(format!("unreadable workbook: {e}")))?;

    let first = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| ImportError::Format("workbook has no sheets".to_string()))?;

    let range = workbook
        .worksheet_range(&first)
        .map_err(|e| ImportError::Format(format!("sheet '{first}': {e}")))?;

    let rows = range
        .rows()
        .map(|row| row.iter().map(cell_to_text).collect())
        .collect();

    Ok(RawDocument::single(rows))
}

/// Render one cell the way the row transformer expects to read it
fn cell_to_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => float_to_text(*f),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) => s.chars().take(10).collect(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(_) | Data::Empty => String::new(),
    }
}

// Identifiers stored as numbers must not pick up a trailing ".0"
fn float_to_text(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}
