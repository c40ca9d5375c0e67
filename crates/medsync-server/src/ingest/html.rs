//! HTML table extraction
//!
//! Source systems that "export to Excel" frequently write an HTML page with a
//! `.xls` name. Markup is parsed leniently; every `<table>` becomes one table
//! of the document, nested tables included.

use medsync_common::text::{decode_text, strip_bom};
use scraper::{ElementRef, Html, Selector};

use super::document::{RawDocument, Table};
use super::error::{ImportError, Result};

/// Parse all tables of an HTML document
pub fn parse(bytes: &[u8]) -> Result<RawDocument> {
    if bytes.is_empty() {
        return Err(ImportError::EmptyFile);
    }

    let text = decode_text(strip_bom(bytes));
    let document = Html::parse_document(&text);

    let table_sel = selector("table")?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("td, th")?;

    let tables: Vec<Table> = document
        .select(&table_sel)
        .map(|table| {
            let rows = table
                .select(&row_sel)
                .filter(|row| owned_by(row, &table))
                .map(|row| row.select(&cell_sel).map(|cell| cell_text(&cell)).collect())
                .collect();
            Table::new(rows)
        })
        .collect();

    if tables.is_empty() {
        return Err(ImportError::Format("HTML document contains no tables".to_string()));
    }

    Ok(RawDocument::new(tables))
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ImportError::Format(format!("invalid selector {css}: {e}")))
}

// A row belongs to the nearest enclosing table only
fn owned_by(row: &ElementRef<'_>, table: &ElementRef<'_>) -> bool {
    row.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "table")
        .map(|el| el.id() == table.id())
        .unwrap_or(false)
}

fn cell_text(cell: &ElementRef<'_>) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
