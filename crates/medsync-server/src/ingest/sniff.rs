//! Format detection from raw bytes
//!
//! Several source systems export an HTML table and name it `.xls`; the
//! extension is never trusted.

use medsync_common::text::strip_bom;

/// Number of leading bytes inspected
const SNIFF_WINDOW: usize = 100;

/// Container format of an uploaded spreadsheet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// HTML markup, usually a `<table>` saved with an `.xls` extension
    Html,
    /// A real XLS/XLSX/ODS workbook
    BinaryWorkbook,
}

/// Classify bytes as HTML or binary workbook
///
/// Looks past an optional UTF-8 BOM and leading whitespace within the first
/// 100 bytes; a `<` means HTML, anything else is treated as a workbook.
pub fn detect(bytes: &[u8]) -> FileFormat {
    let body = strip_bom(bytes);
    let window = &body[..body.len().min(SNIFF_WINDOW)];

    match window.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'<') => FileFormat::Html,
        _ => FileFormat::BinaryWorkbook,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_html_disguised_as_xls() {
        assert_eq!(detect(b"<html><table>"), FileFormat::Html);
        assert_eq!(detect(b"\r\n  \t<table border=1>"), FileFormat::Html);
        assert_eq!(detect(b"\xEF\xBB\xBF <meta charset=utf-8>"), FileFormat::Html);
    }

    #[test]
    fn test_binary_signatures_are_workbooks() {
        // XLSX (zip) and legacy XLS (OLE2) magic numbers
        assert_eq!(detect(b"PK\x03\x04\x14\x00"), FileFormat::BinaryWorkbook);
        assert_eq!(detect(b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1"), FileFormat::BinaryWorkbook);
    }

    #[test]
    fn test_marker_beyond_window_is_ignored() {
        let mut bytes = vec![b' '; SNIFF_WINDOW];
        bytes.push(b'<');
        assert_eq!(detect(&bytes), FileFormat::BinaryWorkbook);
    }

    #[test]
    fn test_empty_input_has_a_definite_answer() {
        assert_eq!(detect(b""), FileFormat::BinaryWorkbook);
        assert_eq!(detect(b"\xEF\xBB\xBF"), FileFormat::BinaryWorkbook);
    }
}
