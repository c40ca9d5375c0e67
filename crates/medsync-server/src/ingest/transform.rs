//! Row normalization
//!
//! Turns one raw row into a `TransformedRow` using the source's field kinds.
//! Nothing here fails: values that cannot be normalized become empty and are
//! counted, and rows lacking a natural-key field are skipped. Malformed codes
//! are also kept on the row in raw form so reference rules can still see them.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate};

use super::document::is_blank_row;
use super::header::ColumnMap;
use super::sources::{FieldKind, SourceSpec};

/// Separator between natural-key parts
pub const KEY_SEPARATOR: char = '|';

/// Two-digit years below this are 20YY, the rest 19YY
const CENTURY_PIVOT: u32 = 30;

/// Largest serial Excel can represent (9999-12-31)
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

const NULL_TOKENS: &[&str] = &["null", "nan", "n/a", "none", "-"];

/// A normalized row ready for validation and loading
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformedRow {
    /// Key fields joined with `|`
    pub key: String,
    /// Non-empty normalized values by field name
    pub fields: BTreeMap<String, String>,
    /// Raw values of code fields that failed normalization
    pub malformed: BTreeMap<String, String>,
}

impl TransformedRow {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn malformed(&self, field: &str) -> Option<&str> {
        self.malformed.get(field).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Row(TransformedRow),
    /// At least one natural-key field is empty
    Skip,
    /// Every cell is empty; not counted anywhere
    Blank,
}

/// Values dropped during normalization, by field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformStats {
    pub invalid_dates: BTreeMap<&'static str, u64>,
    pub invalid_codes: BTreeMap<&'static str, u64>,
}

impl TransformStats {
    pub fn is_empty(&self) -> bool {
        self.invalid_dates.is_empty() && self.invalid_codes.is_empty()
    }
}

/// Applies one source's normalization rules to rows of a resolved table
pub struct RowTransformer<'a> {
    spec: &'a SourceSpec,
    columns: ColumnMap,
    stats: TransformStats,
}

impl<'a> RowTransformer<'a> {
    pub fn new(spec: &'a SourceSpec, columns: ColumnMap) -> Self {
        Self {
            spec,
            columns,
            stats: TransformStats::default(),
        }
    }

    pub fn transform(&mut self, row: &[String]) -> RowOutcome {
        if is_blank_row(row) {
            return RowOutcome::Blank;
        }

        let mut fields = BTreeMap::new();
        let mut malformed = BTreeMap::new();
        for field in &self.spec.fields {
            let Some(idx) = self.columns.get(field.name) else {
                continue;
            };
            let raw = sanitize(row.get(idx).map(String::as_str).unwrap_or(""));
            if raw.is_empty() {
                continue;
            }

            let value = match field.kind {
                FieldKind::Text => Some(raw),
                FieldKind::Upper => Some(raw.to_uppercase()),
                FieldKind::Identifier => Some(normalize_identifier(&raw)),
                FieldKind::Date => {
                    let parsed = parse_date(&raw);
                    if parsed.is_none() {
                        *self.stats.invalid_dates.entry(field.name).or_default() += 1;
                    }
                    parsed
                }
                FieldKind::Cups | FieldKind::Cie10 | FieldKind::Divipola => {
                    let code = match field.kind {
                        FieldKind::Cups => normalize_cups(&raw),
                        FieldKind::Cie10 => normalize_cie10(&raw),
                        _ => normalize_divipola(&raw),
                    };
                    if code.is_none() {
                        *self.stats.invalid_codes.entry(field.name).or_default() += 1;
                        malformed.insert(field.name.to_string(), raw.clone());
                    }
                    code
                }
            };

            if let Some(value) = value.filter(|v| !v.is_empty()) {
                fields.insert(field.name.to_string(), value);
            }
        }

        for rule in &self.spec.concat {
            let joined = rule
                .parts
                .iter()
                .filter_map(|part| fields.get(*part))
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(rule.separator);
            if !joined.is_empty() {
                fields.insert(rule.target.to_string(), joined);
            }
        }

        let mut key_parts = Vec::with_capacity(self.spec.natural_key.len());
        for key in self.spec.natural_key {
            match fields.get(*key) {
                Some(value) => key_parts.push(value.as_str()),
                None => return RowOutcome::Skip,
            }
        }
        let key = key_parts.join(&KEY_SEPARATOR.to_string());

        RowOutcome::Row(TransformedRow {
            key,
            fields,
            malformed,
        })
    }

    pub fn stats(&self) -> &TransformStats {
        &self.stats
    }

    pub fn into_stats(self) -> TransformStats {
        self.stats
    }
}

/// Strip NUL bytes and whitespace and map null placeholders to empty
pub fn sanitize(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| *c != '\0').collect();
    let trimmed = cleaned.trim();
    if NULL_TOKENS.iter().any(|t| trimmed.eq_ignore_ascii_case(t)) {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Trim and drop the `.0` left behind by numeric spreadsheet cells
pub fn normalize_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_suffix(".0").unwrap_or(trimmed).to_string()
}

/// Six-digit CUPS code
///
/// Longer values are truncated to their first six characters and five-digit
/// values lost a leading zero to numeric coercion.
pub fn normalize_cups(raw: &str) -> Option<String> {
    let cleaned = normalize_identifier(&sanitize(raw));
    let code: String = match cleaned.chars().count() {
        0..=4 => return None,
        5 => format!("0{cleaned}"),
        _ => cleaned.chars().take(6).collect(),
    };
    code.chars().all(|c| c.is_ascii_digit()).then_some(code)
}

/// CIE10 code without dots or spaces: a letter then 2 or 3 alphanumerics
pub fn normalize_cie10(raw: &str) -> Option<String> {
    let code: String = sanitize(raw)
        .chars()
        .filter(|c| *c != '.' && !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();

    let mut chars = code.chars();
    let leads_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric());
    (leads_with_letter && rest_ok && (3..=4).contains(&code.len())).then_some(code)
}

/// Five-digit DIVIPOLA municipality code
pub fn normalize_divipola(raw: &str) -> Option<String> {
    let code = normalize_identifier(&sanitize(raw));
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match code.len() {
        4 => Some(format!("0{code}")),
        5 => Some(code),
        _ => None,
    }
}

/// Parse a date in any format the source systems emit, as `YYYY-MM-DD`
///
/// Formats are tried in order: `YYYY/MM/DD`, `DD/MM/YYYY`, `M/D/YY`, Excel
/// serial, ISO with an optional time suffix. Slash formats also accept `-`.
pub fn parse_date(raw: &str) -> Option<String> {
    let value = sanitize(raw);
    if value.is_empty() {
        return None;
    }

    // "15/03/2024 00:00:00", "2024-03-15T08:30:00"
    let date_part = value
        .split(|c: char| c == ' ' || c == 'T')
        .next()
        .unwrap_or(&value);

    parse_separated(date_part)
        .or_else(|| parse_excel_serial(&value))
        .map(|d| d.format("%Y-%m-%d").to_string())
}

fn parse_separated(value: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = value.split(['/', '-']).collect();
    let &[a, b, c] = parts.as_slice() else {
        return None;
    };
    if ![a, b, c].iter().all(|p| !p.is_empty() && p.chars().all(|ch| ch.is_ascii_digit())) {
        return None;
    }

    let num = |s: &str| s.parse::<u32>().ok();
    match (a.len(), c.len()) {
        // YYYY/MM/DD and ISO
        (4, 1..=2) => ymd(num(a)? as i32, num(b)?, num(c)?),
        // DD/MM/YYYY
        (1..=2, 4) => ymd(num(c)? as i32, num(b)?, num(a)?),
        // M/D/YY
        (1..=2, 2) => {
            let yy = num(c)?;
            let year = if yy < CENTURY_PIVOT { 2000 + yy } else { 1900 + yy };
            ymd(year as i32, num(a)?, num(b)?)
        }
        _ => None,
    }
}

fn ymd(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_excel_serial(value: &str) -> Option<NaiveDate> {
    let serial: f64 = value.parse().ok()?;
    excel_serial_to_date(serial)
}

/// Convert an Excel serial day number (1900 system) to a date
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let date = epoch.checked_add_days(Days::new(serial.floor() as u64))?;
    (date.year() <= 9999).then_some(date)
}
