//! Uniform tabular form produced by the format readers

/// One table: ordered rows of ordered text cells
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }
}

/// Every table found in one input file, in document order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDocument {
    pub tables: Vec<Table>,
}

impl RawDocument {
    pub fn new(tables: Vec<Table>) -> Self {
        Self { tables }
    }

    pub fn single(rows: Vec<Vec<String>>) -> Self {
        Self {
            tables: vec![Table::new(rows)],
        }
    }

    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }
}

/// True when every cell of the row is blank
pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}
