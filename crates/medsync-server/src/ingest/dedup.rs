//! In-file deduplication by natural key

use std::collections::BTreeMap;

use super::transform::TransformedRow;

/// One row per natural key; a later row supersedes an earlier one
#[derive(Debug, Default)]
pub struct Deduplicator {
    rows: BTreeMap<String, TransformedRow>,
    seen: u64,
    duplicates: u64,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row, returning true when it replaced one with the same key
    pub fn insert(&mut self, row: TransformedRow) -> bool {
        self.seen += 1;
        let replaced = self.rows.insert(row.key.clone(), row).is_some();
        if replaced {
            self.duplicates += 1;
        }
        replaced
    }

    /// Valid rows offered, duplicates included
    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Unique rows in key order
    pub fn into_rows(self) -> Vec<TransformedRow> {
        self.rows.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, value: &str) -> TransformedRow {
        TransformedRow {
            key: key.to_string(),
            fields: [("note".to_string(), value.to_string())].into_iter().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_last_write_wins() {
        let mut dedup = Deduplicator::new();
        assert!(!dedup.insert(row("a", "first")));
        assert!(!dedup.insert(row("b", "other")));
        assert!(dedup.insert(row("a", "second")));

        assert_eq!(dedup.duplicates(), 1);
        let rows = dedup.into_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("note"), Some("second"));
    }

    #[test]
    fn test_duplicates_equal_seen_minus_unique() {
        let mut dedup = Deduplicator::new();
        for key in ["x", "y", "x", "x", "z", "y"] {
            dedup.insert(row(key, key));
        }
        assert_eq!(dedup.duplicates(), dedup.seen() - dedup.len() as u64);
        assert_eq!(dedup.len(), 3);
    }
}
