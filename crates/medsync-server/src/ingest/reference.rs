//! Batched foreign-key validation against reference tables
//!
//! Codes are deduplicated, answered from the run's cache where possible and
//! looked up in fixed-size chunks. Both hits and misses are cached. A chunk
//! whose lookup fails leaves its codes unverified rather than invalid, and
//! they are retried the next time they are asked for.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use super::sources::{ReferenceTable, RulePolicy, SourceSpec};
use super::store::ReferenceStore;
use super::transform::TransformedRow;

/// Codes per backend round trip
pub const DEFAULT_REFERENCE_CHUNK_SIZE: usize = 1000;

/// Known answers per reference table, owned by one run
#[derive(Debug, Default)]
pub struct ReferenceCache {
    known: HashMap<ReferenceTable, HashMap<String, bool>>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, table: ReferenceTable, code: &str) -> Option<bool> {
        self.known.get(&table).and_then(|codes| codes.get(code)).copied()
    }

    pub fn record(&mut self, table: ReferenceTable, code: String, valid: bool) {
        self.known.entry(table).or_default().insert(code, valid);
    }

    pub fn len(&self) -> usize {
        self.known.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every answer, for callers that reuse one cache across runs
    pub fn invalidate(&mut self) {
        self.known.clear();
    }
}

/// Answer for a batch of codes against one table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeCheck {
    pub valid: HashSet<String>,
    pub unverified: HashSet<String>,
}

impl CodeCheck {
    fn status(&self, code: &str) -> CodeStatus {
        if self.valid.contains(code) {
            CodeStatus::Valid
        } else if self.unverified.contains(code) {
            CodeStatus::Unverified
        } else {
            CodeStatus::Invalid
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeStatus {
    Valid,
    Invalid,
    Unverified,
}

/// Rows affected by one problematic code
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CodeIssue {
    pub example_patient: String,
    pub affected_rows: u64,
}

pub type IssuesByTable = BTreeMap<ReferenceTable, BTreeMap<String, CodeIssue>>;

/// Reference problems found in one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceFindings {
    /// Invalid codes under a blocking rule (rows rejected)
    pub blocking: IssuesByTable,
    /// Invalid codes under an advisory rule (rows kept)
    pub advisory: IssuesByTable,
    /// Codes whose lookup failed
    pub unverified: IssuesByTable,
}

impl ReferenceFindings {
    fn note(map: &mut IssuesByTable, table: ReferenceTable, code: &str, row: &TransformedRow) {
        let issue = map
            .entry(table)
            .or_default()
            .entry(code.to_string())
            .or_insert_with(|| CodeIssue {
                example_patient: row.get("patient_id").unwrap_or_default().to_string(),
                affected_rows: 0,
            });
        issue.affected_rows += 1;
    }

    /// Distinct codes left unverified across all tables
    pub fn unverified_codes(&self) -> usize {
        self.unverified.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocking.is_empty() && self.advisory.is_empty() && self.unverified.is_empty()
    }
}

/// Rows that passed the blocking rules plus what was found on the way
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub accepted: Vec<TransformedRow>,
    pub rejected: u64,
    pub findings: ReferenceFindings,
}

pub struct ReferenceValidator<'a> {
    store: &'a dyn ReferenceStore,
    cache: ReferenceCache,
    chunk_size: usize,
}

impl<'a> ReferenceValidator<'a> {
    pub fn new(store: &'a dyn ReferenceStore, cache: ReferenceCache, chunk_size: usize) -> Self {
        Self {
            store,
            cache,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn cache(&self) -> &ReferenceCache {
        &self.cache
    }

    /// Which of `codes` exist in `table`
    pub async fn validate_batch<'c, I>(&mut self, table: ReferenceTable, codes: I) -> CodeCheck
    where
        I: IntoIterator<Item = &'c str>,
    {
        let unique: BTreeSet<&str> = codes.into_iter().filter(|c| !c.is_empty()).collect();
        let mut check = CodeCheck::default();
        let mut pending = Vec::new();

        for code in unique {
            match self.cache.lookup(table, code) {
                Some(true) => {
                    check.valid.insert(code.to_string());
                }
                Some(false) => {}
                None => pending.push(code.to_string()),
            }
        }

        debug!(
            table = %table,
            cached = check.valid.len(),
            pending = pending.len(),
            "Validating reference codes"
        );

        for (chunk_idx, chunk) in pending.chunks(self.chunk_size).enumerate() {
            match self.store.existing_codes(table, chunk).await {
                Ok(found) => {
                    for code in chunk {
                        let valid = found.contains(code);
                        if valid {
                            check.valid.insert(code.clone());
                        }
                        self.cache.record(table, code.clone(), valid);
                    }
                }
                Err(e) => {
                    warn!(
                        table = %table,
                        chunk = chunk_idx,
                        codes = chunk.len(),
                        error = %e,
                        "Reference lookup failed; codes left unverified"
                    );
                    check.unverified.extend(chunk.iter().cloned());
                }
            }
        }

        check
    }

    /// Apply every reference rule of `spec` to `rows`
    pub async fn check_rows(&mut self, spec: &SourceSpec, rows: Vec<TransformedRow>) -> ValidationOutcome {
        let mut checks = Vec::with_capacity(spec.references.len());
        for rule in &spec.references {
            let codes = rows.iter().filter_map(|r| r.get(rule.field));
            let check = self.validate_batch(rule.table, codes).await;
            checks.push((rule, check));
        }

        let mut outcome = ValidationOutcome::default();
        for row in rows {
            let mut blocked = false;
            for (rule, check) in &checks {
                let code = match (row.get(rule.field), row.malformed(rule.field)) {
                    (Some(code), _) => code,
                    // A code that could not even be normalized is invalid
                    (None, Some(raw)) => {
                        let issues = match rule.policy {
                            RulePolicy::Blocking => &mut outcome.findings.blocking,
                            RulePolicy::Advisory => &mut outcome.findings.advisory,
                        };
                        ReferenceFindings::note(issues, rule.table, raw, &row);
                        blocked |= rule.policy == RulePolicy::Blocking;
                        continue;
                    }
                    (None, None) => continue,
                };
                match (check.status(code), rule.policy) {
                    (CodeStatus::Valid, _) => {}
                    (CodeStatus::Unverified, policy) => {
                        ReferenceFindings::note(&mut outcome.findings.unverified, rule.table, code, &row);
                        blocked |= policy == RulePolicy::Blocking;
                    }
                    (CodeStatus::Invalid, RulePolicy::Blocking) => {
                        ReferenceFindings::note(&mut outcome.findings.blocking, rule.table, code, &row);
                        blocked = true;
                    }
                    (CodeStatus::Invalid, RulePolicy::Advisory) => {
                        ReferenceFindings::note(&mut outcome.findings.advisory, rule.table, code, &row);
                    }
                }
            }

            if blocked {
                outcome.rejected += 1;
            } else {
                outcome.accepted.push(row);
            }
        }

        outcome
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ingest::memory::MemoryReferenceStore;
    use crate::ingest::sources::SourceCatalog;

    fn row(key: &str, pairs: &[(&str, &str)]) -> TransformedRow {
        TransformedRow {
            key: key.to_string(),
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_batches_are_chunked_and_cached() {
        let store = MemoryReferenceStore::new().with_codes(ReferenceTable::Procedure, ["640000", "890201"]);
        let mut validator = ReferenceValidator::new(&store, ReferenceCache::new(), 2);

        let check = validator
            .validate_batch(ReferenceTable::Procedure, ["640000", "999999", "890201", "640000", ""])
            .await;
        assert_eq!(check.valid.len(), 2);
        assert!(check.unverified.is_empty());
        assert_eq!(store.lookups(), 2);
        assert_eq!(validator.cache().len(), 3);

        // Both hits and misses come from the cache now
        validator
            .validate_batch(ReferenceTable::Procedure, ["999999", "890201"])
            .await;
        assert_eq!(store.lookups(), 2);
    }

    #[tokio::test]
    async fn test_failed_lookup_leaves_codes_unverified() {
        let store = MemoryReferenceStore::new().failing_for(ReferenceTable::Diagnosis);
        let mut validator = ReferenceValidator::new(&store, ReferenceCache::new(), 1000);

        let check = validator
            .validate_batch(ReferenceTable::Diagnosis, ["J459"])
            .await;
        assert!(check.valid.is_empty());
        assert!(check.unverified.contains("J459"));
        assert!(validator.cache().is_empty());
    }

    #[tokio::test]
    async fn test_blocking_rejects_and_advisory_warns() {
        let spec = SourceCatalog::builtin().get("procedures").unwrap().clone();
        let store = MemoryReferenceStore::new()
            .with_codes(ReferenceTable::Procedure, ["640000"])
            .with_codes(ReferenceTable::Roster, ["1"]);
        let mut validator = ReferenceValidator::new(&store, ReferenceCache::new(), 1000);

        let rows = vec![
            row("a", &[("patient_id", "1"), ("cups", "640000")]),
            row("b", &[("patient_id", "2"), ("cups", "640000")]),
            row("c", &[("patient_id", "3"), ("cups", "111111")]),
            row("d", &[("patient_id", "3"), ("cups", "111111")]),
        ];
        let outcome = validator.check_rows(&spec, rows).await;

        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(outcome.rejected, 2);
        let cups = &outcome.findings.blocking[&ReferenceTable::Procedure]["111111"];
        assert_eq!(cups.affected_rows, 2);
        assert_eq!(cups.example_patient, "3");
        assert_eq!(outcome.findings.advisory[&ReferenceTable::Roster].len(), 2);
    }

    #[tokio::test]
    async fn test_unverified_blocking_code_rejects_row() {
        let spec = SourceCatalog::builtin().get("procedures").unwrap().clone();
        let store = MemoryReferenceStore::new()
            .failing_for(ReferenceTable::Procedure)
            .with_codes(ReferenceTable::Roster, ["1"]);
        let mut validator = ReferenceValidator::new(&store, ReferenceCache::new(), 1000);

        let outcome = validator
            .check_rows(&spec, vec![row("a", &[("patient_id", "1"), ("cups", "640000")])])
            .await;
        assert_eq!(outcome.rejected, 1);
        assert!(outcome.findings.unverified.contains_key(&ReferenceTable::Procedure));
    }

    #[tokio::test]
    async fn test_malformed_blocking_code_rejects_row() {
        let spec = SourceCatalog::builtin().get("visits").unwrap().clone();
        let store = MemoryReferenceStore::new()
            .with_codes(ReferenceTable::Diagnosis, ["J189"])
            .with_codes(ReferenceTable::Roster, ["1"]);
        let mut validator = ReferenceValidator::new(&store, ReferenceCache::new(), 1000);

        let mut bad = row("b", &[("patient_id", "1")]);
        bad.malformed.insert("cie10".to_string(), "ZZZZZZ99".to_string());
        let rows = vec![row("a", &[("patient_id", "1"), ("cie10", "J189")]), bad];
        let outcome = validator.check_rows(&spec, rows).await;

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.rejected, 1);
        let issue = &outcome.findings.blocking[&ReferenceTable::Diagnosis]["ZZZZZZ99"];
        assert_eq!(issue.affected_rows, 1);
        assert_eq!(issue.example_patient, "1");
    }
}
