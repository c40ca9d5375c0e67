//! Source priority and the per-row merge decision
//!
//! Several feeds describe the same entity (a patient appears in the local
//! roster and in the national one). Each stored row has an owner source; the
//! priority table decides whether an incoming row may take ownership or may
//! only fill gaps.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::store::{RecordStatus, StoredRecord};
use super::transform::TransformedRow;

/// Version used when none is configured
pub const DEFAULT_PRIORITY_VERSION: &str = "v1";

/// What loading one row did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeAction {
    Insert,
    Update,
    Complement,
}

/// Versioned source ranking; lower rank means higher priority
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriorityTable {
    version: String,
    ranks: BTreeMap<String, u32>,
}

impl PriorityTable {
    pub fn new(version: impl Into<String>, ranks: impl IntoIterator<Item = (String, u32)>) -> Self {
        Self {
            version: version.into(),
            ranks: ranks.into_iter().collect(),
        }
    }

    /// Local feeds are curated by staff and outrank the national roster
    pub fn v1() -> Self {
        Self::new(
            "v1",
            [
                ("roster_local", 0),
                ("procedures", 0),
                ("diagnoses", 0),
                ("visits", 0),
                ("roster_federal", 10),
            ]
            .into_iter()
            .map(|(s, r)| (s.to_string(), r)),
        )
    }

    /// Look up a published table by version name
    pub fn by_version(version: &str) -> Option<Self> {
        match version {
            "v1" => Some(Self::v1()),
            _ => None,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Rank of a source; unknown sources rank lowest
    pub fn rank(&self, source: &str) -> u32 {
        self.ranks.get(source).copied().unwrap_or(u32::MAX)
    }

    /// Update when the stored owner does not outrank the incoming source
    pub fn action_for(&self, stored_owner: &str, incoming: &str) -> MergeAction {
        if self.rank(stored_owner) >= self.rank(incoming) {
            MergeAction::Update
        } else {
            MergeAction::Complement
        }
    }
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self::v1()
    }
}

/// Combine an incoming row with what is stored under the same key
pub fn merge_record(
    existing: Option<&StoredRecord>,
    incoming: &TransformedRow,
    source: &str,
    run_start: DateTime<Utc>,
    priorities: &PriorityTable,
) -> (MergeAction, StoredRecord) {
    let Some(stored) = existing else {
        return (
            MergeAction::Insert,
            StoredRecord {
                key: incoming.key.clone(),
                fields: incoming.fields.clone(),
                owner: source.to_string(),
                status: RecordStatus::Active,
                last_seen_at: run_start,
            },
        );
    };

    let action = priorities.action_for(&stored.owner, source);
    let mut merged = stored.clone();
    match action {
        MergeAction::Update => {
            for (field, value) in &incoming.fields {
                if !value.is_empty() {
                    merged.fields.insert(field.clone(), value.clone());
                }
            }
            merged.owner = source.to_string();
            merged.status = RecordStatus::Active;
            merged.last_seen_at = run_start;
        }
        MergeAction::Complement | MergeAction::Insert => {
            for (field, value) in &incoming.fields {
                let slot = merged.fields.entry(field.clone()).or_default();
                if slot.is_empty() {
                    slot.clone_from(value);
                }
            }
        }
    }
    (action, merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(pairs: &[(&str, &str)]) -> TransformedRow {
        TransformedRow {
            key: "CC|1".to_string(),
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn stored(owner: &str, pairs: &[(&str, &str)]) -> StoredRecord {
        StoredRecord {
            key: "CC|1".to_string(),
            fields: row(pairs).fields,
            owner: owner.to_string(),
            status: RecordStatus::NeedsRevalidation,
            last_seen_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_absent_key_inserts() {
        let now = Utc::now();
        let (action, record) =
            merge_record(None, &row(&[("sex", "F")]), "roster_local", now, &PriorityTable::v1());
        assert_eq!(action, MergeAction::Insert);
        assert_eq!(record.owner, "roster_local");
        assert_eq!(record.last_seen_at, now);
    }

    #[test]
    fn test_equal_or_higher_priority_updates() {
        let now = Utc::now();
        let existing = stored("roster_federal", &[("sex", "M"), ("insurer", "NUEVA EPS")]);
        let (action, record) = merge_record(
            Some(&existing),
            &row(&[("sex", "F")]),
            "roster_local",
            now,
            &PriorityTable::v1(),
        );
        assert_eq!(action, MergeAction::Update);
        assert_eq!(record.fields["sex"], "F");
        assert_eq!(record.fields["insurer"], "NUEVA EPS");
        assert_eq!(record.owner, "roster_local");
        assert_eq!(record.status, RecordStatus::Active);
        assert_eq!(record.last_seen_at, now);
    }

    #[test]
    fn test_lower_priority_only_complements() {
        let existing = stored("roster_local", &[("sex", "F"), ("insurer", "")]);
        let (action, record) = merge_record(
            Some(&existing),
            &row(&[("sex", "M"), ("insurer", "SURA"), ("municipality", "05001")]),
            "roster_federal",
            Utc::now(),
            &PriorityTable::v1(),
        );
        assert_eq!(action, MergeAction::Complement);
        assert_eq!(record.fields["sex"], "F");
        assert_eq!(record.fields["insurer"], "SURA");
        assert_eq!(record.fields["municipality"], "05001");
        assert_eq!(record.owner, "roster_local");
        assert_eq!(record.last_seen_at, existing.last_seen_at);
        assert_eq!(record.status, existing.status);
    }

    #[test]
    fn test_unknown_owner_ranks_lowest() {
        let table = PriorityTable::v1();
        assert_eq!(table.action_for("legacy_import", "roster_federal"), MergeAction::Update);
        assert_eq!(table.action_for("roster_local", "legacy_import"), MergeAction::Complement);
        assert!(PriorityTable::by_version("v9").is_none());
    }
}
