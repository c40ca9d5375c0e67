use serde::{Deserialize, Serialize};

use crate::features::imports::ImportState;
use crate::ingest::sources::{
    InputFormat, ReferenceRule, SourceMode, SourceSpec, SourceStatus,
};

/// List the configured import sources
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSourcesQuery {
    /// Only sources accepting this mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceListItem {
    pub id: &'static str,
    pub label: &'static str,
    pub target_table: &'static str,
    pub mode: SourceMode,
    pub status: SourceStatus,
    pub format: InputFormat,
    pub required_headers: &'static [&'static str],
    pub natural_key: &'static [&'static str],
    pub references: Vec<ReferenceRule>,
    pub chunk_size: usize,
    /// Cloud sources only; the URL itself stays server-side
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_cloud_url: Option<bool>,
}

impl From<&SourceSpec> for SourceListItem {
    fn from(spec: &SourceSpec) -> Self {
        Self {
            id: spec.id,
            label: spec.label,
            target_table: spec.target_table,
            mode: spec.mode,
            status: spec.status,
            format: spec.format,
            required_headers: spec.required_headers,
            natural_key: spec.natural_key,
            references: spec.references.clone(),
            chunk_size: spec.chunk_size,
            has_cloud_url: (spec.mode == SourceMode::Cloud).then(|| spec.cloud_url.is_some()),
        }
    }
}

impl ListSourcesQuery {
    fn mode(&self) -> Option<SourceMode> {
        match self.mode.as_deref()?.trim().to_ascii_lowercase().as_str() {
            "file" => Some(SourceMode::File),
            "cloud" => Some(SourceMode::Cloud),
            _ => None,
        }
    }
}

#[tracing::instrument(skip(state))]
pub fn handle(state: &ImportState, query: ListSourcesQuery) -> Vec<SourceListItem> {
    let mode = query.mode();
    state
        .catalog
        .iter()
        .filter(|spec| mode.map_or(true, |m| spec.mode == m))
        .map(SourceListItem::from)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ingest::memory::{MemoryHistoryStore, MemoryRecordStore, MemoryReferenceStore};
    use crate::ingest::{ImportPipeline, SourceCatalog};
    use std::sync::Arc;

    fn state() -> ImportState {
        let pipeline = ImportPipeline::new(
            Arc::new(MemoryRecordStore::default()),
            Arc::new(MemoryReferenceStore::default()),
            Arc::new(MemoryHistoryStore::default()),
        );
        ImportState::new(pipeline, SourceCatalog::builtin(), reqwest::Client::new())
    }

    #[test]
    fn test_lists_whole_catalogue() {
        let items = handle(&state(), ListSourcesQuery::default());
        let ids: Vec<_> = items.iter().map(|i| i.id).collect();
        assert!(ids.contains(&"procedures"));
        assert!(ids.contains(&"roster_federal"));
        assert_eq!(items.len(), 5);
    }

    #[test]
    fn test_mode_filter_and_cloud_flag() {
        let query = ListSourcesQuery {
            mode: Some("cloud".to_string()),
        };
        let items = handle(&state(), query);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "roster_federal");
        assert_eq!(items[0].has_cloud_url, Some(false));

        let json = serde_json::to_value(&items[0]).unwrap();
        assert!(json.get("cloud_url").is_none());
        assert_eq!(json["mode"], "cloud");
    }
}
