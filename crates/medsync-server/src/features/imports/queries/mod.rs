pub mod history;
pub mod sources;

pub use history::{ImportHistoryError, ImportHistoryQuery};
pub use sources::{ListSourcesQuery, SourceListItem};
