//! Multi-source import pipeline
//!
//! Clinical and administrative systems hand over their data as spreadsheet
//! exports (real workbooks or HTML tables saved as `.xls`) and as large
//! delimited dumps. This module turns any of them into canonical records:
//!
//! 1. [`sniff`] the container format and decode it ([`html`], [`workbook`],
//!    or [`streaming`] for delimited bodies)
//! 2. [`header`]: find the data table and map columns to fields
//! 3. [`transform`] each row and [`dedup`] by natural key
//! 4. [`reference`]: validate codes against reference tables
//! 5. [`loader`]: merge in chunks under the [`priority`] table
//! 6. [`reconcile`]: retire rows that left the feed
//! 7. [`report`]: compile CSV reports into the result
//!
//! [`pipeline::ImportPipeline`] runs the whole sequence and records every run
//! in the import [`history`].

pub mod dedup;
pub mod document;
pub mod error;
pub mod header;
pub mod history;
pub mod html;
pub mod loader;
pub mod memory;
pub mod pipeline;
pub mod priority;
pub mod progress;
pub mod reconcile;
pub mod reference;
pub mod report;
pub mod sniff;
pub mod sources;
pub mod store;
pub mod streaming;
pub mod transform;
pub mod workbook;

pub use error::{ImportError, Result, StoreError};
pub use history::{ImportHistoryRecord, RunContext};
pub use pipeline::ImportPipeline;
pub use priority::PriorityTable;
pub use progress::{ChannelProgress, NoopProgress, ProgressSink, TracingProgress};
pub use sources::{SourceCatalog, SourceSpec};
