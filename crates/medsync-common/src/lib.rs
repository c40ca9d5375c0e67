//! Medsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Medsync workspace.
//!
//! # Overview
//!
//! - **Error Handling**: `MedsyncError` and the `Result` alias
//! - **Logging**: tracing subscriber setup shared by the server and the CLI
//! - **Types**: the import wire contract (`ImportResult`, progress events, NDJSON frames)
//! - **NDJSON**: incremental line framing for streamed progress responses
//! - **Checksums**: SHA-256 fingerprints recorded in the import history
//!
//! # Example
//!
//! ```no_run
//! use medsync_common::ndjson::NdjsonDecoder;
//! use medsync_common::types::StreamFrame;
//!
//! let mut decoder = NdjsonDecoder::new();
//! for frame in decoder.push(b"{\"status\":\"Leyendo\",\"pct\":5}\n").unwrap_or_default() {
//!     if let StreamFrame::Progress(event) = frame {
//!         println!("{} {:?}", event.status, event.pct);
//!     }
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod ndjson;
pub mod text;
pub mod types;

// Re-export commonly used types
pub use error::{MedsyncError, Result};
pub use types::{ImportResult, ProgressEvent, StreamFrame};
