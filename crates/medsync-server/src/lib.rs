//! Medsync Server Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Imports clinical and administrative extracts into canonical records.
//!
//! # Overview
//!
//! - **Ingest**: the source-agnostic import pipeline ([`ingest`])
//! - **Database**: Postgres implementations of the pipeline's stores ([`db`])
//! - **API**: axum routes for uploads, cloud syncs, history and the catalogue
//! - **Configuration**: environment-based, validated at startup
//!
//! # Architecture
//!
//! The pipeline talks to storage only through the `RecordStore`,
//! `ReferenceStore` and `HistoryStore` traits. The server wires the Postgres
//! implementations in; tests use the in-memory ones from `ingest::memory`.
//!
//! HTTP handlers follow the vertical-slice layout under [`features`]: a
//! command or query struct with `validate()` and a free `handle` function.
//!
//! # Example
//!
//! ```no_run
//! use medsync_server::{api, config::Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     api::serve(config).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;

pub use error::{ApiResult, AppError};
