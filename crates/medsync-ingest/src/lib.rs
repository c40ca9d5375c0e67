//! Medsync Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Client side of the Medsync import API: uploads files, triggers cloud
//! sources and follows their NDJSON progress stream.
//!
//! # Example
//!
//! ```no_run
//! use medsync_ingest::client::ImportClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ImportClient::new("http://127.0.0.1:8000")?;
//!     let result = client
//!         .sync("roster_federal", |event| println!("{} {:?}", event.status, event.pct))
//!         .await?;
//!     println!("{} rows imported", result.success);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod output;

pub use client::{ClientError, ClientResult, ImportClient};
