//! Import feature: file uploads, cloud syncs, history and the source catalogue

pub mod commands;
pub mod queries;
pub mod routes;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_MAX_UPLOAD_BYTES;
use crate::ingest::{ImportPipeline, SourceCatalog};

pub use commands::{
    SyncImportCommand, SyncImportError, UploadImportCommand, UploadImportError,
};
pub use queries::{
    ImportHistoryError, ImportHistoryQuery, ListSourcesQuery, SourceListItem,
};
pub use routes::imports_routes;

/// One async mutex per source id
///
/// Runs for the same source are serialised; different sources proceed in
/// parallel.
#[derive(Clone, Default)]
pub struct SourceLocks {
    locks: Arc<HashMap<String, Arc<Mutex<()>>>>,
}

impl SourceLocks {
    pub fn for_catalog(catalog: &SourceCatalog) -> Self {
        let locks = catalog
            .iter()
            .map(|spec| (spec.id.to_string(), Arc::new(Mutex::new(()))))
            .collect();
        Self {
            locks: Arc::new(locks),
        }
    }

    /// Wait for exclusive use of `source`; unknown ids get no lock
    pub async fn acquire(&self, source: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = self.locks.get(source)?.clone();
        if lock.try_lock().is_err() {
            tracing::info!(source, "Waiting for the running import of this source");
        }
        Some(lock.lock_owned().await)
    }
}

/// Everything the import handlers need
#[derive(Clone)]
pub struct ImportState {
    pub pipeline: ImportPipeline,
    pub catalog: Arc<SourceCatalog>,
    pub locks: SourceLocks,
    pub http: reqwest::Client,
    pub max_upload_bytes: usize,
    /// Cancelled on server shutdown; each run uses a child token
    pub shutdown: CancellationToken,
}

impl ImportState {
    pub fn new(pipeline: ImportPipeline, catalog: SourceCatalog, http: reqwest::Client) -> Self {
        Self {
            pipeline,
            locks: SourceLocks::for_catalog(&catalog),
            catalog: Arc::new(catalog),
            http,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}
