//! Error types for the import pipeline
//!
//! Only structural failures leave the pipeline as `ImportError`. Row-level
//! problems are counted into `ImportResult` and chunk-level backend failures
//! (`StoreError`) are caught per chunk by the validator and the loader.

use thiserror::Error;

use super::progress::RunPhase;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, ImportError>;

/// Structural failures that abort a run before any row loads
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("File is empty")]
    EmptyFile,

    #[error("Unrecognized file format: {0}")]
    Format(String),

    #[error("No table with the expected headers ({expected}) was found")]
    HeaderNotFound { expected: String },

    #[error("Required column '{0}' could not be matched to any header")]
    MissingColumn(String),

    #[error("Unknown import source: {0}")]
    UnknownSource(String),

    #[error("Import source '{0}' is disabled")]
    SourceDisabled(String),

    #[error("Import source '{source_id}' does not accept {mode} imports")]
    WrongMode { source_id: String, mode: &'static str },

    #[error("Import source '{0}' has no cloud URL configured")]
    NoCloudUrl(String),

    #[error("Import was cancelled")]
    Cancelled,

    #[error("Illegal run transition from {from:?} to {to:?}")]
    IllegalTransition { from: RunPhase, to: RunPhase },

    #[error("Read error: {0}")]
    Read(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl ImportError {
    /// Short machine-readable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::EmptyFile => "EMPTY_FILE",
            ImportError::Format(_) => "FORMAT_ERROR",
            ImportError::HeaderNotFound { .. } => "HEADER_NOT_FOUND",
            ImportError::MissingColumn(_) => "MISSING_COLUMN",
            ImportError::UnknownSource(_) => "UNKNOWN_SOURCE",
            ImportError::SourceDisabled(_) => "SOURCE_DISABLED",
            ImportError::WrongMode { .. } => "WRONG_MODE",
            ImportError::NoCloudUrl(_) => "NO_CLOUD_URL",
            ImportError::Cancelled => "CANCELLED",
            ImportError::IllegalTransition { .. } => "INTERNAL_ERROR",
            ImportError::Read(_) => "READ_ERROR",
            ImportError::Store(_) => "STORE_ERROR",
        }
    }
}

/// A single backend round trip failed
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}
