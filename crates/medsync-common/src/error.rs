//! Error types for Medsync

use thiserror::Error;

/// Result type alias for Medsync operations
pub type Result<T> = std::result::Result<T, MedsyncError>;

/// Main error type shared across the workspace
#[derive(Error, Debug)]
pub enum MedsyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server reported an error frame and aborted the import
    #[error("Import aborted by server: {0}")]
    RemoteAbort(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
