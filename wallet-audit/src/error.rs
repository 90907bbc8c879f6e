//! Error types for the audit subsystem

use thiserror::Error;
use uuid::Uuid;

/// Result type for audit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Audit subsystem errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Error from the wallet ledger
    #[error("Ledger error: {0}")]
    Ledger(#[from] wallet_core::Error),

    /// Audit job not found
    #[error("Audit job not found: {0}")]
    JobNotFound(Uuid),

    /// Job is currently claimed by another worker
    #[error("Audit job {0} already claimed")]
    AlreadyClaimed(Uuid),

    /// Finding not found
    #[error("Finding not found: {0}")]
    FindingNotFound(Uuid),

    /// No snapshot exists for the wallet
    #[error("No snapshot for wallet {0}")]
    SnapshotNotFound(Uuid),

    /// Audit job execution exceeded its timeout
    #[error("Audit job {0} timed out")]
    JobTimeout(Uuid),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}
