//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored value could not be decoded.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A value could not be encoded for storage.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Another process holds the store lock.
    #[error("store is locked by another process: {}", .0.display())]
    Locked(PathBuf),

    /// The store was written by a newer schema.
    #[error("unsupported store schema version {found} (this build supports up to {supported})")]
    UnsupportedVersion {
        /// Version found in the manifest.
        found: u16,
        /// Highest version this build understands.
        supported: u16,
    },
}
