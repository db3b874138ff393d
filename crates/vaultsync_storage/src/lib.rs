//! # VaultSync Storage
//!
//! Record model and local stores for VaultSync.
//!
//! Local storage is the plaintext side of the system: records are kept
//! unencrypted on the device, and encryption is applied only when a
//! record crosses the remote boundary.
//!
//! ## Available stores
//!
//! - [`FileStore`] - durable, versioned, one file per record
//! - [`SessionStore`] - in-memory, for sessions that did not ask for
//!   durability or could not open the durable store
//!
//! ## Example
//!
//! ```rust
//! use vaultsync_storage::{Record, RecordStore, SessionStore};
//!
//! let store = SessionStore::new();
//! store.put(&Record::new("c1", "Groceries", 0)).unwrap();
//! assert_eq!(store.list().unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod record;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::{FileStore, SCHEMA_VERSION, STORE_MAGIC};
pub use memory::SessionStore;
pub use record::{AttachmentRef, Entry, Record, RecordId, Role};
pub use store::RecordStore;

use std::path::PathBuf;
use std::sync::Arc;

/// Whether a session asked for records to outlive the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Durability {
    /// Persist under this directory.
    Durable(PathBuf),
    /// Keep records in memory only.
    Session,
}

/// Opens the store matching `durability`.
///
/// # Errors
///
/// Returns the durable store's open error unchanged.
pub fn open_store(durability: &Durability) -> StorageResult<Arc<dyn RecordStore>> {
    match durability {
        Durability::Durable(path) => Ok(Arc::new(FileStore::open(path)?)),
        Durability::Session => Ok(Arc::new(SessionStore::new())),
    }
}

/// Opens the durable store, degrading to a session store on failure.
///
/// Returns the store together with the error that forced the fallback, so
/// callers can tell the user that history will not be kept.
pub fn open_or_degrade(path: PathBuf) -> (Arc<dyn RecordStore>, Option<StorageError>) {
    match FileStore::open(&path) {
        Ok(store) => (Arc::new(store), None),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "durable store unavailable, using session-only storage"
            );
            (Arc::new(SessionStore::new()), Some(e))
        }
    }
}
