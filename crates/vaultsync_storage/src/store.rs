//! Record store trait definition.

use crate::error::StorageResult;
use crate::record::{Record, RecordId};

/// A local store of plaintext records keyed by record ID.
///
/// Besides records, a store keeps a small metadata area of opaque byte
/// values (for example the tombstone set).
///
/// # Invariants
///
/// - `put` replaces any previous record with the same ID
/// - after `put` returns on a durable store, the record survives a restart
/// - `list` returns every stored record exactly once, in no particular order
/// - implementations must be `Send + Sync`; callers share them behind `Arc`
///
/// # Implementors
///
/// - [`super::FileStore`] - durable, versioned on-disk store
/// - [`super::SessionStore`] - in-memory, session-only store
pub trait RecordStore: Send + Sync {
    /// Reads one record.
    fn get(&self, id: &RecordId) -> StorageResult<Option<Record>>;

    /// Writes one record, replacing any previous version.
    fn put(&self, record: &Record) -> StorageResult<()>;

    /// Removes one record. Returns true if it existed.
    fn delete(&self, id: &RecordId) -> StorageResult<bool>;

    /// Reads every record.
    ///
    /// Entries that cannot be decoded are skipped and logged rather than
    /// failing the whole listing.
    fn list(&self) -> StorageResult<Vec<Record>>;

    /// Reads a metadata value.
    fn get_meta(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Writes a metadata value.
    fn put_meta(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes a metadata value. Missing keys are not an error.
    fn delete_meta(&self, key: &str) -> StorageResult<()>;

    /// Removes all records and metadata.
    fn clear(&self) -> StorageResult<()>;

    /// Returns true if writes survive process termination.
    fn is_durable(&self) -> bool;
}
