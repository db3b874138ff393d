//! In-memory session store.

use crate::error::StorageResult;
use crate::record::{Record, RecordId};
use crate::store::RecordStore;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// A session-only record store.
///
/// Used when durability is not requested, when the durable store cannot
/// be opened, and in tests. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct SessionStore {
    records: RwLock<BTreeMap<RecordId, Record>>,
    meta: RwLock<HashMap<String, Vec<u8>>>,
}

impl SessionStore {
    /// Creates an empty session store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session store holding `records`.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.write();
            for record in records {
                map.insert(record.id.clone(), record);
            }
        }
        store
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl RecordStore for SessionStore {
    fn get(&self, id: &RecordId) -> StorageResult<Option<Record>> {
        Ok(self.records.read().get(id).cloned())
    }

    fn put(&self, record: &Record) -> StorageResult<()> {
        self.records
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, id: &RecordId) -> StorageResult<bool> {
        Ok(self.records.write().remove(id).is_some())
    }

    fn list(&self) -> StorageResult<Vec<Record>> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn get_meta(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.meta.read().get(key).cloned())
    }

    fn put_meta(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.meta.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete_meta(&self, key: &str) -> StorageResult<()> {
        self.meta.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.records.write().clear();
        self.meta.write().clear();
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}
