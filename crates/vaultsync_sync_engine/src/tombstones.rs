//! Locally deleted record IDs.

use crate::error::SyncResult;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::warn;
use vaultsync_storage::{RecordId, RecordStore};

/// Metadata key the tombstone set is stored under.
pub const TOMBSTONE_META_KEY: &str = "tombstones";

/// Set of record IDs deleted on this device.
///
/// A tombstoned ID is never re-created by sync until the set is cleared.
/// The set is written through to the store's metadata area on every change.
pub struct TombstoneTracker {
    store: Arc<dyn RecordStore>,
    ids: RwLock<BTreeSet<RecordId>>,
}

impl TombstoneTracker {
    /// Loads the persisted set from `store`.
    ///
    /// An unreadable set is logged and treated as empty.
    pub fn load(store: Arc<dyn RecordStore>) -> SyncResult<Self> {
        let ids = match store.get_meta(TOMBSTONE_META_KEY)? {
            Some(bytes) => match ciborium::from_reader::<Vec<RecordId>, _>(bytes.as_slice()) {
                Ok(ids) => ids.into_iter().collect(),
                Err(e) => {
                    warn!(error = %e, "tombstone set unreadable, starting empty");
                    BTreeSet::new()
                }
            },
            None => BTreeSet::new(),
        };
        Ok(Self {
            store,
            ids: RwLock::new(ids),
        })
    }

    /// Adds `id`. Returns true if it was not already present.
    ///
    /// The in-memory set changes only after the new set is persisted, so a
    /// failed write leaves both unchanged and the call can be retried.
    pub fn add(&self, id: &RecordId) -> SyncResult<bool> {
        let mut ids = self.ids.write();
        if ids.contains(id) {
            return Ok(false);
        }
        let mut next = ids.clone();
        next.insert(id.clone());
        self.persist(&next)?;
        *ids = next;
        Ok(true)
    }

    /// Removes `id`. Returns true if it was present.
    pub fn remove(&self, id: &RecordId) -> SyncResult<bool> {
        let mut ids = self.ids.write();
        if !ids.contains(id) {
            return Ok(false);
        }
        let mut next = ids.clone();
        next.remove(id);
        self.persist(&next)?;
        *ids = next;
        Ok(true)
    }

    /// Returns true if `id` is tombstoned.
    pub fn contains(&self, id: &RecordId) -> bool {
        self.ids.read().contains(id)
    }

    /// All tombstoned IDs.
    pub fn ids(&self) -> HashSet<RecordId> {
        self.ids.read().iter().cloned().collect()
    }

    /// Number of tombstoned IDs.
    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    /// Returns true if nothing is tombstoned.
    pub fn is_empty(&self) -> bool {
        self.ids.read().is_empty()
    }

    /// Forgets every tombstone.
    pub fn clear(&self) -> SyncResult<()> {
        let mut ids = self.ids.write();
        self.store.delete_meta(TOMBSTONE_META_KEY)?;
        ids.clear();
        Ok(())
    }

    fn persist(&self, ids: &BTreeSet<RecordId>) -> SyncResult<()> {
        let list: Vec<&RecordId> = ids.iter().collect();
        let mut bytes = Vec::new();
        ciborium::into_writer(&list, &mut bytes).map_err(|e| {
            vaultsync_storage::StorageError::Encoding(format!("tombstones: {e}"))
        })?;
        self.store.put_meta(TOMBSTONE_META_KEY, &bytes)?;
        Ok(())
    }
}

impl std::fmt::Debug for TombstoneTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TombstoneTracker")
            .field("len", &self.len())
            .finish()
    }
}
