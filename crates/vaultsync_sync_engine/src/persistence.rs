//! Ordered local writes per record.
//!
//! Each write takes a ticket for its record ID at call time and runs as a
//! spawned task that waits for its turn. Writes to one ID therefore execute
//! strictly in submission order and never interleave, writes to different
//! IDs run concurrently, and a caller that drops its future cannot stall
//! the writes queued behind it. A failed write still hands the turn on.

use crate::clock::{Clock, SystemClock};
use crate::coalescer::UploadScheduler;
use crate::error::{SyncError, SyncResult};
use crate::merge::{self, MergeDecision};
use crate::tombstones::TombstoneTracker;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use vaultsync_storage::{Record, RecordId, RecordStore, StorageResult};

struct Lane {
    next_ticket: u64,
    outstanding: usize,
    serving: watch::Sender<u64>,
    abandoned: BTreeSet<u64>,
}

struct Shared {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    scheduler: OnceLock<Arc<dyn UploadScheduler>>,
    tombstones: OnceLock<Arc<TombstoneTracker>>,
    lanes: Mutex<HashMap<RecordId, Lane>>,
}

/// Serializes writes per record ID and schedules uploads after them.
///
/// Must be used from within a tokio runtime.
pub struct PersistenceManager {
    shared: Arc<Shared>,
}

impl PersistenceManager {
    /// Creates a manager over `store` using the system clock.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                clock: Arc::new(SystemClock),
                scheduler: OnceLock::new(),
                tombstones: OnceLock::new(),
                lanes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Sets the clock used to stamp `updated_at`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.clock = clock;
        }
        self
    }

    /// Sets where uploads are scheduled after a save.
    ///
    /// Only the first scheduler attached is used; returns false if one was
    /// already attached.
    pub fn attach_scheduler(&self, scheduler: Arc<dyn UploadScheduler>) -> bool {
        self.shared.scheduler.set(scheduler).is_ok()
    }

    /// Sets the tombstone set consulted before writing remote copies.
    ///
    /// Returns false if one was already attached.
    pub fn attach_tombstones(&self, tombstones: Arc<TombstoneTracker>) -> bool {
        self.shared.tombstones.set(tombstones).is_ok()
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.shared.store
    }

    /// Saves `record` after every earlier write to the same ID.
    ///
    /// Stamps `updated_at`, carries over the remote version from the stored
    /// copy, and unless `skip_remote_sync` is set or the record is blank,
    /// marks it pending and schedules an upload once it is durable.
    /// Returns the record as written.
    pub fn save(
        &self,
        record: Record,
        skip_remote_sync: bool,
    ) -> impl Future<Output = SyncResult<Record>> + Send + 'static {
        let id = record.id.clone();
        let handle = self.submit(id, move |turn| turn.write(record, skip_remote_sync));
        join(handle)
    }

    /// Writes a record received from the remote store, unless the local
    /// copy has unsent changes or the ID is tombstoned when its turn comes.
    pub fn apply_remote(
        &self,
        record: Record,
    ) -> impl Future<Output = SyncResult<MergeDecision>> + Send + 'static {
        let id = record.id.clone();
        let handle = self.submit(id, move |turn| turn.apply_remote(record));
        join(handle)
    }

    /// Records a remote acknowledgement of the version stamped `uploaded_at`.
    ///
    /// Clears `pending` only if nothing was saved since that version was
    /// sealed. Returns true if `pending` was cleared.
    pub fn mark_synced(
        &self,
        id: &RecordId,
        uploaded_at: u64,
        remote_version: u64,
    ) -> impl Future<Output = SyncResult<bool>> + Send + 'static {
        let handle = self.submit(id.clone(), move |turn| {
            turn.mark_synced(uploaded_at, remote_version)
        });
        join(handle)
    }

    /// Deletes the local copy. Returns true if it existed.
    pub fn delete(&self, id: &RecordId) -> impl Future<Output = SyncResult<bool>> + Send + 'static {
        let handle = self.submit(id.clone(), |turn| turn.delete(false));
        join(handle)
    }

    /// Deletes the local copy unless it has unsent changes.
    pub fn delete_if_synced(
        &self,
        id: &RecordId,
    ) -> impl Future<Output = SyncResult<bool>> + Send + 'static {
        let handle = self.submit(id.clone(), |turn| turn.delete(true));
        join(handle)
    }

    /// Reads the latest durable copy of one record.
    pub async fn load(&self, id: &RecordId) -> SyncResult<Option<Record>> {
        let id = id.clone();
        blocking(&self.shared.store, move |store| store.get(&id)).await
    }

    /// Reads every local record.
    pub async fn load_all(&self) -> SyncResult<Vec<Record>> {
        blocking(&self.shared.store, |store| store.list()).await
    }

    /// Number of record IDs with queued or running writes.
    pub fn queued_ids(&self) -> usize {
        self.shared.lanes.lock().len()
    }

    fn submit<T, F, Fut>(&self, id: RecordId, op: F) -> JoinHandle<SyncResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(Turn) -> Fut + Send + 'static,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        let (ticket, mut serving) = self.shared.take_ticket(&id);
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            let mut turn = Turn {
                shared,
                id,
                ticket,
                ran: false,
            };
            if serving.wait_for(|now| *now == ticket).await.is_err() {
                return Err(SyncError::Cancelled);
            }
            turn.ran = true;
            op(turn).await
        })
    }
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("queued_ids", &self.queued_ids())
            .field("durable", &self.shared.store.is_durable())
            .finish()
    }
}

impl Shared {
    fn take_ticket(&self, id: &RecordId) -> (u64, watch::Receiver<u64>) {
        let mut lanes = self.lanes.lock();
        let lane = lanes.entry(id.clone()).or_insert_with(|| Lane {
            next_ticket: 0,
            outstanding: 0,
            serving: watch::channel(0).0,
            abandoned: BTreeSet::new(),
        });
        let ticket = lane.next_ticket;
        lane.next_ticket += 1;
        lane.outstanding += 1;
        (ticket, lane.serving.subscribe())
    }

    fn finish(&self, id: &RecordId, ticket: u64, ran: bool) {
        let mut lanes = self.lanes.lock();
        let Some(lane) = lanes.get_mut(id) else {
            return;
        };
        lane.outstanding -= 1;
        if lane.outstanding == 0 {
            lanes.remove(id);
            return;
        }

        // A ticket dropped before its turn is skipped when the turn arrives.
        if !ran && *lane.serving.borrow() != ticket {
            lane.abandoned.insert(ticket);
            return;
        }
        let mut next = ticket + 1;
        while lane.abandoned.remove(&next) {
            next += 1;
        }
        lane.serving.send_replace(next);
    }
}

/// A queued write to one record ID. The turn is handed on when this is
/// dropped, so failed, panicking and aborted writes release it too.
struct Turn {
    shared: Arc<Shared>,
    id: RecordId,
    ticket: u64,
    ran: bool,
}

impl Drop for Turn {
    fn drop(&mut self) {
        self.shared.finish(&self.id, self.ticket, self.ran);
    }
}

impl Turn {
    async fn get(&self) -> SyncResult<Option<Record>> {
        let id = self.id.clone();
        blocking(&self.shared.store, move |store| store.get(&id)).await
    }

    async fn put(&self, record: Record) -> SyncResult<Record> {
        blocking(&self.shared.store, move |store| {
            store.put(&record)?;
            Ok(record)
        })
        .await
    }

    async fn write(self, mut record: Record, skip_remote_sync: bool) -> SyncResult<Record> {
        let previous = self.get().await?;

        // Strictly increasing per record, so an acknowledgement can tell
        // whether it covers the latest save.
        let floor = previous.as_ref().map_or(0, |p| p.updated_at.saturating_add(1));
        record.updated_at = self.shared.clock.now_millis().max(floor);
        if record.remote_version.is_none() {
            record.remote_version = previous.as_ref().and_then(|p| p.remote_version);
        }

        let upload = !skip_remote_sync && !record.is_blank;
        if upload {
            record.pending = true;
        }

        let record = self.put(record).await?;
        debug!(record_id = %record.id, updated_at = record.updated_at, upload, "record saved");

        if upload {
            if let Some(scheduler) = self.shared.scheduler.get() {
                scheduler.schedule(&record.id);
            }
        }
        Ok(record)
    }

    async fn apply_remote(self, mut remote: Record) -> SyncResult<MergeDecision> {
        // Checked inside the turn: a delete tombstones before queueing.
        if let Some(tombstones) = self.shared.tombstones.get() {
            if tombstones.contains(&self.id) {
                debug!(record_id = %self.id, "remote copy dropped, record deleted locally");
                return Ok(MergeDecision::Tombstoned);
            }
        }

        let local = self.get().await?;
        let decision = merge::resolve(local.as_ref(), &remote);
        match decision {
            MergeDecision::TakeRemote => {
                remote.pending = false;
                self.put(remote).await?;
            }
            MergeDecision::KeepLocal => {
                debug!(record_id = %self.id, "remote copy ignored, local changes pending");
            }
            MergeDecision::Tombstoned => {}
        }
        Ok(decision)
    }

    async fn mark_synced(self, uploaded_at: u64, remote_version: u64) -> SyncResult<bool> {
        let Some(mut record) = self.get().await? else {
            return Ok(false);
        };
        record.remote_version = Some(remote_version);
        let cleared = record.updated_at == uploaded_at;
        if cleared {
            record.pending = false;
        }
        self.put(record).await?;
        Ok(cleared)
    }

    async fn delete(self, only_if_synced: bool) -> SyncResult<bool> {
        if only_if_synced {
            match self.get().await? {
                Some(record) if record.pending => return Ok(false),
                None => return Ok(false),
                Some(_) => {}
            }
        }
        let id = self.id.clone();
        blocking(&self.shared.store, move |store| store.delete(&id)).await
    }
}

async fn blocking<T, F>(store: &Arc<dyn RecordStore>, f: F) -> SyncResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn RecordStore) -> StorageResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    let result = tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|_| SyncError::Cancelled)?;
    Ok(result?)
}

async fn join<T>(handle: JoinHandle<SyncResult<T>>) -> SyncResult<T> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(SyncError::Cancelled),
    }
}
