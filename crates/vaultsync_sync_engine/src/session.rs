//! Per-user sync session.
//!
//! A [`SyncSession`] owns every component for one signed-in (or anonymous)
//! user: the persistence queue, the upload coalescer, the tombstone set,
//! the pagination cursor and the event bus. Nothing is process-global, so
//! two sessions never share queues.
//!
//! ## Data flow
//!
//! ```text
//! save ─▶ PersistenceManager ─▶ store ─▶ UploadCoalescer ─▶ encode ─▶ push ─▶ mark_synced
//! load_more ─▶ fetch_page ─▶ decode ─▶ merge ─▶ apply_remote ─▶ store ─▶ RecordsChanged
//! ```

use crate::clock::{Clock, SystemClock};
use crate::coalescer::UploadCoalescer;
use crate::config::SyncConfig;
use crate::cursor::PaginationCursor;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::merge::{self, MergeDecision};
use crate::persistence::PersistenceManager;
use crate::tombstones::TombstoneTracker;
use crate::transport::RemoteTransport;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use vaultsync_codec::{encode, EncryptionKey};
use vaultsync_storage::{Record, RecordId, RecordStore};
use vaultsync_sync_protocol::{PageRequest, PageResponse, PushRequest};

type SharedKey = Arc<RwLock<Arc<EncryptionKey>>>;

/// Outcome of merging one remote page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSummary {
    /// Records on the page that decoded cleanly.
    pub received: usize,
    /// Remote copies written locally.
    pub applied: usize,
    /// Remote copies ignored because the local copy has unsent changes.
    pub kept_local: usize,
    /// Local copies removed because the remote store deleted them.
    pub removed: usize,
    /// Damaged blobs skipped.
    pub skipped: usize,
    /// Blobs that failed authentication under the session key.
    pub key_failures: usize,
    /// Whether another page is available.
    pub has_more: bool,
}

/// Outcome of a full resync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Pages fetched.
    pub pages: usize,
    /// Remote copies written locally.
    pub applied: usize,
    /// Local copies removed (remote deletions and pruning).
    pub removed: usize,
    /// Pending records queued for upload.
    pub requeued: usize,
    /// Damaged blobs skipped.
    pub skipped: usize,
    /// Blobs that failed authentication under the session key.
    pub key_failures: usize,
}

impl SyncSummary {
    fn add_page(&mut self, page: &PageSummary) {
        self.pages += 1;
        self.applied += page.applied;
        self.removed += page.removed;
        self.skipped += page.skipped;
        self.key_failures += page.key_failures;
    }
}

#[derive(Debug)]
enum BackgroundCommand {
    SyncNow,
    Stop,
}

struct BackgroundSync {
    sender: mpsc::Sender<BackgroundCommand>,
    task: JoinHandle<()>,
}

struct SessionInner {
    config: SyncConfig,
    store: Arc<dyn RecordStore>,
    persistence: Arc<PersistenceManager>,
    coalescer: Arc<UploadCoalescer>,
    tombstones: Arc<TombstoneTracker>,
    cursor: Mutex<PaginationCursor>,
    transport: Arc<dyn RemoteTransport>,
    key: SharedKey,
    events: EventBus,
    clock: Arc<dyn Clock>,
    background: Mutex<Option<BackgroundSync>>,
}

/// One user's sync session.
///
/// Cheap to clone; clones share the session. Must be used from within a
/// tokio runtime.
#[derive(Clone)]
pub struct SyncSession {
    inner: Arc<SessionInner>,
}

impl SyncSession {
    /// Opens a session over `store` and `transport`, sealing with `key`.
    pub fn open(
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn RemoteTransport>,
        key: EncryptionKey,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        Self::open_with_clock(store, transport, key, config, Arc::new(SystemClock))
    }

    /// Opens a session with an explicit clock.
    pub fn open_with_clock(
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn RemoteTransport>,
        key: EncryptionKey,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        let tombstones = Arc::new(TombstoneTracker::load(Arc::clone(&store))?);
        let events = EventBus::new(config.event_capacity);
        let key: SharedKey = Arc::new(RwLock::new(Arc::new(key)));

        let mut cursor = PaginationCursor::new(config.page_size);
        cursor.invalidate_for(config.auth_context.as_deref());

        let persistence =
            Arc::new(PersistenceManager::new(Arc::clone(&store)).with_clock(Arc::clone(&clock)));
        let uploader = Uploader {
            persistence: Arc::downgrade(&persistence),
            transport: Arc::clone(&transport),
            key: Arc::clone(&key),
            events: events.clone(),
        };
        let coalescer = Arc::new(
            UploadCoalescer::new(move |id| uploader.clone().upload(id))
                .with_retry(config.retry.clone())
                .with_clock(Arc::clone(&clock))
                .with_events(events.clone()),
        );
        persistence.attach_scheduler(coalescer.clone());
        persistence.attach_tombstones(Arc::clone(&tombstones));

        info!(
            durable = store.is_durable(),
            tombstones = tombstones.len(),
            page_size = config.page_size,
            "sync session opened"
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                store,
                persistence,
                coalescer,
                tombstones,
                cursor: Mutex::new(cursor),
                transport,
                key,
                events,
                clock,
                background: Mutex::new(None),
            }),
        })
    }

    /// Saves a record locally and, unless `skip_remote_sync` is set,
    /// schedules its upload. Returns the record as written.
    pub async fn save(&self, record: Record, skip_remote_sync: bool) -> SyncResult<Record> {
        let saved = self.inner.persistence.save(record, skip_remote_sync).await?;
        self.inner.events.emit(SyncEvent::RecordsChanged);
        Ok(saved)
    }

    /// Creates and stores a blank placeholder record.
    pub async fn create_record(&self) -> SyncResult<Record> {
        let record = Record::blank(self.inner.clock.now_millis());
        self.save(record, true).await
    }

    /// Deletes a record everywhere and tombstones its ID.
    ///
    /// The remote delete is best effort; the tombstone keeps the record
    /// from coming back through sync either way. Returns true if a local
    /// copy existed.
    pub async fn delete(&self, id: &RecordId) -> SyncResult<bool> {
        self.inner.tombstones.add(id)?;
        let existed = self.inner.persistence.delete(id).await?;
        self.inner.events.emit(SyncEvent::RecordsChanged);

        // An upload already in flight must land before the remote delete.
        self.inner.coalescer.wait_for_upload(id).await;
        if let Err(e) = self.inner.transport.delete(id.as_str()).await {
            warn!(record_id = %id, error = %e, "remote delete failed");
        }
        Ok(existed)
    }

    /// Local records in display order, without tombstoned IDs.
    pub async fn records(&self) -> SyncResult<Vec<Record>> {
        let tombstones = self.inner.tombstones.ids();
        let mut records: Vec<Record> = self
            .inner
            .persistence
            .load_all()
            .await?
            .into_iter()
            .filter(|r| !tombstones.contains(&r.id))
            .collect();
        merge::sort_records(&mut records);
        Ok(records)
    }

    /// Reads one local record.
    pub async fn record(&self, id: &RecordId) -> SyncResult<Option<Record>> {
        if self.inner.tombstones.contains(id) {
            return Ok(None);
        }
        self.inner.persistence.load(id).await
    }

    /// Resets pagination to the first page. Local records are kept.
    pub fn initialize(&self) {
        self.inner.cursor.lock().initialize();
        debug!("pagination reset");
    }

    /// Whether [`load_more`](Self::load_more) may return another page.
    pub fn has_more(&self) -> bool {
        self.inner.cursor.lock().has_more()
    }

    /// Fetches and merges the next remote page.
    ///
    /// Returns `Ok(None)` if every page was loaded or a load is already in
    /// flight. On failure the cursor is rolled back so a retry refetches
    /// the same page.
    pub async fn load_more(&self) -> SyncResult<Option<PageSummary>> {
        let (request, snapshot) = {
            let mut cursor = self.inner.cursor.lock();
            let snapshot = cursor.snapshot();
            match cursor.begin() {
                Some(request) => (request, snapshot),
                None => return Ok(None),
            }
        };

        match self.fetch_and_apply(request).await {
            Ok(applied) => {
                self.inner
                    .cursor
                    .lock()
                    .advance(&snapshot, applied.next_token);
                self.inner.events.emit(SyncEvent::PageLoaded {
                    records: applied.summary.received,
                    has_more: applied.summary.has_more,
                });
                self.inner.events.emit(SyncEvent::RecordsChanged);
                info!(
                    received = applied.summary.received,
                    applied = applied.summary.applied,
                    has_more = applied.summary.has_more,
                    "page loaded"
                );
                Ok(Some(applied.summary))
            }
            Err(e) => {
                self.inner.cursor.lock().rollback(snapshot);
                warn!(error = %e, "page load failed");
                Err(e)
            }
        }
    }

    /// Full resync: walks every remote page, removes local records the
    /// remote store no longer has (signed-in sessions only), and queues
    /// uploads for records with unsent changes.
    ///
    /// Uses its own cursor, so interactive pagination is unaffected.
    pub async fn sync_all(&self) -> SyncResult<SyncSummary> {
        let started_at = self.inner.clock.now_millis();
        let tombstones = self.inner.tombstones.ids();
        let before = self.inner.persistence.load_all().await?;
        let pending_at_start: HashSet<RecordId> = before
            .iter()
            .filter(|r| r.pending)
            .map(|r| r.id.clone())
            .collect();

        let mut summary = SyncSummary::default();
        let mut remote_ids = HashSet::new();
        let mut cursor = PaginationCursor::new(self.inner.config.page_size);
        loop {
            let snapshot = cursor.snapshot();
            let Some(request) = cursor.begin() else {
                break;
            };
            let applied = self.fetch_and_apply(request).await?;
            summary.add_page(&applied.summary);
            remote_ids.extend(applied.page_ids);
            cursor.advance(&snapshot, applied.next_token);
        }

        let signed_in = self.inner.cursor.lock().auth_context().is_some();
        if signed_in {
            let local = self.inner.persistence.load_all().await?;
            // Records that changed while the walk ran may be missing from
            // pages fetched before they were uploaded.
            let prunable = merge::prune_missing(&local, &remote_ids)
                .into_iter()
                .filter(|id| !pending_at_start.contains(id))
                .filter(|id| {
                    local
                        .iter()
                        .find(|r| &r.id == id)
                        .is_some_and(|r| r.updated_at < started_at)
                });
            for id in prunable {
                if self.inner.persistence.delete_if_synced(&id).await? {
                    debug!(record_id = %id, "pruned record missing remotely");
                    summary.removed += 1;
                }
            }
        }

        for record in self.inner.persistence.load_all().await? {
            if record.pending && !record.is_blank && !tombstones.contains(&record.id) {
                self.inner.coalescer.enqueue(record.id);
                summary.requeued += 1;
            }
        }

        self.inner.events.emit(SyncEvent::RecordsChanged);
        info!(
            pages = summary.pages,
            applied = summary.applied,
            removed = summary.removed,
            requeued = summary.requeued,
            "full sync complete"
        );
        Ok(summary)
    }

    /// Scopes pagination to a new identity. Returns true if it changed.
    pub fn set_auth_context(&self, auth_context: Option<String>) -> bool {
        let changed = self
            .inner
            .cursor
            .lock()
            .invalidate_for(auth_context.as_deref());
        if changed {
            debug!("auth context changed, pagination reset");
        }
        changed
    }

    /// Replaces the session key, for example after the user imports the
    /// right one following a [`SyncEvent::KeyMismatch`].
    ///
    /// Pagination restarts so records that failed to open are fetched
    /// again.
    pub fn set_key(&self, key: EncryptionKey) {
        *self.inner.key.write() = Arc::new(key);
        self.inner.cursor.lock().initialize();
        info!("session key replaced");
    }

    /// Ends the signed-in state: drops queued uploads, clears local
    /// records and tombstones, and resets pagination.
    pub async fn sign_out(&self) -> SyncResult<()> {
        self.stop_background_sync().await;
        self.inner.coalescer.clear();
        self.inner.tombstones.clear()?;
        let store = Arc::clone(&self.inner.store);
        tokio::task::spawn_blocking(move || store.clear())
            .await
            .map_err(|_| SyncError::Cancelled)??;
        self.inner.cursor.lock().invalidate_for(None);
        self.inner.events.emit(SyncEvent::RecordsChanged);
        info!("signed out, local records cleared");
        Ok(())
    }

    /// Subscribes to session events. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// IDs with pending or in-progress uploads.
    pub fn pending_uploads(&self) -> HashSet<RecordId> {
        self.inner.coalescer.pending_ids()
    }

    /// Waits until no upload is pending.
    pub async fn wait_for_uploads(&self) {
        self.inner.coalescer.wait_for_all().await;
    }

    /// Returns true if local records survive a restart.
    pub fn is_durable(&self) -> bool {
        self.inner.store.is_durable()
    }

    /// Starts periodic full syncs at the configured interval.
    ///
    /// Returns false if no interval is configured or background sync is
    /// already running. Failures are logged and retried on the next tick.
    pub fn start_background_sync(&self) -> bool {
        let Some(period) = self.inner.config.sync_interval else {
            return false;
        };
        let mut background = self.inner.background.lock();
        if background.is_some() {
            return false;
        }

        let (sender, receiver) = mpsc::channel(8);
        let task = tokio::spawn(run_background(
            Arc::downgrade(&self.inner),
            period,
            receiver,
        ));
        *background = Some(BackgroundSync { sender, task });
        info!(interval_ms = period.as_millis() as u64, "background sync started");
        true
    }

    /// Asks the background worker for an immediate sync.
    ///
    /// Returns false if background sync is not running.
    pub fn sync_now(&self) -> bool {
        self.inner
            .background
            .lock()
            .as_ref()
            .is_some_and(|bg| bg.sender.try_send(BackgroundCommand::SyncNow).is_ok())
    }

    /// Stops background sync and waits for the worker to exit.
    pub async fn stop_background_sync(&self) {
        let background = self.inner.background.lock().take();
        if let Some(background) = background {
            let _ = background.sender.send(BackgroundCommand::Stop).await;
            let _ = background.task.await;
        }
    }

    /// Graceful teardown: stops background sync, lets queued uploads
    /// finish, then drops all upload state.
    pub async fn shutdown(&self) {
        self.stop_background_sync().await;
        self.inner.coalescer.wait_for_all().await;
        self.inner.coalescer.clear();
        info!("sync session shut down");
    }

    async fn fetch_and_apply(&self, request: PageRequest) -> SyncResult<AppliedPage> {
        let page = self.inner.transport.fetch_page(request).await?;
        self.apply_page(page).await
    }

    async fn apply_page(&self, page: PageResponse) -> SyncResult<AppliedPage> {
        let page_ids: Vec<RecordId> = page
            .records
            .iter()
            .map(|r| RecordId::from(r.id.as_str()))
            .collect();

        let key = Arc::clone(&self.inner.key.read());
        let decoded = merge::decode_page(page, &key);
        if decoded.key_failures > 0 {
            self.inner.events.emit(SyncEvent::KeyMismatch {
                count: decoded.key_failures,
            });
        }

        let mut summary = PageSummary {
            received: decoded.records.len(),
            skipped: decoded.skipped,
            key_failures: decoded.key_failures,
            has_more: decoded.next_token.is_some(),
            ..PageSummary::default()
        };

        let local = self.inner.persistence.load_all().await?;
        for id in merge::remote_deletions(&local, &decoded.deleted_ids) {
            if self.inner.persistence.delete_if_synced(&id).await? {
                summary.removed += 1;
            }
        }

        let tombstones = self.inner.tombstones.ids();
        let merged = merge::merge_records(&decoded.records, &local, &tombstones);
        let local_by_id: HashMap<&RecordId, &Record> = local.iter().map(|r| (&r.id, r)).collect();
        let on_page: HashSet<&RecordId> = decoded.records.iter().map(|r| &r.id).collect();

        for record in merged {
            if !on_page.contains(&record.id) {
                continue;
            }
            if let Some(existing) = local_by_id.get(&record.id) {
                if **existing == record {
                    if existing.pending {
                        summary.kept_local += 1;
                    }
                    continue;
                }
            }
            match self.inner.persistence.apply_remote(record).await? {
                MergeDecision::TakeRemote => summary.applied += 1,
                MergeDecision::KeepLocal => summary.kept_local += 1,
                MergeDecision::Tombstoned => {}
            }
        }

        Ok(AppliedPage {
            summary,
            next_token: decoded.next_token,
            page_ids,
        })
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("config", &self.inner.config)
            .field("persistence", &self.inner.persistence)
            .field("coalescer", &self.inner.coalescer)
            .field("tombstones", &self.inner.tombstones)
            .finish()
    }
}

struct AppliedPage {
    summary: PageSummary,
    next_token: Option<String>,
    page_ids: Vec<RecordId>,
}

async fn run_background(
    session: Weak<SessionInner>,
    period: Duration,
    mut commands: mpsc::Receiver<BackgroundCommand>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(BackgroundCommand::SyncNow) => {}
                Some(BackgroundCommand::Stop) | None => break,
            },
            _ = ticker.tick() => {}
        }

        let Some(inner) = session.upgrade() else {
            break;
        };
        match (SyncSession { inner }).sync_all().await {
            Ok(summary) => debug!(?summary, "background sync complete"),
            Err(e) => warn!(error = %e, "background sync failed"),
        }
    }

    info!("background sync stopped");
}

/// Pushes the latest stored copy of a record.
#[derive(Clone)]
struct Uploader {
    persistence: Weak<PersistenceManager>,
    transport: Arc<dyn RemoteTransport>,
    key: SharedKey,
    events: EventBus,
}

impl Uploader {
    async fn upload(self, id: RecordId) -> SyncResult<()> {
        let persistence = self.persistence.upgrade().ok_or(SyncError::Cancelled)?;

        let Some(mut record) = persistence.load(&id).await? else {
            debug!(record_id = %id, "record deleted before upload");
            return Ok(());
        };
        if record.is_blank || !record.pending {
            return Ok(());
        }

        let uploaded_at = record.updated_at;
        record.pending = false;
        let key = Arc::clone(&self.key.read());
        let blob = encode(&record, &key)?;

        let ack = self
            .transport
            .push(PushRequest::new(id.as_str(), blob, uploaded_at))
            .await?;
        persistence
            .mark_synced(&id, uploaded_at, ack.version)
            .await?;

        info!(record_id = %id, version = ack.version, "record uploaded");
        self.events.emit(SyncEvent::Uploaded {
            id,
            version: ack.version,
        });
        Ok(())
    }
}
