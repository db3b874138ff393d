//! Per-record upload scheduling with coalescing and bounded retry.
//!
//! Every record ID is in one of two states:
//!
//! ```text
//! Idle ──enqueue──▶ Running ──loop exits with dirty = false──▶ Idle (state dropped)
//!                     │  ▲
//!                     └──┘ dirty re-set during a pass: run another pass
//! ```
//!
//! A running worker repeatedly clears `dirty` and uploads, so any number
//! of `enqueue` calls that land while an upload is in flight collapse into
//! a single follow-up upload. At most one worker exists per ID; workers for
//! different IDs run in parallel and share nothing but the state map.
//!
//! A failed upload is retried with exponential backoff. If a new `enqueue`
//! arrives while a retry delay is pending, the delay is abandoned and the
//! next pass uploads the fresh data instead of retrying stale data. When
//! retries are exhausted the failure is logged, reported as
//! [`SyncEvent::UploadFailed`] and the worker stops; only a new `enqueue`
//! starts another attempt.

use crate::clock::{Clock, SystemClock};
use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vaultsync_storage::RecordId;

/// Uploads the current state of one record.
pub type UploadFn = Arc<dyn Fn(RecordId) -> BoxFuture<'static, SyncResult<()>> + Send + Sync>;

/// Something that can be told a record needs pushing.
pub trait UploadScheduler: Send + Sync {
    /// Schedules an upload of `id`.
    fn schedule(&self, id: &RecordId);
}

struct QueueState {
    dirty: bool,
    uploading: bool,
    consecutive_failures: u32,
    generation: u64,
    wake: Arc<Notify>,
    done: watch::Receiver<()>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Shared {
    states: Mutex<HashMap<RecordId, QueueState>>,
    generations: AtomicU64,
}

/// Coalescing upload queue keyed by record ID.
///
/// Must be used from within a tokio runtime: `enqueue` spawns workers.
pub struct UploadCoalescer {
    shared: Arc<Shared>,
    upload: UploadFn,
    retry: RetryConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl UploadCoalescer {
    /// Creates a coalescer around `upload` with default retry settings.
    pub fn new<F, Fut>(upload: F) -> Self
    where
        F: Fn(RecordId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        Self {
            shared: Arc::new(Shared::default()),
            upload: Arc::new(move |id| Box::pin(upload(id))),
            retry: RetryConfig::default(),
            clock: Arc::new(SystemClock),
            events: EventBus::default(),
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the clock used for backoff delays.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the bus that receives give-up notices.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Marks `id` dirty and starts a worker if none is running.
    ///
    /// Returns immediately.
    pub fn enqueue(&self, id: impl Into<RecordId>) {
        let id = id.into();
        let mut states = self.shared.states.lock();

        if let Some(state) = states.get_mut(&id) {
            state.dirty = true;
            state.wake.notify_waiters();
            debug!(record_id = %id, "upload coalesced");
            return;
        }

        let generation = self.shared.generations.fetch_add(1, Ordering::Relaxed);
        let wake = Arc::new(Notify::new());
        let (done_tx, done_rx) = watch::channel(());
        let worker = Worker {
            id: id.clone(),
            generation,
            wake: Arc::clone(&wake),
            shared: Arc::clone(&self.shared),
            upload: Arc::clone(&self.upload),
            retry: self.retry.clone(),
            clock: Arc::clone(&self.clock),
            events: self.events.clone(),
        };
        let task = tokio::spawn(worker.run(done_tx));

        debug!(record_id = %id, "upload scheduled");
        states.insert(
            id,
            QueueState {
                dirty: true,
                uploading: false,
                consecutive_failures: 0,
                generation,
                wake,
                done: done_rx,
                task,
            },
        );
    }

    /// Returns true if `id` is dirty or has an upload in progress.
    pub fn has_pending_upload(&self, id: &RecordId) -> bool {
        self.shared.states.lock().contains_key(id)
    }

    /// Returns true while an upload call for `id` is in flight.
    pub fn is_uploading(&self, id: &RecordId) -> bool {
        self.shared
            .states
            .lock()
            .get(id)
            .is_some_and(|state| state.uploading)
    }

    /// IDs with pending or in-progress uploads.
    pub fn pending_ids(&self) -> HashSet<RecordId> {
        self.shared.states.lock().keys().cloned().collect()
    }

    /// Failed attempts since the last success in the current run of `id`.
    pub fn consecutive_failures(&self, id: &RecordId) -> u32 {
        self.shared
            .states
            .lock()
            .get(id)
            .map_or(0, |state| state.consecutive_failures)
    }

    /// Waits until `id` has no pending upload.
    pub async fn wait_for_upload(&self, id: &RecordId) {
        loop {
            let done = self.shared.states.lock().get(id).map(|s| s.done.clone());
            let Some(done) = done else {
                return;
            };
            wait_closed(done).await;
        }
    }

    /// Waits until no record has a pending upload.
    pub async fn wait_for_all(&self) {
        loop {
            let done: Vec<_> = self
                .shared
                .states
                .lock()
                .values()
                .map(|s| s.done.clone())
                .collect();
            if done.is_empty() {
                return;
            }
            futures::future::join_all(done.into_iter().map(wait_closed)).await;
        }
    }

    /// Aborts every worker and drops all state.
    pub fn clear(&self) {
        let drained: Vec<_> = self.shared.states.lock().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "aborting pending uploads");
        }
        for (_, state) in drained {
            state.task.abort();
        }
    }
}

impl UploadScheduler for UploadCoalescer {
    fn schedule(&self, id: &RecordId) {
        self.enqueue(id.clone());
    }
}

impl Drop for UploadCoalescer {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for UploadCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCoalescer")
            .field("pending", &self.shared.states.lock().len())
            .field("retry", &self.retry)
            .finish()
    }
}

/// Resolves once the worker owning the sender has exited.
async fn wait_closed(mut done: watch::Receiver<()>) {
    while done.changed().await.is_ok() {}
}

enum PassOutcome {
    Uploaded,
    Superseded,
    GaveUp { attempts: u32, error: SyncError },
}

struct Worker {
    id: RecordId,
    generation: u64,
    wake: Arc<Notify>,
    shared: Arc<Shared>,
    upload: UploadFn,
    retry: RetryConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl Worker {
    async fn run(self, _done: watch::Sender<()>) {
        while self.begin_pass() {
            match self.upload_pass().await {
                PassOutcome::Uploaded => {
                    debug!(record_id = %self.id, "upload complete");
                }
                PassOutcome::Superseded => {
                    debug!(record_id = %self.id, "retry superseded by newer edit");
                }
                PassOutcome::GaveUp { attempts, error } => {
                    warn!(
                        record_id = %self.id,
                        attempts,
                        error = %error,
                        "upload failed, giving up until the record changes again"
                    );
                    self.events.emit(SyncEvent::UploadFailed {
                        id: self.id.clone(),
                        attempts,
                        error: error.to_string(),
                    });
                }
            }
        }
    }

    /// Runs `f` on this worker's state, if it still owns it.
    fn with_state<T>(&self, f: impl FnOnce(&mut QueueState) -> T) -> Option<T> {
        let mut states = self.shared.states.lock();
        states
            .get_mut(&self.id)
            .filter(|state| state.generation == self.generation)
            .map(f)
    }

    /// Clears `dirty` to start a pass, or drops the state and returns
    /// false if there is nothing left to do.
    fn begin_pass(&self) -> bool {
        let mut states = self.shared.states.lock();
        let Some(state) = states.get_mut(&self.id) else {
            return false;
        };
        if state.generation != self.generation {
            return false;
        }
        if state.dirty {
            state.dirty = false;
            true
        } else {
            states.remove(&self.id);
            false
        }
    }

    fn is_dirty(&self) -> bool {
        self.with_state(|state| state.dirty).unwrap_or(false)
    }

    async fn upload_pass(&self) -> PassOutcome {
        let max_attempts = self.retry.max_attempts();
        let mut attempts = 0;

        loop {
            self.with_state(|state| state.uploading = true);
            let result = (self.upload)(self.id.clone()).await;
            self.with_state(|state| state.uploading = false);
            attempts += 1;

            let error = match result {
                Ok(()) => {
                    self.with_state(|state| state.consecutive_failures = 0);
                    return PassOutcome::Uploaded;
                }
                Err(error) => error,
            };
            self.with_state(|state| state.consecutive_failures += 1);

            if !error.is_retryable() || attempts >= max_attempts {
                return PassOutcome::GaveUp { attempts, error };
            }

            let delay = self.retry.delay_for_attempt(attempts - 1);
            debug!(
                record_id = %self.id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "upload failed, retrying"
            );

            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_dirty() {
                return PassOutcome::Superseded;
            }
            tokio::select! {
                _ = self.clock.sleep(delay) => {}
                _ = &mut notified => return PassOutcome::Superseded,
            }
            if self.is_dirty() {
                return PassOutcome::Superseded;
            }
        }
    }
}
