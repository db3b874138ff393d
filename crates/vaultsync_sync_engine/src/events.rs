//! Typed notifications from a sync session.

use tokio::sync::broadcast;
use vaultsync_storage::RecordId;

/// Something observers of a session may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The local record set changed (save, delete, merge).
    RecordsChanged,
    /// A record was acknowledged by the remote store.
    Uploaded {
        /// Record ID.
        id: RecordId,
        /// Version assigned by the remote store.
        version: u64,
    },
    /// Uploading a record was given up for this pass.
    UploadFailed {
        /// Record ID.
        id: RecordId,
        /// Attempts made in the failed pass.
        attempts: u32,
        /// Last error, rendered.
        error: String,
    },
    /// Remote records could not be opened with the session key.
    KeyMismatch {
        /// Number of records that failed authentication.
        count: usize,
    },
    /// A page of remote records was merged.
    PageLoaded {
        /// Records on the page.
        records: usize,
        /// Whether another page is available.
        has_more: bool,
    },
}

/// Fan-out channel for [`SyncEvent`]s.
///
/// Dropping a receiver unsubscribes it. Events sent while nobody listens
/// are discarded.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per slow receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Sends an event to all current subscribers.
    pub fn emit(&self, event: SyncEvent) {
        tracing::trace!(?event, "sync event");
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
