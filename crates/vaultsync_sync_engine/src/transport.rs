//! Transport layer abstraction for the remote blob store.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use vaultsync_sync_protocol::{PageRequest, PageResponse, PushAck, PushRequest, RemoteRecord};

/// Connection to the remote blob store.
///
/// The store only ever receives sealed blobs. This trait abstracts the
/// network layer so sessions can run against HTTP, an in-memory store for
/// tests, or anything else.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Pushes one sealed record.
    async fn push(&self, request: PushRequest) -> SyncResult<PushAck>;

    /// Fetches one page of sealed records, newest first.
    async fn fetch_page(&self, request: PageRequest) -> SyncResult<PageResponse>;

    /// Deletes one record remotely.
    async fn delete(&self, id: &str) -> SyncResult<()>;
}

/// Kind of failure [`MemoryRemote`] can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// A retryable transport error.
    Transient,
    /// A non-retryable transport error.
    Fatal,
    /// An authentication failure.
    Unauthorized,
}

impl InjectedFailure {
    fn into_error(self) -> SyncError {
        match self {
            Self::Transient => SyncError::transport_retryable("injected transient failure"),
            Self::Fatal => SyncError::transport_fatal("injected fatal failure"),
            Self::Unauthorized => SyncError::AuthenticationFailed("injected".into()),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredBlob {
    blob: Vec<u8>,
    updated_at: u64,
    version: u64,
}

#[derive(Debug, Default)]
struct RemoteState {
    records: BTreeMap<String, StoredBlob>,
    deleted: Vec<String>,
    next_version: u64,
    push_failures: VecDeque<InjectedFailure>,
    fetch_failures: VecDeque<InjectedFailure>,
    push_latency: Duration,
}

/// An in-memory remote blob store.
///
/// Pages are ordered newest first by `updated_at`. Continuation tokens are
/// offsets, so concurrent writes may shift page boundaries, as they would
/// with many real stores. Failures and latency can be injected.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    pushes: AtomicUsize,
    fetches: AtomicUsize,
}

impl MemoryRemote {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a sealed blob directly, bypassing counters and failures.
    pub fn insert(&self, id: impl Into<String>, blob: Vec<u8>, updated_at: u64) -> u64 {
        let mut state = self.state.lock();
        state.next_version += 1;
        let version = state.next_version;
        state.records.insert(
            id.into(),
            StoredBlob {
                blob,
                updated_at,
                version,
            },
        );
        version
    }

    /// The stored blob for `id`.
    pub fn blob(&self, id: &str) -> Option<Vec<u8>> {
        self.state.lock().records.get(id).map(|s| s.blob.clone())
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    /// Makes the next `count` pushes fail with `failure`.
    pub fn fail_pushes(&self, count: usize, failure: InjectedFailure) {
        self.state
            .lock()
            .push_failures
            .extend(std::iter::repeat(failure).take(count));
    }

    /// Makes the next `count` page fetches fail with `failure`.
    pub fn fail_fetches(&self, count: usize, failure: InjectedFailure) {
        self.state
            .lock()
            .fetch_failures
            .extend(std::iter::repeat(failure).take(count));
    }

    /// Delays every push by `latency`.
    pub fn set_push_latency(&self, latency: Duration) {
        self.state.lock().push_latency = latency;
    }

    /// Pushes attempted so far, including failed ones.
    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Page fetches attempted so far, including failed ones.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteTransport for MemoryRemote {
    async fn push(&self, request: PushRequest) -> SyncResult<PushAck> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let latency = self.state.lock().push_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let failure = self.state.lock().push_failures.pop_front();
        if let Some(failure) = failure {
            return Err(failure.into_error());
        }

        let version = self.insert(request.record_id.clone(), request.blob, request.updated_at);
        Ok(PushAck {
            record_id: request.record_id,
            version,
        })
    }

    async fn fetch_page(&self, request: PageRequest) -> SyncResult<PageResponse> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(failure) = state.fetch_failures.pop_front() {
            return Err(failure.into_error());
        }

        let offset = match &request.continuation_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| SyncError::transport_fatal(format!("bad continuation token {token}")))?,
            None => 0,
        };

        let mut all: Vec<_> = state.records.iter().collect();
        all.sort_by(|a, b| b.1.updated_at.cmp(&a.1.updated_at).then_with(|| a.0.cmp(b.0)));

        let limit = request.limit.max(1) as usize;
        let end = offset.saturating_add(limit).min(all.len());
        let records = all
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|(id, stored)| RemoteRecord {
                id: (*id).clone(),
                blob: stored.blob.clone(),
                updated_at: stored.updated_at,
                version: stored.version,
            })
            .collect();
        let next_token = (end < all.len()).then(|| end.to_string());

        let deleted_ids = if offset == 0 {
            std::mem::take(&mut state.deleted)
        } else {
            Vec::new()
        };

        Ok(PageResponse {
            records,
            next_token,
            deleted_ids,
        })
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        let mut state = self.state.lock();
        if state.records.remove(id).is_some() {
            state.deleted.push(id.to_string());
        }
        Ok(())
    }
}
