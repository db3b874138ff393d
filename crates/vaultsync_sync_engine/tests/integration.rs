//! Integration tests for sync sessions against an in-memory remote store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::TryRecvError;
use vaultsync_codec::{decode, encode, CodecError, EncryptionKey};
use vaultsync_storage::{Entry, FileStore, Record, RecordId, RecordStore, Role, SessionStore};
use vaultsync_sync_engine::{
    InjectedFailure, ManualClock, MemoryRemote, PersistenceManager, RetryConfig, SyncConfig,
    SyncError, SyncEvent, SyncSession, UploadCoalescer,
};

fn shared_key() -> EncryptionKey {
    EncryptionKey::from_bytes(&[7u8; 32]).unwrap()
}

fn fast_retry() -> RetryConfig {
    RetryConfig::new(3)
        .with_base_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(80))
}

fn conversation(id: &str, text: &str, created_at: u64) -> Record {
    let mut record = Record::new(id, text, created_at);
    record.push_entry(Entry::new(Role::User, text, created_at));
    record.push_entry(
        Entry::new(Role::Assistant, format!("re: {text}"), created_at + 1).with_thoughts("short"),
    );
    record
}

struct Device {
    session: SyncSession,
    clock: Arc<ManualClock>,
    store: Arc<dyn RecordStore>,
}

fn device_with(
    remote: &Arc<MemoryRemote>,
    store: Arc<dyn RecordStore>,
    key: EncryptionKey,
    config: SyncConfig,
) -> Device {
    let clock = Arc::new(ManualClock::new(1_000));
    let session = SyncSession::open_with_clock(
        Arc::clone(&store),
        remote.clone(),
        key,
        config.with_retry(fast_retry()),
        clock.clone(),
    )
    .unwrap();
    Device {
        session,
        clock,
        store,
    }
}

fn device(remote: &Arc<MemoryRemote>, key: EncryptionKey) -> Device {
    device_with(
        remote,
        Arc::new(SessionStore::new()),
        key,
        SyncConfig::new().with_page_size(2),
    )
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

async fn load_everything(session: &SyncSession) {
    session.initialize();
    while session.load_more().await.unwrap().is_some() {}
}

// ---------------------------------------------------------------------------
// Upload coalescer
// ---------------------------------------------------------------------------

fn counting_coalescer(
    work: Duration,
    fail_first: usize,
) -> (UploadCoalescer, Arc<AtomicUsize>, Arc<ManualClock>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let clock = Arc::new(ManualClock::new(0));
    let counter = Arc::clone(&calls);
    let coalescer = UploadCoalescer::new(move |_id| {
        let counter = Arc::clone(&counter);
        async move {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(work).await;
            if call < fail_first {
                Err(SyncError::transport_retryable("offline"))
            } else {
                Ok(())
            }
        }
    })
    .with_clock(clock.clone());
    (coalescer, calls, clock)
}

#[tokio::test(start_paused = true)]
async fn three_quick_enqueues_upload_twice() {
    let (coalescer, calls, _) = counting_coalescer(Duration::from_millis(200), 0);
    let id = RecordId::from("c1");

    coalescer.enqueue(id.clone());
    tokio::time::sleep(Duration::from_millis(5)).await;
    coalescer.enqueue(id.clone());
    tokio::time::sleep(Duration::from_millis(5)).await;
    coalescer.enqueue(id.clone());

    coalescer.wait_for_upload(&id).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!coalescer.has_pending_upload(&id));
}

#[tokio::test(start_paused = true)]
async fn backoff_delays_double_up_to_the_cap() {
    let (coalescer, calls, clock) = counting_coalescer(Duration::ZERO, usize::MAX);
    let id = RecordId::from("c1");

    coalescer.enqueue(id.clone());
    coalescer.wait_for_upload(&id).await;

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        clock.sleeps(),
        vec![
            Duration::from_millis(1000),
            Duration::from_millis(2000),
            Duration::from_millis(4000),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn new_edit_during_backoff_skips_the_stale_retry() {
    let (coalescer, calls, clock) = counting_coalescer(Duration::ZERO, 1);
    let id = RecordId::from("c1");
    let start = tokio::time::Instant::now();

    coalescer.enqueue(id.clone());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(clock.sleeps(), vec![Duration::from_millis(1000)]);

    coalescer.enqueue(id.clone());
    coalescer.wait_for_upload(&id).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(start.elapsed() < Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn give_up_requires_a_fresh_enqueue() {
    let (coalescer, calls, _) = counting_coalescer(Duration::ZERO, 4);
    let id = RecordId::from("c1");

    coalescer.enqueue(id.clone());
    coalescer.wait_for_upload(&id).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4, "no retry storm after giving up");

    coalescer.enqueue(id.clone());
    coalescer.wait_for_upload(&id).await;
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn saved_record_is_uploaded_sealed() {
    let remote = Arc::new(MemoryRemote::new());
    let a = device(&remote, shared_key());
    let mut events = a.session.subscribe();

    let saved = a
        .session
        .save(conversation("c1", "hello", 10), false)
        .await
        .unwrap();
    assert!(saved.pending);

    a.session.wait_for_uploads().await;

    let blob = remote.blob("c1").unwrap();
    let sealed: Record = decode(&blob, &shared_key()).unwrap();
    assert_eq!(sealed.entries, saved.entries);
    assert!(!sealed.pending);

    let stored = a.session.record(&"c1".into()).await.unwrap().unwrap();
    assert!(!stored.pending);
    assert_eq!(stored.remote_version, Some(1));

    let events = drain(&mut events);
    assert!(events.contains(&SyncEvent::Uploaded {
        id: "c1".into(),
        version: 1
    }));
}

#[tokio::test]
async fn blank_records_are_never_uploaded() {
    let remote = Arc::new(MemoryRemote::new());
    let a = device(&remote, shared_key());

    let blank = a.session.create_record().await.unwrap();
    assert!(blank.is_blank);
    a.session.save(blank, false).await.unwrap();
    a.session.wait_for_uploads().await;

    assert!(remote.is_empty());
    assert_eq!(remote.push_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_saves_apply_in_call_order() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn RecordStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    let persistence = PersistenceManager::new(Arc::clone(&store));

    let mut record = conversation("c1", "v0", 10);
    let saves: Vec<_> = (1..=25)
        .map(|i| {
            record.title = format!("v{i}");
            persistence.save(record.clone(), false)
        })
        .collect();
    let written = futures::future::join_all(saves).await;

    let stamps: Vec<u64> = written.into_iter().map(|r| r.unwrap().updated_at).collect();
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(store.get(&"c1".into()).unwrap().unwrap().title, "v25");
}

#[tokio::test]
async fn last_save_is_the_one_uploaded() {
    let remote = Arc::new(MemoryRemote::new());
    remote.set_push_latency(Duration::from_millis(50));
    let a = device(&remote, shared_key());

    let mut record = conversation("c1", "ordered", 10);
    for i in 0..10 {
        record.title = format!("ordered-{i}");
        a.session.save(record.clone(), false).await.unwrap();
    }
    a.session.wait_for_uploads().await;

    assert!(remote.push_count() <= 5);
    let sealed: Record = decode(&remote.blob("c1").unwrap(), &shared_key()).unwrap();
    assert_eq!(sealed.title, "ordered-9");
    let stored = a.session.record(&"c1".into()).await.unwrap().unwrap();
    assert!(!stored.pending);
}

#[tokio::test]
async fn uploads_for_distinct_records_run_in_parallel() {
    let remote = Arc::new(MemoryRemote::new());
    remote.set_push_latency(Duration::from_millis(300));
    let a = device(&remote, shared_key());

    let start = std::time::Instant::now();
    a.session.save(conversation("a", "a", 1), false).await.unwrap();
    a.session.save(conversation("b", "b", 2), false).await.unwrap();
    a.session.wait_for_uploads().await;

    assert_eq!(remote.len(), 2);
    assert!(start.elapsed() < Duration::from_millis(550));
}

#[tokio::test]
async fn round_trip_between_devices() {
    let remote = Arc::new(MemoryRemote::new());
    let a = device(&remote, shared_key());
    let b = device(&remote, shared_key());

    for (i, id) in ["c1", "c2", "c3"].iter().enumerate() {
        a.session
            .save(conversation(id, id, 10 + i as u64), false)
            .await
            .unwrap();
    }
    a.session.wait_for_uploads().await;

    load_everything(&b.session).await;
    assert!(!b.session.has_more());

    let on_a = a.session.records().await.unwrap();
    let on_b = b.session.records().await.unwrap();
    assert_eq!(on_b.len(), 3);
    for (x, y) in on_a.iter().zip(&on_b) {
        assert_eq!(x.id, y.id);
        assert_eq!(x.entries, y.entries);
        assert!(!y.pending);
    }
    let ids: Vec<_> = on_b.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["c3", "c2", "c1"]);
}

#[tokio::test]
async fn wrong_key_is_reported_not_decoded() {
    let remote = Arc::new(MemoryRemote::new());
    let a = device(&remote, shared_key());
    a.session.save(conversation("c1", "secret", 1), false).await.unwrap();
    a.session.wait_for_uploads().await;

    let b = device(&remote, EncryptionKey::generate());
    let mut events = b.session.subscribe();
    let summary = b.session.load_more().await.unwrap().unwrap();

    assert_eq!(summary.key_failures, 1);
    assert_eq!(summary.received, 0);
    assert!(b.session.records().await.unwrap().is_empty());
    assert!(drain(&mut events).contains(&SyncEvent::KeyMismatch { count: 1 }));

    let err = decode::<Record>(&remote.blob("c1").unwrap(), &EncryptionKey::generate()).unwrap_err();
    assert!(matches!(err, CodecError::AuthenticationFailed));

    b.session.set_key(shared_key());
    load_everything(&b.session).await;
    assert_eq!(b.session.records().await.unwrap().len(), 1);
}

#[tokio::test]
async fn damaged_remote_blobs_are_skipped() {
    let remote = Arc::new(MemoryRemote::new());
    remote.insert("broken", vec![1, 2, 3], 5);
    remote.insert("good", encode(&conversation("good", "ok", 1), &shared_key()).unwrap(), 4);

    let b = device(&remote, shared_key());
    let summary = b.session.load_more().await.unwrap().unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.applied, 1);
    assert_eq!(b.session.records().await.unwrap().len(), 1);
}

#[tokio::test]
async fn local_only_records_survive_merge() {
    let remote = Arc::new(MemoryRemote::new());
    remote.insert("remote", encode(&conversation("remote", "r", 1), &shared_key()).unwrap(), 1);

    let b = device(&remote, shared_key());
    remote.fail_pushes(10, InjectedFailure::Fatal);
    b.session.save(conversation("local", "l", 2), false).await.unwrap();
    b.session.wait_for_uploads().await;

    load_everything(&b.session).await;
    let ids: Vec<_> = b
        .session
        .records()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id.to_string())
        .collect();
    assert_eq!(ids, vec!["local".to_string(), "remote".to_string()]);
}

#[tokio::test]
async fn pending_local_edit_beats_remote_copy() {
    let remote = Arc::new(MemoryRemote::new());
    let a = device(&remote, shared_key());
    let b = device(&remote, shared_key());

    a.session.save(conversation("c1", "from a", 1), false).await.unwrap();
    a.session.wait_for_uploads().await;

    remote.fail_pushes(10, InjectedFailure::Fatal);
    b.session.save(conversation("c1", "from b", 1), false).await.unwrap();
    b.session.wait_for_uploads().await;

    let summary = b.session.load_more().await.unwrap().unwrap();
    assert_eq!(summary.kept_local, 1);
    let stored = b.session.record(&"c1".into()).await.unwrap().unwrap();
    assert_eq!(stored.title, "from b");
    assert!(stored.pending);
}

#[tokio::test]
async fn tombstoned_records_do_not_resurrect() {
    let remote = Arc::new(MemoryRemote::new());
    let a = device(&remote, shared_key());
    let b = device(&remote, shared_key());

    a.session.save(conversation("c1", "doomed", 1), false).await.unwrap();
    a.session.wait_for_uploads().await;
    load_everything(&b.session).await;
    assert_eq!(b.session.records().await.unwrap().len(), 1);

    assert!(b.session.delete(&"c1".into()).await.unwrap());
    assert!(remote.blob("c1").is_none());

    // Another device still has it and pushes it again.
    a.clock.advance(10);
    a.session.save(conversation("c1", "doomed, edited", 1), false).await.unwrap();
    a.session.wait_for_uploads().await;
    assert!(remote.blob("c1").is_some());

    load_everything(&b.session).await;
    assert!(b.session.records().await.unwrap().is_empty());
    assert!(b.store.get(&"c1".into()).unwrap().is_none());
}

/// Session store whose record writes for one ID are slow.
struct SlowPuts {
    inner: SessionStore,
    slow_id: RecordId,
    delay: Duration,
}

impl RecordStore for SlowPuts {
    fn get(&self, id: &RecordId) -> vaultsync_storage::StorageResult<Option<Record>> {
        self.inner.get(id)
    }
    fn put(&self, record: &Record) -> vaultsync_storage::StorageResult<()> {
        if record.id == self.slow_id {
            std::thread::sleep(self.delay);
        }
        self.inner.put(record)
    }
    fn delete(&self, id: &RecordId) -> vaultsync_storage::StorageResult<bool> {
        self.inner.delete(id)
    }
    fn list(&self) -> vaultsync_storage::StorageResult<Vec<Record>> {
        self.inner.list()
    }
    fn get_meta(&self, key: &str) -> vaultsync_storage::StorageResult<Option<Vec<u8>>> {
        self.inner.get_meta(key)
    }
    fn put_meta(&self, key: &str, value: &[u8]) -> vaultsync_storage::StorageResult<()> {
        self.inner.put_meta(key, value)
    }
    fn delete_meta(&self, key: &str) -> vaultsync_storage::StorageResult<()> {
        self.inner.delete_meta(key)
    }
    fn clear(&self) -> vaultsync_storage::StorageResult<()> {
        self.inner.clear()
    }
    fn is_durable(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn delete_during_page_apply_is_not_undone() {
    let remote = Arc::new(MemoryRemote::new());
    remote.insert("a", encode(&conversation("a", "first", 20), &shared_key()).unwrap(), 2);
    remote.insert("b", encode(&conversation("b", "second", 10), &shared_key()).unwrap(), 1);

    let store: Arc<dyn RecordStore> = Arc::new(SlowPuts {
        inner: SessionStore::new(),
        slow_id: RecordId::from("a"),
        delay: Duration::from_millis(300),
    });
    let b = device_with(&remote, store, shared_key(), SyncConfig::new());

    let session = b.session.clone();
    let loading = tokio::spawn(async move { session.load_more().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    b.session.delete(&"b".into()).await.unwrap();

    loading.await.unwrap().unwrap();
    assert!(b.store.get(&"b".into()).unwrap().is_none());
    let ids: Vec<_> = b
        .session
        .records()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec![RecordId::from("a")]);
}

#[tokio::test]
async fn remote_deletions_remove_synced_copies() {
    let remote = Arc::new(MemoryRemote::new());
    let a = device(&remote, shared_key());
    let b = device(&remote, shared_key());

    a.session.save(conversation("c1", "x", 1), false).await.unwrap();
    a.session.wait_for_uploads().await;
    load_everything(&b.session).await;

    a.session.delete(&"c1".into()).await.unwrap();

    b.session.initialize();
    let summary = b.session.load_more().await.unwrap().unwrap();
    assert_eq!(summary.removed, 1);
    assert!(b.session.records().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_page_load_rolls_back() {
    let remote = Arc::new(MemoryRemote::new());
    for i in 0..3u64 {
        let id = format!("c{i}");
        remote.insert(
            id.clone(),
            encode(&conversation(&id, "x", i), &shared_key()).unwrap(),
            i,
        );
    }
    let b = device(&remote, shared_key());

    assert!(b.session.load_more().await.unwrap().unwrap().has_more);

    remote.fail_fetches(1, InjectedFailure::Transient);
    let err = b.session.load_more().await.unwrap_err();
    assert!(err.is_retryable());
    assert!(b.session.has_more());

    let summary = b.session.load_more().await.unwrap().unwrap();
    assert_eq!(summary.received, 1);
    assert!(!summary.has_more);
    assert!(b.session.load_more().await.unwrap().is_none());
    assert_eq!(remote.fetch_count(), 3);
    assert_eq!(b.session.records().await.unwrap().len(), 3);
}

#[tokio::test]
async fn exhausted_retries_emit_notice_and_keep_pending() {
    let remote = Arc::new(MemoryRemote::new());
    let a = device(&remote, shared_key());
    let mut events = a.session.subscribe();

    remote.fail_pushes(4, InjectedFailure::Transient);
    a.session.save(conversation("c1", "x", 1), false).await.unwrap();
    a.session.wait_for_uploads().await;

    assert_eq!(remote.push_count(), 4);
    let stored = a.session.record(&"c1".into()).await.unwrap().unwrap();
    assert!(stored.pending);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SyncEvent::UploadFailed { attempts: 4, .. })));

    // The next edit tries again.
    a.session.save(stored, false).await.unwrap();
    a.session.wait_for_uploads().await;
    assert!(remote.blob("c1").is_some());
}

#[tokio::test]
async fn full_resync_prunes_only_synced_records() {
    let remote = Arc::new(MemoryRemote::new());
    let b = device_with(
        &remote,
        Arc::new(SessionStore::new()),
        shared_key(),
        SyncConfig::new().with_page_size(2).with_auth_context("user-1"),
    );

    // Synced earlier, since deleted remotely without a deletion record.
    let mut gone = conversation("gone", "g", 1);
    gone.remote_version = Some(3);
    b.session.save(gone, true).await.unwrap();
    // Unsent.
    remote.fail_pushes(10, InjectedFailure::Fatal);
    b.session.save(conversation("unsent", "u", 2), false).await.unwrap();
    b.session.wait_for_uploads().await;
    let blank = b.session.create_record().await.unwrap();

    remote.insert("kept", encode(&conversation("kept", "k", 3), &shared_key()).unwrap(), 3);
    b.clock.advance(60_000);

    let summary = b.session.sync_all().await.unwrap();
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.requeued, 1);

    let mut ids: Vec<_> = b
        .session
        .records()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    ids.sort();
    let mut expected = vec![RecordId::from("kept"), RecordId::from("unsent"), blank.id];
    expected.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn anonymous_sessions_never_prune() {
    let remote = Arc::new(MemoryRemote::new());
    let b = device(&remote, shared_key());
    b.session.save(conversation("local", "l", 1), true).await.unwrap();
    b.clock.advance(60_000);

    let summary = b.session.sync_all().await.unwrap();
    assert_eq!(summary.removed, 0);
    assert_eq!(b.session.records().await.unwrap().len(), 1);
}

#[tokio::test]
async fn pending_records_survive_restart_and_resume() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(MemoryRemote::new());

    {
        let store: Arc<dyn RecordStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        let a = device_with(&remote, store, shared_key(), SyncConfig::new());
        remote.fail_pushes(4, InjectedFailure::Transient);
        a.session.save(conversation("c1", "offline", 1), false).await.unwrap();
        a.session.shutdown().await;
    }
    assert!(remote.is_empty());

    let store: Arc<dyn RecordStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    let a = device_with(&remote, store, shared_key(), SyncConfig::new());
    assert!(a.session.is_durable());
    let stored = a.session.record(&"c1".into()).await.unwrap().unwrap();
    assert!(stored.pending);

    let summary = a.session.sync_all().await.unwrap();
    assert_eq!(summary.requeued, 1);
    a.session.wait_for_uploads().await;

    assert!(remote.blob("c1").is_some());
    assert!(!a.session.record(&"c1".into()).await.unwrap().unwrap().pending);
}

#[tokio::test]
async fn sign_out_clears_local_state() {
    let remote = Arc::new(MemoryRemote::new());
    let a = device_with(
        &remote,
        Arc::new(SessionStore::new()),
        shared_key(),
        SyncConfig::new().with_auth_context("user-1"),
    );
    a.session.save(conversation("c1", "x", 1), true).await.unwrap();
    a.session.delete(&"c2".into()).await.unwrap();

    a.session.sign_out().await.unwrap();

    assert!(a.session.records().await.unwrap().is_empty());
    assert!(a.store.list().unwrap().is_empty());
    assert!(a.session.pending_uploads().is_empty());
    assert!(a.session.set_auth_context(Some("user-2".into())));
}

#[tokio::test]
async fn background_sync_pulls_periodically() {
    let remote = Arc::new(MemoryRemote::new());
    let b = device_with(
        &remote,
        Arc::new(SessionStore::new()),
        shared_key(),
        SyncConfig::new().with_sync_interval(Duration::from_millis(50)),
    );
    assert!(b.session.start_background_sync());
    assert!(!b.session.start_background_sync());

    remote.insert("c1", encode(&conversation("c1", "x", 1), &shared_key()).unwrap(), 1);
    assert!(b.session.sync_now());

    let mut found = false;
    for _ in 0..50 {
        if !b.session.records().await.unwrap().is_empty() {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(found);

    b.session.shutdown().await;
    assert!(!b.session.sync_now());
}
