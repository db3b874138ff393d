//! Reconciliation of remote pages with the local record set.
//!
//! The remote store is authoritative for every ID it returns, with one
//! exception: a local copy with unsent changes (`pending`) is kept, since
//! its upload will overwrite the remote copy. Local records the remote page
//! does not mention are kept. Tombstoned IDs never come back.
//!
//! Concurrent edits of the same record on two devices resolve as "last
//! full save wins"; this is not a CRDT merge.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::warn;
use vaultsync_codec::{decode, CodecError, EncryptionKey};
use vaultsync_storage::{Record, RecordId};
use vaultsync_sync_protocol::PageResponse;

/// Outcome of reconciling one remote record with its local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Store the remote copy.
    TakeRemote,
    /// Keep the local copy; it has changes the remote has not seen.
    KeepLocal,
    /// Drop the remote copy; the record was deleted on this device.
    Tombstoned,
}

/// Decides between a local copy (if any) and a remote copy of one record.
pub fn resolve(local: Option<&Record>, _remote: &Record) -> MergeDecision {
    match local {
        Some(local) if local.pending => MergeDecision::KeepLocal,
        _ => MergeDecision::TakeRemote,
    }
}

/// Merges a remote page into the local set.
///
/// Returns the merged set in display order: blank records first, then by
/// creation time, newest first. Ties keep remote-page order followed by
/// local order.
pub fn merge_records(
    remote: &[Record],
    local: &[Record],
    tombstones: &HashSet<RecordId>,
) -> Vec<Record> {
    let local_by_id: HashMap<&RecordId, &Record> = local.iter().map(|r| (&r.id, r)).collect();

    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(remote.len() + local.len());

    for record in remote {
        if tombstones.contains(&record.id) || !seen.insert(&record.id) {
            continue;
        }
        let local = local_by_id.get(&record.id).copied();
        match resolve(local, record) {
            MergeDecision::TakeRemote => merged.push(record.clone()),
            MergeDecision::KeepLocal => merged.extend(local.cloned()),
            MergeDecision::Tombstoned => {}
        }
    }

    for record in local {
        if tombstones.contains(&record.id) || !seen.insert(&record.id) {
            continue;
        }
        merged.push(record.clone());
    }

    sort_records(&mut merged);
    merged
}

/// Sorts records for display: blank first, then `created_at` descending.
///
/// The sort is stable.
pub fn sort_records(records: &mut [Record]) {
    records.sort_by(display_order);
}

fn display_order(a: &Record, b: &Record) -> Ordering {
    b.is_blank
        .cmp(&a.is_blank)
        .then_with(|| b.created_at.cmp(&a.created_at))
}

/// Local records to delete after a full resync saw `remote_ids`.
///
/// Records with unsent changes and blank records are never pruned.
pub fn prune_missing(local: &[Record], remote_ids: &HashSet<RecordId>) -> Vec<RecordId> {
    local
        .iter()
        .filter(|r| !r.pending && !r.is_blank && !remote_ids.contains(&r.id))
        .map(|r| r.id.clone())
        .collect()
}

/// Local records to delete because the remote store reports them deleted.
///
/// Records with unsent changes are kept.
pub fn remote_deletions(local: &[Record], deleted_ids: &[RecordId]) -> Vec<RecordId> {
    let deleted: HashSet<&RecordId> = deleted_ids.iter().collect();
    local
        .iter()
        .filter(|r| !r.pending && deleted.contains(&r.id))
        .map(|r| r.id.clone())
        .collect()
}

/// A remote page with its blobs opened.
#[derive(Debug, Default)]
pub struct DecodedPage {
    /// Records that decoded cleanly, in page order.
    pub records: Vec<Record>,
    /// IDs the remote store reports deleted.
    pub deleted_ids: Vec<RecordId>,
    /// Blobs skipped because they were damaged or not records.
    pub skipped: usize,
    /// Blobs that failed authentication under the session key.
    pub key_failures: usize,
    /// Continuation token for the next page.
    pub next_token: Option<String>,
}

/// Opens every blob in `page` with `key`.
///
/// Damaged blobs are logged and skipped rather than failing the page.
/// Records reported deleted on the same page are dropped.
pub fn decode_page(page: PageResponse, key: &EncryptionKey) -> DecodedPage {
    let deleted_ids: Vec<RecordId> = page.deleted_ids.into_iter().map(RecordId::from).collect();
    let deleted: HashSet<&RecordId> = deleted_ids.iter().collect();

    let mut records = Vec::with_capacity(page.records.len());
    let mut skipped = 0;
    let mut key_failures = 0;

    for remote in page.records {
        let record: Record = match decode(&remote.blob, key) {
            Ok(record) => record,
            Err(CodecError::AuthenticationFailed) => {
                key_failures += 1;
                continue;
            }
            Err(e) => {
                warn!(record_id = %remote.id, error = %e, "skipping unreadable remote record");
                skipped += 1;
                continue;
            }
        };

        if record.id.as_str() != remote.id {
            warn!(
                record_id = %remote.id,
                sealed_id = %record.id,
                "skipping remote record whose sealed ID does not match"
            );
            skipped += 1;
            continue;
        }
        if deleted.contains(&record.id) {
            continue;
        }
        records.push(record);
    }

    if key_failures > 0 {
        warn!(count = key_failures, "remote records could not be opened with the current key");
    }

    DecodedPage {
        records,
        deleted_ids,
        skipped,
        key_failures,
        next_token: page.next_token,
    }
}
