//! # VaultSync Sync Engine
//!
//! Offline-first, end-to-end encrypted record sync.
//!
//! This crate provides:
//! - Upload coalescing with bounded exponential backoff ([`UploadCoalescer`])
//! - Strictly ordered local writes per record ([`PersistenceManager`])
//! - Reconciliation of remote pages with local records ([`merge`])
//! - Tombstones that keep deleted records deleted ([`TombstoneTracker`])
//! - Paginated backfill with rollback ([`PaginationCursor`])
//! - Remote transports: HTTP ([`HttpTransport`]) and in-memory ([`MemoryRemote`])
//! - Per-user orchestration and typed events ([`SyncSession`], [`SyncEvent`])
//!
//! ## Architecture
//!
//! Local storage is the source of truth for the device and holds plaintext.
//! The remote store only sees sealed blobs:
//!
//! 1. A save is written durably, marked pending, then scheduled for upload
//! 2. The upload seals the latest stored copy and pushes it
//! 3. The acknowledgement clears `pending` if nothing changed meanwhile
//! 4. Remote pages are opened, merged and written locally
//!
//! ## Key Invariants
//!
//! - At most one upload in flight per record ID
//! - Any number of edits during an upload cause exactly one more upload
//! - Saves to one record apply in submission order
//! - Remote copies never overwrite local changes that are still pending
//! - Tombstoned IDs are never re-created by sync
//! - A wrong key is reported, never silently decoded

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod coalescer;
mod config;
mod cursor;
mod error;
mod events;
mod http;
pub mod merge;
mod persistence;
mod session;
mod tombstones;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coalescer::{UploadCoalescer, UploadFn, UploadScheduler};
pub use config::{RetryConfig, SyncConfig};
pub use cursor::{CursorSnapshot, PaginationCursor};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, SyncEvent};
pub use http::{HttpClient, HttpRequest, HttpResponse, HttpTransport, Method};
pub use merge::MergeDecision;
pub use persistence::PersistenceManager;
pub use session::{PageSummary, SyncSession, SyncSummary};
pub use tombstones::{TombstoneTracker, TOMBSTONE_META_KEY};
pub use transport::{InjectedFailure, MemoryRemote, RemoteTransport};
