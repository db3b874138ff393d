//! # VaultSync Sync Protocol
//!
//! Messages exchanged with the remote blob store.
//!
//! The remote store only ever sees record IDs, timestamps, versions and
//! sealed blobs. Two operations carry data:
//!
//! - push one sealed record ([`PushRequest`] → [`PushAck`])
//! - fetch a page of sealed records, newest first ([`PageRequest`] →
//!   [`PageResponse`]), continuing from an opaque token
//!
//! Page bodies travel as JSON with blobs framed as
//! [`vaultsync_codec::Envelope`]s.
//!
//! This is a pure protocol crate with no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{PageRequest, PageResponse, PushAck, PushRequest, RemoteRecord};
