//! Protocol messages for push and paginated fetch.

use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};
use vaultsync_codec::Envelope;

/// Push one sealed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    /// Record ID.
    pub record_id: String,
    /// Sealed record (`IV || ciphertext`).
    pub blob: Vec<u8>,
    /// Last-modified marker of the sealed plaintext.
    pub updated_at: u64,
}

impl PushRequest {
    /// Creates a push request.
    pub fn new(record_id: impl Into<String>, blob: Vec<u8>, updated_at: u64) -> Self {
        Self {
            record_id: record_id.into(),
            blob,
            updated_at,
        }
    }
}

/// Remote acknowledgement of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAck {
    /// Record ID.
    pub record_id: String,
    /// Version assigned by the remote store.
    pub version: u64,
}

impl PushAck {
    /// Decodes an acknowledgement from a JSON body.
    pub fn from_json(body: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Encodes the acknowledgement as a JSON body.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Request for one page of sealed records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum number of records to return.
    pub limit: u32,
    /// Continuation token from the previous page, or `None` for page one.
    pub continuation_token: Option<String>,
}

impl PageRequest {
    /// Request for the first page.
    pub fn first(limit: u32) -> Self {
        Self {
            limit,
            continuation_token: None,
        }
    }

    /// Request for the page after `token`.
    pub fn after(limit: u32, token: impl Into<String>) -> Self {
        Self {
            limit,
            continuation_token: Some(token.into()),
        }
    }

    /// Query parameters in wire naming.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("limit", self.limit.to_string())];
        if let Some(token) = &self.continuation_token {
            params.push(("continuationToken", token.clone()));
        }
        params
    }
}

/// One sealed record as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    /// Record ID.
    pub id: String,
    /// Sealed record (`IV || ciphertext`).
    pub blob: Vec<u8>,
    /// Last-modified marker reported by the pusher.
    pub updated_at: u64,
    /// Remote version.
    pub version: u64,
}

/// One page of sealed records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageResponse {
    /// Records on this page, newest first.
    pub records: Vec<RemoteRecord>,
    /// Token for the next page; `None` when this was the last page.
    pub next_token: Option<String>,
    /// IDs deleted remotely since the previous page.
    pub deleted_ids: Vec<String>,
}

impl PageResponse {
    /// Returns true if another page is available.
    pub fn has_more(&self) -> bool {
        self.next_token.is_some()
    }

    /// Decodes a page from its JSON body.
    pub fn from_json(body: &[u8]) -> ProtocolResult<Self> {
        let wire: WirePage = serde_json::from_slice(body)?;

        let records = wire
            .records
            .into_iter()
            .map(|r| {
                Ok(RemoteRecord {
                    id: r.id,
                    blob: r.data.into_blob()?,
                    updated_at: r.updated_at,
                    version: r.version,
                })
            })
            .collect::<ProtocolResult<Vec<_>>>()?;

        Ok(Self {
            records,
            next_token: wire.next_token,
            deleted_ids: wire.deleted_ids,
        })
    }

    /// Encodes the page as a JSON body.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        let records = self
            .records
            .iter()
            .map(|r| {
                Ok(WireRecord {
                    id: r.id.clone(),
                    data: Envelope::seal(&r.blob)?,
                    updated_at: r.updated_at,
                    version: r.version,
                })
            })
            .collect::<ProtocolResult<Vec<_>>>()?;

        let wire = WirePage {
            records,
            next_token: self.next_token.clone(),
            deleted_ids: self.deleted_ids.clone(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePage {
    records: Vec<WireRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
    #[serde(default)]
    deleted_ids: Vec<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    id: String,
    data: Envelope,
    #[serde(default)]
    updated_at: u64,
    #[serde(default)]
    version: u64,
}
