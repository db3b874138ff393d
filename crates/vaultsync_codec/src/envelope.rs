//! Versioned JSON framing of a sealed blob.
//!
//! Some transports prefer text over raw binary. The envelope carries the
//! same bytes as the binary blob, split into IV and ciphertext:
//!
//! ```json
//! { "v": 1, "iv": "<base64>", "ct": "<base64>" }
//! ```

use crate::cipher::{MIN_BLOB_SIZE, NONCE_SIZE};
use crate::error::{CodecError, CodecResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Envelope format version written by this build.
pub const ENVELOPE_VERSION: u32 = 1;

/// Text framing of an encrypted blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Format version.
    pub v: u32,
    /// Base64 IV.
    pub iv: String,
    /// Base64 ciphertext including the AEAD tag.
    pub ct: String,
}

impl Envelope {
    /// Wraps a binary blob (`IV || ciphertext`).
    pub fn seal(blob: &[u8]) -> CodecResult<Self> {
        if blob.len() < MIN_BLOB_SIZE {
            return Err(CodecError::Truncated {
                len: blob.len(),
                min: MIN_BLOB_SIZE,
            });
        }

        let (iv, ct) = blob.split_at(NONCE_SIZE);
        Ok(Self {
            v: ENVELOPE_VERSION,
            iv: STANDARD.encode(iv),
            ct: STANDARD.encode(ct),
        })
    }

    /// Reassembles the binary blob.
    pub fn into_blob(self) -> CodecResult<Vec<u8>> {
        if self.v != ENVELOPE_VERSION {
            return Err(CodecError::UnsupportedEnvelopeVersion(self.v));
        }

        let iv = STANDARD
            .decode(&self.iv)
            .map_err(|e| CodecError::invalid_envelope(format!("iv: {e}")))?;
        if iv.len() != NONCE_SIZE {
            return Err(CodecError::invalid_envelope(format!(
                "iv must be {NONCE_SIZE} bytes, got {}",
                iv.len()
            )));
        }

        let ct = STANDARD
            .decode(&self.ct)
            .map_err(|e| CodecError::invalid_envelope(format!("ct: {e}")))?;

        let mut blob = iv;
        blob.extend(ct);
        Ok(blob)
    }

    /// Serializes the envelope as JSON text.
    pub fn to_json(&self) -> CodecResult<String> {
        serde_json::to_string(self).map_err(|e| CodecError::serialization_failed(e.to_string()))
    }

    /// Parses an envelope from JSON text.
    pub fn from_json(text: &str) -> CodecResult<Self> {
        serde_json::from_str(text).map_err(|e| CodecError::invalid_envelope(e.to_string()))
    }
}
