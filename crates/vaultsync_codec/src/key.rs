//! Symmetric key material and its user-facing text forms.
//!
//! A key travels outside the program in two forms:
//!
//! - prefixed: `key_<64 lowercase hex chars>`
//! - PEM-like block:
//!
//! ```text
//! -----BEGIN VAULTSYNC KEY-----
//! <base64 of the 32 key bytes>
//! -----END VAULTSYNC KEY-----
//! ```
//!
//! Both are out-of-band artifacts for export/import and never appear on
//! the wire.

use crate::error::{CodecError, CodecResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Prefix of the compact text form.
pub const KEY_PREFIX: &str = "key_";

const PEM_BEGIN: &str = "-----BEGIN VAULTSYNC KEY-----";
const PEM_END: &str = "-----END VAULTSYNC KEY-----";

/// Encryption key for AES-256-GCM.
///
/// The key is zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CodecError::invalid_key(format!(
                "expected {KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the raw key bytes.
    ///
    /// Don't log or persist the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Derives a key from a passphrase using HKDF-SHA256.
    ///
    /// HKDF is not a password hash. Use it only with high-entropy input such
    /// as a generated recovery phrase.
    pub fn derive_from_passphrase(passphrase: &[u8], salt: &[u8]) -> CodecResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), passphrase);

        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(b"vaultsync-record-key-v1", &mut bytes)
            .map_err(|_| CodecError::invalid_key("HKDF expand failed"))?;

        Ok(Self { bytes })
    }

    /// Formats the key as `key_<hex>`.
    #[must_use]
    pub fn to_prefixed(&self) -> String {
        format!("{KEY_PREFIX}{}", hex::encode(self.bytes))
    }

    /// Parses a key in `key_<hex>` form.
    pub fn from_prefixed(text: &str) -> CodecResult<Self> {
        let hex_part = text
            .trim()
            .strip_prefix(KEY_PREFIX)
            .ok_or_else(|| CodecError::invalid_key(format!("missing `{KEY_PREFIX}` prefix")))?;

        let bytes = hex::decode(hex_part).map_err(|e| CodecError::invalid_key(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Formats the key as a PEM-like text block.
    #[must_use]
    pub fn to_pem(&self) -> String {
        format!("{PEM_BEGIN}\n{}\n{PEM_END}\n", STANDARD.encode(self.bytes))
    }

    /// Parses a PEM-like text block produced by [`to_pem`](Self::to_pem).
    pub fn from_pem(text: &str) -> CodecResult<Self> {
        let text = text.trim();
        let body = text
            .strip_prefix(PEM_BEGIN)
            .and_then(|rest| rest.strip_suffix(PEM_END))
            .ok_or_else(|| CodecError::invalid_key("missing PEM armor"))?;

        let encoded: String = body.split_whitespace().collect();
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CodecError::invalid_key(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Parses either text form.
    pub fn parse(text: &str) -> CodecResult<Self> {
        if text.trim_start().starts_with(PEM_BEGIN) {
            Self::from_pem(text)
        } else {
            Self::from_prefixed(text)
        }
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
