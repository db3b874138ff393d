//! Record and attachment sealing.
//!
//! A sealed record is `IV || AES-256-GCM(zstd(CBOR(record)))`. Attachments
//! skip the serialization and compression steps and are sealed under
//! their own freshly generated key.

use crate::cipher::Cipher;
use crate::compress::{compress, decompress};
use crate::error::{CodecError, CodecResult};
use crate::key::EncryptionKey;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Seals a serializable record under `key`.
///
/// # Errors
///
/// Returns [`CodecError::SerializationFailed`] if the record cannot be
/// represented as CBOR.
pub fn encode<T: Serialize>(record: &T, key: &EncryptionKey) -> CodecResult<Vec<u8>> {
    let mut plain = Vec::new();
    ciborium::into_writer(record, &mut plain)
        .map_err(|e| CodecError::serialization_failed(e.to_string()))?;

    let compressed = compress(&plain)?;
    Cipher::new(key).seal(&compressed)
}

/// Opens a blob produced by [`encode`].
///
/// # Errors
///
/// - [`CodecError::Truncated`] if the blob is too short
/// - [`CodecError::AuthenticationFailed`] if `key` is not the sealing key
/// - [`CodecError::DecompressionFailed`] / [`CodecError::DeserializationFailed`]
///   if the authenticated payload is not a record of type `T`
pub fn decode<T: DeserializeOwned>(blob: &[u8], key: &EncryptionKey) -> CodecResult<T> {
    let compressed = Cipher::new(key).open(blob)?;
    let plain = decompress(&compressed)?;
    ciborium::from_reader(plain.as_slice())
        .map_err(|e| CodecError::deserialization_failed(e.to_string()))
}

/// Seals raw attachment bytes under a new random key.
///
/// Returns the per-attachment key together with the blob so the
/// attachment can be re-keyed without touching the record key.
pub fn seal_attachment(bytes: &[u8]) -> CodecResult<(EncryptionKey, Vec<u8>)> {
    let key = EncryptionKey::generate();
    let blob = Cipher::new(&key).seal(bytes)?;
    Ok((key, blob))
}

/// Opens an attachment blob sealed by [`seal_attachment`].
pub fn open_attachment(blob: &[u8], key: &EncryptionKey) -> CodecResult<Vec<u8>> {
    Cipher::new(key).open(blob)
}
