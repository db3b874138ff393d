//! AES-256-GCM sealing of opaque byte payloads.

use crate::error::{CodecError, CodecResult};
use crate::key::EncryptionKey;
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

/// Size of the GCM nonce (the blob IV) in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Smallest blob that can possibly authenticate.
pub const MIN_BLOB_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Seals and opens payloads under one key.
///
/// Output layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl Cipher {
    /// Creates a cipher bound to `key`.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        let key_array = GenericArray::from_slice(key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key_array),
        }
    }

    /// Encrypts `plaintext` under a freshly generated random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> CodecResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CodecError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend(ciphertext);
        Ok(blob)
    }

    /// Decrypts a blob produced by [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// - [`CodecError::Truncated`] if the blob cannot hold a nonce and a tag
    /// - [`CodecError::AuthenticationFailed`] on a wrong key or tampered data
    pub fn open(&self, blob: &[u8]) -> CodecResult<Vec<u8>> {
        if blob.len() < MIN_BLOB_SIZE {
            return Err(CodecError::Truncated {
                len: blob.len(),
                min: MIN_BLOB_SIZE,
            });
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CodecError::AuthenticationFailed)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}
