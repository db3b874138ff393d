//! # VaultSync Codec
//!
//! Turns a serializable record into a self-describing encrypted blob and
//! back.
//!
//! ## Blob layout
//!
//! ```text
//! IV (12 bytes) || AES-256-GCM( zstd( CBOR(record) ) ) || tag (16 bytes)
//! ```
//!
//! - The IV is freshly random per call; reusing one under the same key is
//!   a correctness violation.
//! - AEAD makes a wrong key a distinct error
//!   ([`CodecError::AuthenticationFailed`]) instead of silent corruption.
//! - Attachments are sealed under their own random key
//!   ([`seal_attachment`]).
//! - [`Envelope`] is the JSON framing `{ v: 1, iv, ct }` of the same bytes.
//!
//! ## Usage
//!
//! ```
//! use vaultsync_codec::{decode, encode, EncryptionKey};
//!
//! let key = EncryptionKey::generate();
//! let blob = encode(&vec!["hello".to_string()], &key).unwrap();
//! let back: Vec<String> = decode(&blob, &key).unwrap();
//! assert_eq!(back, vec!["hello".to_string()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cipher;
mod compress;
mod envelope;
mod error;
mod key;
mod sealed;

pub use cipher::{Cipher, MIN_BLOB_SIZE, NONCE_SIZE, TAG_SIZE};
pub use compress::{compress, decompress, COMPRESSION_LEVEL};
pub use envelope::{Envelope, ENVELOPE_VERSION};
pub use error::{CodecError, CodecResult};
pub use key::{EncryptionKey, KEY_PREFIX, KEY_SIZE};
pub use sealed::{decode, encode, open_attachment, seal_attachment};
