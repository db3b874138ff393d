//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while sealing or opening a blob.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The record could not be serialized.
    #[error("serialization failed: {message}")]
    SerializationFailed {
        /// Description of the serialization error.
        message: String,
    },

    /// The decrypted plaintext is not a valid record.
    #[error("deserialization failed: {message}")]
    DeserializationFailed {
        /// Description of the deserialization error.
        message: String,
    },

    /// The compressor rejected its input.
    #[error("compression failed: {message}")]
    CompressionFailed {
        /// Description of the compression error.
        message: String,
    },

    /// The decrypted payload is not a valid zstd frame.
    #[error("decompression failed: {message}")]
    DecompressionFailed {
        /// Description of the decompression error.
        message: String,
    },

    /// The blob is too short to hold an IV and an authentication tag.
    #[error("blob truncated: {len} bytes, need at least {min}")]
    Truncated {
        /// Length of the rejected blob.
        len: usize,
        /// Minimum acceptable length.
        min: usize,
    },

    /// The AEAD tag did not verify: wrong key or tampered ciphertext.
    #[error("authentication failed: wrong or missing key")]
    AuthenticationFailed,

    /// The cipher refused to encrypt.
    #[error("encryption failed")]
    EncryptionFailed,

    /// Key material could not be parsed.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Description of the key error.
        message: String,
    },

    /// A JSON envelope could not be parsed.
    #[error("invalid envelope: {message}")]
    InvalidEnvelope {
        /// Description of the envelope error.
        message: String,
    },

    /// The envelope carries a version this build does not understand.
    #[error("unsupported envelope version {0}")]
    UnsupportedEnvelopeVersion(u32),
}

impl CodecError {
    /// Create a serialization failed error.
    pub fn serialization_failed(message: impl Into<String>) -> Self {
        Self::SerializationFailed {
            message: message.into(),
        }
    }

    /// Create a deserialization failed error.
    pub fn deserialization_failed(message: impl Into<String>) -> Self {
        Self::DeserializationFailed {
            message: message.into(),
        }
    }

    /// Create an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Create an invalid envelope error.
    pub fn invalid_envelope(message: impl Into<String>) -> Self {
        Self::InvalidEnvelope {
            message: message.into(),
        }
    }

    /// Returns true if this error means the key does not match the data.
    ///
    /// Key errors are recoverable by the user (re-entering or importing a
    /// key) and must never be retried automatically.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            CodecError::AuthenticationFailed | CodecError::InvalidKey { .. }
        )
    }

    /// Returns true if the blob itself is damaged or not a record.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            CodecError::Truncated { .. }
                | CodecError::DecompressionFailed { .. }
                | CodecError::DeserializationFailed { .. }
                | CodecError::InvalidEnvelope { .. }
                | CodecError::UnsupportedEnvelopeVersion(_)
        )
    }
}
