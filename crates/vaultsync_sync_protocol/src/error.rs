//! Error types for protocol encoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The body is not valid JSON for the expected message.
    #[error("invalid message body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    /// A blob inside the message could not be framed or unframed.
    #[error("invalid blob: {0}")]
    Blob(#[from] vaultsync_codec::CodecError),
}
