//! zstd framing of serialized records.

use crate::error::{CodecError, CodecResult};

/// Compression level used for record payloads.
pub const COMPRESSION_LEVEL: i32 = 3;

/// Compresses `data` into a single zstd frame.
pub fn compress(data: &[u8]) -> CodecResult<Vec<u8>> {
    zstd::encode_all(data, COMPRESSION_LEVEL).map_err(|e| CodecError::CompressionFailed {
        message: e.to_string(),
    })
}

/// Decompresses a zstd frame produced by [`compress`].
pub fn decompress(data: &[u8]) -> CodecResult<Vec<u8>> {
    zstd::decode_all(data).map_err(|e| CodecError::DecompressionFailed {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repetitive_text_shrinks() {
        let text = "the assistant replied politely. ".repeat(200);
        let compressed = compress(text.as_bytes()).unwrap();
        assert!(compressed.len() < text.len() / 4);
        assert_eq!(decompress(&compressed).unwrap(), text.as_bytes());
    }

    #[test]
    fn garbage_is_rejected() {
        let err = decompress(b"definitely not zstd").unwrap_err();
        assert!(matches!(err, CodecError::DecompressionFailed { .. }));
    }
}
