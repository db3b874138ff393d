//! Key conversion command implementation.

use std::path::Path;
use vaultsync_codec::EncryptionKey;

/// Reads a key file in either format and re-encodes it.
pub fn convert(file: &Path, to_pem: bool) -> Result<String, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(file)?;
    let key = EncryptionKey::parse(&text)?;
    Ok(if to_pem { key.to_pem() } else { key.to_prefixed() })
}
