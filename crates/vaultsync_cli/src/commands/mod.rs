//! CLI command implementations.

pub mod inspect;
pub mod key;
pub mod keygen;
pub mod open;
pub mod seal;

use std::path::Path;
use vaultsync_codec::EncryptionKey;

/// Reads a key given either inline or as a path to a key file.
pub fn load_key(arg: &str) -> Result<EncryptionKey, Box<dyn std::error::Error>> {
    let path = Path::new(arg);
    let text = if path.is_file() {
        std::fs::read_to_string(path)?
    } else {
        arg.to_string()
    };
    Ok(EncryptionKey::parse(&text)?)
}
