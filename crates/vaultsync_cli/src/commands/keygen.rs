//! Keygen command implementation.

use vaultsync_codec::EncryptionKey;

/// Runs the keygen command and returns the encoded key.
///
/// With `secret` set to `(passphrase, salt)` the key is derived
/// deterministically; otherwise it is random.
pub fn run(
    pem: bool,
    secret: Option<(String, String)>,
) -> Result<String, Box<dyn std::error::Error>> {
    let key = match secret {
        Some((passphrase, salt)) => {
            EncryptionKey::derive_from_passphrase(passphrase.as_bytes(), salt.as_bytes())?
        }
        None => EncryptionKey::generate(),
    };
    tracing::debug!(pem, "key ready");

    Ok(if pem { key.to_pem() } else { key.to_prefixed() })
}
