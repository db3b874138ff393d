//! Seal command implementation.

use super::load_key;
use std::path::Path;
use vaultsync_codec::{encode, Envelope};
use vaultsync_storage::Record;

/// Runs the seal command.
pub fn run(
    key: &str,
    input: &Path,
    output: &Path,
    envelope: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = load_key(key)?;
    let text = std::fs::read_to_string(input)?;
    let record: Record = serde_json::from_str(&text)?;

    let blob = encode(&record, &key)?;
    let written = if envelope {
        let json = Envelope::seal(&blob)?.to_json()?;
        std::fs::write(output, &json)?;
        json.len()
    } else {
        std::fs::write(output, &blob)?;
        blob.len()
    };

    tracing::info!(
        record_id = %record.id,
        entries = record.entries.len(),
        bytes = written,
        "record sealed"
    );
    Ok(())
}
