//! Open command implementation.

use super::load_key;
use std::path::Path;
use vaultsync_codec::{decode, CodecError, Envelope};
use vaultsync_storage::Record;

/// Runs the open command, printing the record as pretty JSON.
pub fn run(key: &str, input: &Path, envelope: bool) -> Result<(), Box<dyn std::error::Error>> {
    let record = open_record(key, input, envelope)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Reads and decodes a sealed record file.
pub fn open_record(
    key: &str,
    input: &Path,
    envelope: bool,
) -> Result<Record, Box<dyn std::error::Error>> {
    let key = load_key(key)?;
    let blob = if envelope {
        Envelope::from_json(&std::fs::read_to_string(input)?)?.into_blob()?
    } else {
        std::fs::read(input)?
    };

    match decode(&blob, &key) {
        Ok(record) => Ok(record),
        Err(CodecError::AuthenticationFailed) => {
            Err("blob does not open with this key (wrong key or tampered data)".into())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::seal;
    use vaultsync_codec::EncryptionKey;
    use vaultsync_storage::{Entry, Role};

    fn write_record(dir: &Path) -> (std::path::PathBuf, Record) {
        let mut record = Record::new("c1", "Trip planning", 1_700_000_000_000);
        record.push_entry(Entry::new(Role::User, "Where to?", 1_700_000_000_001));
        let path = dir.join("record.json");
        std::fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();
        (path, record)
    }

    #[test]
    fn seal_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let (input, record) = write_record(dir.path());
        let key = EncryptionKey::generate().to_prefixed();

        for envelope in [false, true] {
            let blob = dir.path().join(format!("blob-{envelope}"));
            seal::run(&key, &input, &blob, envelope).unwrap();
            assert_eq!(open_record(&key, &blob, envelope).unwrap(), record);
        }
    }

    #[test]
    fn key_may_be_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let (input, record) = write_record(dir.path());
        let key_file = dir.path().join("key.pem");
        std::fs::write(&key_file, EncryptionKey::generate().to_pem()).unwrap();
        let key_arg = key_file.to_str().unwrap();

        let blob = dir.path().join("blob");
        seal::run(key_arg, &input, &blob, false).unwrap();
        assert_eq!(open_record(key_arg, &blob, false).unwrap(), record);
    }

    #[test]
    fn wrong_key_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (input, _) = write_record(dir.path());
        let blob = dir.path().join("blob");
        seal::run(&EncryptionKey::generate().to_prefixed(), &input, &blob, false).unwrap();

        let err = open_record(&EncryptionKey::generate().to_prefixed(), &blob, false).unwrap_err();
        assert!(err.to_string().contains("wrong key"));
    }
}
