//! Inspect command implementation.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use vaultsync_storage::{FileStore, RecordStore};
use vaultsync_sync_engine::TombstoneTracker;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Schema version from the manifest.
    pub schema_version: u16,
    /// Number of stored records.
    pub record_count: usize,
    /// Records with unsent changes.
    pub pending_count: usize,
    /// Placeholder records.
    pub blank_count: usize,
    /// Entries across all records.
    pub entry_count: usize,
    /// Attachment references across all records.
    pub attachment_count: usize,
    /// Tombstoned record IDs.
    pub tombstone_count: usize,
    /// Records that were acknowledged by the remote store at least once.
    pub synced_once_count: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Gathers statistics for the store at `path`.
pub fn collect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No store found at {}", path.display()).into());
    }

    let file_store = FileStore::open(path)?;
    let schema_version = file_store.schema_version();
    let store: Arc<dyn RecordStore> = Arc::new(file_store);
    let records = store.list()?;
    let tombstones = TombstoneTracker::load(Arc::clone(&store))?;

    Ok(InspectResult {
        path: path.display().to_string(),
        schema_version,
        record_count: records.len(),
        pending_count: records.iter().filter(|r| r.pending).count(),
        blank_count: records.iter().filter(|r| r.is_blank).count(),
        entry_count: records.iter().map(|r| r.entries.len()).sum(),
        attachment_count: records
            .iter()
            .flat_map(|r| &r.entries)
            .map(|e| e.attachments.len())
            .sum(),
        tombstone_count: tombstones.len(),
        synced_once_count: records
            .iter()
            .filter(|r| r.remote_version.is_some())
            .count(),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("VaultSync Store Inspection");
    println!("==========================");
    println!();
    println!("Path:   {}", result.path);
    println!("Schema: v{}", result.schema_version);
    println!();
    println!("Records:");
    println!("  Total:       {}", result.record_count);
    println!("  Pending:     {}", result.pending_count);
    println!("  Blank:       {}", result.blank_count);
    println!("  Synced once: {}", result.synced_once_count);
    println!("  Tombstones:  {}", result.tombstone_count);
    println!();
    println!("Content:");
    println!("  Entries:     {}", result.entry_count);
    println!("  Attachments: {}", result.attachment_count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultsync_storage::{Entry, Record, RecordId, Role};

    #[test]
    fn counts_store_contents() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store: Arc<dyn RecordStore> = Arc::new(FileStore::open(dir.path()).unwrap());
            let mut synced = Record::new("a", "A", 1);
            synced.push_entry(Entry::new(Role::User, "hi", 1));
            synced.push_entry(Entry::new(Role::Assistant, "hello", 2));
            synced.remote_version = Some(4);
            store.put(&synced).unwrap();

            let mut pending = Record::new("b", "B", 2);
            pending.push_entry(Entry::new(Role::User, "draft", 2));
            pending.pending = true;
            store.put(&pending).unwrap();

            store.put(&Record::blank(3)).unwrap();

            let tombstones = TombstoneTracker::load(Arc::clone(&store)).unwrap();
            tombstones.add(&RecordId::from("gone")).unwrap();
        }

        let result = collect(dir.path()).unwrap();
        assert_eq!(result.record_count, 3);
        assert_eq!(result.pending_count, 1);
        assert_eq!(result.blank_count, 1);
        assert_eq!(result.entry_count, 3);
        assert_eq!(result.tombstone_count, 1);
        assert_eq!(result.synced_once_count, 1);
        assert_eq!(result.schema_version, vaultsync_storage::SCHEMA_VERSION);
    }

    #[test]
    fn missing_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect(&dir.path().join("nope")).is_err());
    }
}
