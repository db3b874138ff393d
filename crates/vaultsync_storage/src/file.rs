//! Durable, versioned on-disk record store.
//!
//! ```text
//! <store_path>/
//! ├─ MANIFEST          # Magic + schema version
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ records/          # One CBOR file per record, named by hex(id)
//! └─ meta/             # Opaque metadata values, named by hex(key)
//! ```
//!
//! Names whose hex form would exceed [`MAX_HEX_NAME`] use `h` plus the
//! SHA-256 of the raw name instead. Hex output never contains `h`, so the
//! two forms cannot collide.
//!
//! Every write goes through write-temp, fsync, rename, fsync-dir so a crash
//! leaves either the old or the new value, never a torn one.

use crate::error::{StorageError, StorageResult};
use crate::record::{Record, RecordId};
use crate::store::RecordStore;
use fs2::FileExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Magic bytes at the start of the manifest.
pub const STORE_MAGIC: [u8; 4] = *b"VSST";

/// Schema version written by this build.
pub const SCHEMA_VERSION: u16 = 1;

const MANIFEST_FILE: &str = "MANIFEST";

/// Longest hex-encoded name kept as is; leaves room for extensions under
/// the common 255-byte file name limit.
const MAX_HEX_NAME: usize = 200;
const LOCK_FILE: &str = "LOCK";
const RECORDS_DIR: &str = "records";
const META_DIR: &str = "meta";
const RECORD_EXT: &str = "cbor";
const META_EXT: &str = "bin";
const TEMP_EXT: &str = "tmp";

/// A durable record store backed by a directory.
///
/// The store holds an exclusive lock on its directory for its whole
/// lifetime. Only one `FileStore` can be open per directory at a time.
///
/// # Example
///
/// ```no_run
/// use vaultsync_storage::{FileStore, Record, RecordStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("chats")).unwrap();
/// store.put(&Record::new("c1", "Trip planning", 0)).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    schema_version: u16,
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store at `path`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Locked`] if another process holds the store
    /// - [`StorageError::UnsupportedVersion`] if a newer build wrote it
    /// - [`StorageError::Corrupted`] if the manifest is unreadable
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;
        if !path.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a directory: {}", path.display()),
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.to_path_buf()));
        }

        fs::create_dir_all(path.join(RECORDS_DIR))?;
        fs::create_dir_all(path.join(META_DIR))?;

        let mut store = Self {
            path: path.to_path_buf(),
            schema_version: SCHEMA_VERSION,
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        };
        store.schema_version = store.load_or_init_manifest()?;
        Ok(store)
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the schema version recorded in the manifest.
    #[must_use]
    pub fn schema_version(&self) -> u16 {
        self.schema_version
    }

    fn load_or_init_manifest(&self) -> StorageResult<u16> {
        let manifest_path = self.path.join(MANIFEST_FILE);

        if !manifest_path.exists() {
            self.write_manifest(SCHEMA_VERSION)?;
            return Ok(SCHEMA_VERSION);
        }

        let data = fs::read(&manifest_path)?;
        if data.len() < 6 || data[..4] != STORE_MAGIC {
            return Err(StorageError::Corrupted("bad manifest magic".into()));
        }

        let found = u16::from_le_bytes([data[4], data[5]]);
        if found > SCHEMA_VERSION {
            return Err(StorageError::UnsupportedVersion {
                found,
                supported: SCHEMA_VERSION,
            });
        }

        if found < SCHEMA_VERSION {
            info!(from = found, to = SCHEMA_VERSION, "upgrading record store schema");
            self.write_manifest(SCHEMA_VERSION)?;
        }

        Ok(SCHEMA_VERSION)
    }

    fn write_manifest(&self, version: u16) -> StorageResult<()> {
        let mut data = Vec::with_capacity(6);
        data.extend_from_slice(&STORE_MAGIC);
        data.extend_from_slice(&version.to_le_bytes());
        self.write_atomic(&self.path, MANIFEST_FILE, &data)
    }

    fn record_path(&self, id: &RecordId) -> PathBuf {
        self.path
            .join(RECORDS_DIR)
            .join(format!("{}.{RECORD_EXT}", encoded_name(id.as_str())))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.path
            .join(META_DIR)
            .join(format!("{}.{META_EXT}", encoded_name(key)))
    }

    /// Writes `data` to `dir/name` atomically.
    fn write_atomic(&self, dir: &Path, name: &str, data: &[u8]) -> StorageResult<()> {
        let target = dir.join(name);
        let temp = dir.join(format!("{name}.{TEMP_EXT}"));

        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &target)?;
        sync_directory(dir)
    }

    fn remove_file(&self, path: &Path) -> StorageResult<bool> {
        match fs::remove_file(path) {
            Ok(()) => {
                if let Some(parent) = path.parent() {
                    sync_directory(parent)?;
                }
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn encoded_name(raw: &str) -> String {
    let name = hex::encode(raw);
    if name.len() <= MAX_HEX_NAME {
        name
    } else {
        format!("h{}", hex::encode(Sha256::digest(raw.as_bytes())))
    }
}

fn decode_record(data: &[u8]) -> StorageResult<Record> {
    ciborium::from_reader(data).map_err(|e| StorageError::Corrupted(e.to_string()))
}

fn file_name(path: &Path) -> StorageResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| StorageError::Corrupted(format!("bad path: {}", path.display())))
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> StorageResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> StorageResult<()> {
    // NTFS journaling covers rename durability.
    Ok(())
}

impl RecordStore for FileStore {
    fn get(&self, id: &RecordId) -> StorageResult<Option<Record>> {
        match fs::read(self.record_path(id)) {
            Ok(data) => decode_record(&data).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, record: &Record) -> StorageResult<()> {
        let mut data = Vec::new();
        ciborium::into_writer(record, &mut data)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;

        let path = self.record_path(&record.id);
        let name = file_name(&path)?;

        let _guard = self.write_lock.lock();
        self.write_atomic(&self.path.join(RECORDS_DIR), &name, &data)
    }

    fn delete(&self, id: &RecordId) -> StorageResult<bool> {
        let _guard = self.write_lock.lock();
        self.remove_file(&self.record_path(id))
    }

    fn list(&self) -> StorageResult<Vec<Record>> {
        let mut records = Vec::new();

        for entry in fs::read_dir(self.path.join(RECORDS_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }

            // Deleted between read_dir and read.
            let data = match fs::read(&path) {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match decode_record(&data) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
            }
        }

        Ok(records)
    }

    fn get_meta(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(self.meta_path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put_meta(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let path = self.meta_path(key);
        let name = file_name(&path)?;

        let _guard = self.write_lock.lock();
        self.write_atomic(&self.path.join(META_DIR), &name, value)
    }

    fn delete_meta(&self, key: &str) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        self.remove_file(&self.meta_path(key)).map(|_| ())
    }

    fn clear(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        for dir in [RECORDS_DIR, META_DIR] {
            let dir = self.path.join(dir);
            fs::remove_dir_all(&dir)?;
            fs::create_dir_all(&dir)?;
        }
        sync_directory(&self.path)
    }

    fn is_durable(&self) -> bool {
        true
    }
}
