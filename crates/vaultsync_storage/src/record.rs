//! Conversation records as stored on the device.
//!
//! This is the plaintext side of the system. Encryption only happens at
//! the remote boundary; device-local storage is trusted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable opaque identifier of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Author of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human user.
    User,
    /// The model.
    Assistant,
    /// Injected instructions.
    System,
}

/// Reference to an encrypted attachment stored next to the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Attachment identifier.
    pub id: String,
    /// Original file name.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Per-attachment key in `key_<hex>` form.
    #[serde(default)]
    pub key: Option<String>,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Who wrote it.
    pub role: Role,
    /// Primary content.
    pub content: String,
    /// Secondary content such as model reasoning.
    #[serde(default)]
    pub thoughts: Option<String>,
    /// Unix milliseconds.
    pub timestamp: u64,
    /// Attached files.
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

impl Entry {
    /// Creates an entry without thoughts or attachments.
    pub fn new(role: Role, content: impl Into<String>, timestamp: u64) -> Self {
        Self {
            role,
            content: content.into(),
            thoughts: None,
            timestamp,
            attachments: Vec::new(),
        }
    }

    /// Sets the secondary content.
    #[must_use]
    pub fn with_thoughts(mut self, thoughts: impl Into<String>) -> Self {
        self.thoughts = Some(thoughts.into());
        self
    }
}

/// A persisted conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Stable identifier.
    pub id: RecordId,
    /// Display title.
    pub title: String,
    /// Ordered entries. Replaced wholesale on save, never reordered.
    pub entries: Vec<Entry>,
    /// Creation time, Unix milliseconds.
    pub created_at: u64,
    /// Last-modified marker, Unix milliseconds.
    pub updated_at: u64,
    /// Placeholder created before the first entry. Never uploaded.
    #[serde(default)]
    pub is_blank: bool,
    /// Not yet acknowledged by the remote store.
    #[serde(default)]
    pub pending: bool,
    /// Version assigned by the remote store on the last acknowledged push.
    #[serde(default)]
    pub remote_version: Option<u64>,
}

impl Record {
    /// Creates an empty placeholder record.
    #[must_use]
    pub fn blank(now: u64) -> Self {
        Self {
            id: RecordId::generate(),
            title: String::new(),
            entries: Vec::new(),
            created_at: now,
            updated_at: now,
            is_blank: true,
            pending: false,
            remote_version: None,
        }
    }

    /// Creates a titled record with no entries.
    pub fn new(id: impl Into<RecordId>, title: impl Into<String>, now: u64) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            entries: Vec::new(),
            created_at: now,
            updated_at: now,
            is_blank: false,
            pending: false,
            remote_version: None,
        }
    }

    /// Appends an entry. The record stops being a placeholder.
    pub fn push_entry(&mut self, entry: Entry) {
        self.entries.push(entry);
        self.is_blank = false;
    }

    /// Returns true once the record holds at least one entry.
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.entries.is_empty()
    }
}
