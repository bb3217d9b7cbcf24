//! Core data types: line records, change events and commit batches

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

/// Modification time and size observed for a file.
///
/// Two observations with equal stamps are treated as the same content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FileStamp {
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: u64,
    pub size: u64,
}

impl FileStamp {
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            mtime_ns,
            size: metadata.len(),
        }
    }
}

/// Stable row identity, derived from the source file and line sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(u128);

impl RowKey {
    pub fn for_line(source: &Path, seq: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        hasher.update(&seq.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        Self(u128::from_le_bytes(bytes))
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Identity of an emitted line: enough to retract it later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub key: RowKey,
    pub file: PathBuf,
    /// Zero-based line number within the file.
    pub seq: u64,
}

impl RecordId {
    pub fn new(file: &Path, seq: u64) -> Self {
        Self {
            key: RowKey::for_line(file, seq),
            file: file.to_path_buf(),
            seq,
        }
    }
}

/// A single line read from a source file, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRecord {
    pub id: RecordId,
    pub data: Vec<u8>,
}

impl LineRecord {
    pub fn new(file: &Path, seq: u64, data: Vec<u8>) -> Self {
        Self {
            id: RecordId::new(file, seq),
            data,
        }
    }

    pub fn key(&self) -> RowKey {
        self.id.key
    }

    /// Line contents as text; invalid UTF-8 is replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// The unit grouped into commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Insertion(LineRecord),
    Deletion(RecordId),
}

impl ChangeEvent {
    pub fn id(&self) -> &RecordId {
        match self {
            ChangeEvent::Insertion(record) => &record.id,
            ChangeEvent::Deletion(id) => id,
        }
    }

    pub fn is_insertion(&self) -> bool {
        matches!(self, ChangeEvent::Insertion(_))
    }

    /// +1 for an insertion, -1 for a retraction.
    pub fn diff(&self) -> i64 {
        if self.is_insertion() {
            1
        } else {
            -1
        }
    }
}

/// An atomic, ordered group of events handed downstream.
///
/// Sequence numbers start at 1 and are never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitBatch {
    pub seq: u64,
    pub committed_at: DateTime<Utc>,
    pub events: Vec<ChangeEvent>,
}

impl CommitBatch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn insertions(&self) -> impl Iterator<Item = &LineRecord> {
        self.events.iter().filter_map(|event| match event {
            ChangeEvent::Insertion(record) => Some(record),
            ChangeEvent::Deletion(_) => None,
        })
    }

    pub fn deletions(&self) -> impl Iterator<Item = &RecordId> {
        self.events.iter().filter_map(|event| match event {
            ChangeEvent::Deletion(id) => Some(id),
            ChangeEvent::Insertion(_) => None,
        })
    }
}
