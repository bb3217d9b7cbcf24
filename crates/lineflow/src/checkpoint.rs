//! Checkpoint persistence
//!
//! A checkpoint is the tracker's file table plus the last committed sequence number,
//! stored as one JSON document per persistent id. It is written after the sink has
//! accepted a batch, so a crash in between re-emits at most that batch on restart.

use crate::error::{ConnectorError, Result};
use crate::mode::ReadMode;
use crate::tracker::CandidateFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::{debug, info, warn};

pub const CHECKPOINT_VERSION: u32 = 1;

/// Validated persistence identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PersistentId(String);

impl PersistentId {
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConnectorError::InvalidPersistentId(
                "must not be empty".to_string(),
            ));
        }
        if trimmed.len() > 255 {
            return Err(ConnectorError::InvalidPersistentId(format!(
                "'{}...' exceeds 255 bytes",
                &trimmed[..trimmed.char_indices().nth(16).map_or(trimmed.len(), |(i, _)| i)]
            )));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(ConnectorError::InvalidPersistentId(format!(
                "'{}' contains control characters",
                trimmed.escape_debug()
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersistentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted connector state for one persistent id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub version: u32,
    pub persistent_id: String,
    /// Source the state was recorded for.
    pub source: String,
    pub mode: ReadMode,
    pub last_commit_seq: Option<u64>,
    pub files: Vec<CandidateFile>,
    pub saved_at: DateTime<Utc>,
}

/// Durable key-value store for serialized checkpoints.
///
/// `put` must be atomic: a reader sees either the previous document or the new one.
pub trait CheckpointStore: Send + Sync + fmt::Debug {
    fn get(&self, id: &PersistentId) -> Result<Option<Vec<u8>>>;

    fn put(&self, id: &PersistentId, bytes: &[u8]) -> Result<()>;

    /// Reserve `id` for one running source in this process.
    fn claim(&self, id: &PersistentId) -> Result<()>;

    fn release(&self, id: &PersistentId);
}

fn claims() -> MutexGuard<'static, HashSet<(PathBuf, String)>> {
    static CLAIMS: OnceLock<Mutex<HashSet<(PathBuf, String)>>> = OnceLock::new();
    CLAIMS
        .get_or_init(|| Mutex::new(HashSet::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One JSON file per persistent id under a directory.
///
/// Claims are process-wide per directory, so two stores over the same directory
/// cannot hand out the same id twice.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name: sanitized id plus a digest suffix so distinct ids never collide.
    pub fn path_for(&self, id: &PersistentId) -> PathBuf {
        let digest = blake3::hash(id.as_str().as_bytes()).to_hex();
        let name = format!(
            "{}-{}.checkpoint.json",
            lineflow_logging::sanitize_name(id.as_str()),
            &digest.as_str()[..12]
        );
        self.dir.join(name)
    }

    fn claim_key(&self, id: &PersistentId) -> (PathBuf, String) {
        (self.dir.clone(), id.as_str().to_string())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn get(&self, id: &PersistentId) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConnectorError::CheckpointRead {
                persistent_id: id.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn put(&self, id: &PersistentId, bytes: &[u8]) -> Result<()> {
        let write_err = |e: std::io::Error| ConnectorError::CheckpointWrite {
            persistent_id: id.to_string(),
            message: e.to_string(),
        };

        fs::create_dir_all(&self.dir).map_err(write_err)?;
        let final_path = self.path_for(id);
        let tmp_path = final_path.with_extension("json.tmp");

        let mut file = File::create(&tmp_path).map_err(write_err)?;
        file.write_all(bytes).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        // Atomic rename from .tmp to final location
        fs::rename(&tmp_path, &final_path).map_err(write_err)?;
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    fn claim(&self, id: &PersistentId) -> Result<()> {
        if claims().insert(self.claim_key(id)) {
            Ok(())
        } else {
            Err(ConnectorError::PersistentIdInUse(id.to_string()))
        }
    }

    fn release(&self, id: &PersistentId) {
        claims().remove(&self.claim_key(id));
    }
}

/// Non-durable store for tests and embedding. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    documents: HashMap<String, Vec<u8>>,
    claimed: HashSet<String>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Decoded document for `id`, if one has been stored.
    pub fn state(&self, id: &str) -> Option<CheckpointState> {
        let inner = self.lock();
        let bytes = inner.documents.get(id)?;
        serde_json::from_slice(bytes).ok()
    }

    /// Overwrite the raw document for `id`.
    pub fn insert_raw(&self, id: &str, bytes: Vec<u8>) {
        self.lock().documents.insert(id.to_string(), bytes);
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn get(&self, id: &PersistentId) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().documents.get(id.as_str()).cloned())
    }

    fn put(&self, id: &PersistentId, bytes: &[u8]) -> Result<()> {
        self.lock()
            .documents
            .insert(id.as_str().to_string(), bytes.to_vec());
        Ok(())
    }

    fn claim(&self, id: &PersistentId) -> Result<()> {
        if self.lock().claimed.insert(id.as_str().to_string()) {
            Ok(())
        } else {
            Err(ConnectorError::PersistentIdInUse(id.to_string()))
        }
    }

    fn release(&self, id: &PersistentId) {
        self.lock().claimed.remove(id.as_str());
    }
}

/// Restores and records state for one claimed persistent id.
///
/// The claim is released when the manager is dropped.
#[derive(Debug)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    id: PersistentId,
    source: String,
    mode: ReadMode,
}

impl CheckpointManager {
    /// Claim `id` and load its last state.
    ///
    /// A missing, unreadable or corrupt checkpoint, or one recorded for a different
    /// source, yields `None`: the source is ingested from scratch.
    pub fn open(
        store: Arc<dyn CheckpointStore>,
        id: PersistentId,
        source: String,
        mode: ReadMode,
    ) -> Result<(Self, Option<CheckpointState>)> {
        store.claim(&id)?;
        let manager = Self {
            store,
            id,
            source,
            mode,
        };
        let restored = manager.load();
        Ok((manager, restored))
    }

    pub fn id(&self) -> &PersistentId {
        &self.id
    }

    fn load(&self) -> Option<CheckpointState> {
        let bytes = match self.store.get(&self.id) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(persistent_id = %self.id, "No checkpoint found - cold start");
                return None;
            }
            Err(e) => {
                warn!(persistent_id = %self.id, error = %e, "Checkpoint unreadable - cold start");
                return None;
            }
        };

        let state: CheckpointState = match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                warn!(persistent_id = %self.id, error = %e, "Checkpoint corrupt - cold start");
                return None;
            }
        };

        if state.version != CHECKPOINT_VERSION {
            warn!(
                persistent_id = %self.id,
                version = state.version,
                "Unsupported checkpoint version - cold start"
            );
            return None;
        }
        if state.source != self.source {
            warn!(
                persistent_id = %self.id,
                recorded = %state.source,
                current = %self.source,
                "Checkpoint belongs to a different source - cold start"
            );
            return None;
        }
        if state.mode != self.mode {
            info!(
                persistent_id = %self.id,
                recorded = %state.mode,
                current = %self.mode,
                "Mode changed since last checkpoint"
            );
        }

        info!(
            persistent_id = %self.id,
            files = state.files.len(),
            last_commit_seq = ?state.last_commit_seq,
            "Restored checkpoint"
        );
        Some(state)
    }

    /// Durably record state after commit `seq` was accepted.
    pub async fn commit(&self, seq: u64, files: Vec<CandidateFile>) -> Result<()> {
        let state = CheckpointState {
            version: CHECKPOINT_VERSION,
            persistent_id: self.id.to_string(),
            source: self.source.clone(),
            mode: self.mode,
            last_commit_seq: Some(seq),
            files,
            saved_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&state).map_err(|e| ConnectorError::CheckpointWrite {
            persistent_id: self.id.to_string(),
            message: e.to_string(),
        })?;

        let store = Arc::clone(&self.store);
        let id = self.id.clone();
        tokio::task::spawn_blocking(move || store.put(&id, &bytes))
            .await
            .map_err(|e| ConnectorError::CheckpointWrite {
                persistent_id: self.id.to_string(),
                message: e.to_string(),
            })?
            .map_err(|e| match e {
                e @ ConnectorError::CheckpointWrite { .. } => e,
                other => ConnectorError::CheckpointWrite {
                    persistent_id: self.id.to_string(),
                    message: other.to_string(),
                },
            })?;

        debug!(persistent_id = %self.id, seq, "Checkpoint written");
        Ok(())
    }
}

impl Drop for CheckpointManager {
    fn drop(&mut self) {
        self.store.release(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileStamp;
    use tempfile::TempDir;

    fn id(raw: &str) -> PersistentId {
        PersistentId::new(raw).unwrap()
    }

    fn entry(path: &str, cursor: u64) -> CandidateFile {
        CandidateFile {
            path: PathBuf::from(path),
            stamp: FileStamp {
                mtime_ns: 1,
                size: cursor,
            },
            cursor,
            lines_emitted: 2,
            prefix_hash: "abc".to_string(),
            held_tail: false,
            tail_flushed: false,
            removed: false,
        }
    }

    fn open(
        store: Arc<dyn CheckpointStore>,
        raw: &str,
    ) -> (CheckpointManager, Option<CheckpointState>) {
        CheckpointManager::open(store, id(raw), "/data".to_string(), ReadMode::Streaming).unwrap()
    }

    #[test]
    fn persistent_id_validation() {
        assert!(PersistentId::new("  ").is_err());
        assert!(PersistentId::new("a\nb").is_err());
        assert!(PersistentId::new(&"x".repeat(300)).is_err());
        assert_eq!(id(" logs ").as_str(), "logs");
    }

    #[test]
    fn file_names_are_distinct_for_similar_ids() {
        let store = FileCheckpointStore::new("/tmp/ckpt");
        assert_ne!(store.path_for(&id("a/b")), store.path_for(&id("a_b")));
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn CheckpointStore> =
            Arc::new(FileCheckpointStore::new(temp.path().join("ckpt")));

        {
            let (manager, restored) = open(Arc::clone(&store), "logs");
            assert!(restored.is_none());
            manager.commit(3, vec![entry("/data/a.txt", 10)]).await.unwrap();
        }

        let (_manager, restored) = open(store, "logs");
        let state = restored.unwrap();
        assert_eq!(state.last_commit_seq, Some(3));
        assert_eq!(state.files, vec![entry("/data/a.txt", 10)]);
        assert!(fs::read_dir(temp.path().join("ckpt"))
            .unwrap()
            .all(|e| !e.unwrap().file_name().to_string_lossy().ends_with(".tmp")));
    }

    #[test]
    fn claims_are_exclusive_until_released() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let (first, _) = open(Arc::clone(&store), "dup");
        let err = CheckpointManager::open(
            Arc::clone(&store),
            id("dup"),
            "/data".to_string(),
            ReadMode::Streaming,
        )
        .unwrap_err();
        assert!(matches!(err, ConnectorError::PersistentIdInUse(_)));

        drop(first);
        open(store, "dup");
    }

    #[test]
    fn file_store_claims_span_instances() {
        let temp = TempDir::new().unwrap();
        let a = FileCheckpointStore::new(temp.path());
        let b = FileCheckpointStore::new(temp.path());
        a.claim(&id("shared")).unwrap();
        assert!(b.claim(&id("shared")).is_err());
        a.release(&id("shared"));
        b.claim(&id("shared")).unwrap();
        b.release(&id("shared"));
    }

    #[test]
    fn corrupt_checkpoint_is_a_cold_start() {
        let store = MemoryCheckpointStore::new();
        store.insert_raw("logs", b"{not json".to_vec());
        let (_manager, restored) = open(Arc::new(store), "logs");
        assert!(restored.is_none());
    }

    #[tokio::test]
    async fn checkpoint_for_other_source_is_ignored() {
        let store = MemoryCheckpointStore::new();
        {
            let (manager, _) = CheckpointManager::open(
                Arc::new(store.clone()),
                id("logs"),
                "/elsewhere".to_string(),
                ReadMode::Streaming,
            )
            .unwrap();
            manager.commit(1, Vec::new()).await.unwrap();
        }
        assert_eq!(store.state("logs").unwrap().source, "/elsewhere");

        let (_manager, restored) = open(Arc::new(store), "logs");
        assert!(restored.is_none());
    }
}
