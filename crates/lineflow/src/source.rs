//! Data sources feeding the ingestion loop.
//!
//! [`FilesystemSource`] scans a real path; [`InMemorySource`] replays declared rows
//! without touching the filesystem. Both produce [`ScanOutput`] for the loop.

use crate::error::{ConnectorError, Result};
use crate::glob::FileGlob;
use crate::reader::run_reads;
use crate::tracker::{CandidateFile, FileTracker, ScanOutput, ScanStats};
use crate::types::{ChangeEvent, LineRecord};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug)]
pub enum DataSource {
    Filesystem(FilesystemSource),
    InMemory(InMemorySource),
}

impl DataSource {
    /// Run one scan. `Ok(None)` means the scan was skipped and state is unchanged.
    ///
    /// Tracker state is only touched after every worker result is in, so dropping
    /// this future part way leaves the source exactly as it was.
    pub async fn scan(&mut self) -> Result<Option<ScanOutput>> {
        match self {
            DataSource::Filesystem(source) => source.scan().await,
            DataSource::InMemory(source) => Ok(source.scan()),
        }
    }

    /// No further scan can produce events.
    pub fn is_drained(&self) -> bool {
        match self {
            DataSource::Filesystem(_) => false,
            DataSource::InMemory(source) => source.drained,
        }
    }

    /// Tracker entries to checkpoint. In-memory sources have none.
    pub fn snapshot(&self) -> Vec<CandidateFile> {
        match self {
            DataSource::Filesystem(source) => source.tracker.snapshot(),
            DataSource::InMemory(_) => Vec::new(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            DataSource::Filesystem(source) => source.glob.root().path().display().to_string(),
            DataSource::InMemory(source) => source.name.display().to_string(),
        }
    }
}

#[derive(Debug)]
pub struct FilesystemSource {
    glob: FileGlob,
    tracker: FileTracker,
}

impl FilesystemSource {
    pub fn new(glob: FileGlob, tracker: FileTracker) -> Self {
        Self { glob, tracker }
    }

    async fn scan(&mut self) -> Result<Option<ScanOutput>> {
        let started = Instant::now();

        let glob = self.glob.clone();
        let listing = match tokio::task::spawn_blocking(move || glob.discover())
            .await
            .map_err(|e| ConnectorError::TaskFailed(format!("listing worker: {e}")))?
        {
            Ok(listing) => listing,
            Err(ConnectorError::PathNotFound(path)) => {
                warn!(path = %path.display(), "Source directory missing - skipping scan");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut plan = self.tracker.plan(&listing);
        let reads = std::mem::take(&mut plan.reads);
        let outcomes = tokio::task::spawn_blocking(move || run_reads(&reads))
            .await
            .map_err(|e| ConnectorError::TaskFailed(format!("read worker: {e}")))?;

        let mut output = self.tracker.apply(plan, outcomes);
        output.stats.duration_ms = started.elapsed().as_millis() as u64;
        log_scan(&self.glob, &output.stats);
        Ok(Some(output))
    }
}

fn log_scan(glob: &FileGlob, stats: &ScanStats) {
    info!(
        root = %glob.root().path().display(),
        discovered = stats.files_discovered,
        new = stats.files_new,
        modified = stats.files_modified,
        removed = stats.files_removed,
        read_errors = stats.read_errors,
        insertions = stats.insertions,
        deletions = stats.deletions,
        duration_ms = stats.duration_ms,
        "Scan complete"
    );
}

/// Declared rows, emitted once as if read from a single file named `name`.
#[derive(Debug)]
pub struct InMemorySource {
    name: PathBuf,
    rows: Vec<Vec<u8>>,
    drained: bool,
}

impl InMemorySource {
    pub fn new(name: impl Into<PathBuf>, rows: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            rows,
            drained: false,
        }
    }

    fn scan(&mut self) -> Option<ScanOutput> {
        if self.drained {
            return None;
        }
        self.drained = true;

        let events: Vec<ChangeEvent> = std::mem::take(&mut self.rows)
            .into_iter()
            .enumerate()
            .map(|(seq, data)| ChangeEvent::Insertion(LineRecord::new(&self.name, seq as u64, data)))
            .collect();
        let stats = ScanStats {
            files_discovered: 1,
            files_new: 1,
            insertions: events.len() as u64,
            ..ScanStats::default()
        };
        Some(ScanOutput { events, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_source_emits_once() {
        let mut source = DataSource::InMemory(InMemorySource::new(
            "debug",
            vec![b"a".to_vec(), b"b".to_vec()],
        ));
        assert!(!source.is_drained());

        let output = source.scan().await.unwrap().unwrap();
        assert_eq!(output.events.len(), 2);
        assert_eq!(output.stats.insertions, 2);
        assert!(source.is_drained());
        assert!(source.scan().await.unwrap().is_none());
        assert!(source.snapshot().is_empty());
    }
}
