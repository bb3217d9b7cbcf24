//! Downstream consumers of committed batches.

use crate::types::{ChangeEvent, CommitBatch, RowKey};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

/// A sink refused a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkRejection {
    pub message: String,
    /// The same batch may be offered again.
    pub retryable: bool,
}

impl SinkRejection {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl fmt::Display for SinkRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Receives commits in increasing sequence order.
///
/// A rejected batch is offered again with identical contents and sequence number.
/// After a restart the last batch may be offered again under the same sequence
/// number with more events than before, so applying a batch must be idempotent per
/// event rather than per sequence number.
#[async_trait]
pub trait CommitSink: Send {
    /// Apply `batch` atomically, or reject it.
    async fn accept(&mut self, batch: &CommitBatch) -> Result<(), SinkRejection>;
}

/// Forwards batches to a channel; backs [`crate::RowStream`].
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<CommitBatch>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CommitBatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl CommitSink for ChannelSink {
    async fn accept(&mut self, batch: &CommitBatch) -> Result<(), SinkRejection> {
        self.tx
            .send(batch.clone())
            .map_err(|_| SinkRejection::permanent("row stream receiver dropped"))
    }
}

/// One row held by a [`TableSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub file: PathBuf,
    pub seq: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct TableState {
    rows: BTreeMap<RowKey, TableRow>,
    last_seq: u64,
    batches_applied: u64,
    replays: u64,
}

/// In-memory keyed table: insertions upsert, deletions remove.
///
/// Every batch is applied, replays included; upsert and remove by [`RowKey`] make a
/// replay harmless. Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct TableSink {
    state: Arc<Mutex<TableState>>,
}

impl TableSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().rows.is_empty()
    }

    pub fn last_seq(&self) -> u64 {
        self.lock().last_seq
    }

    pub fn batches_applied(&self) -> u64 {
        self.lock().batches_applied
    }

    /// Batches offered again at or below the highest sequence number seen.
    pub fn replays(&self) -> u64 {
        self.lock().replays
    }

    /// Rows ordered by file, then line number.
    pub fn rows(&self) -> Vec<TableRow> {
        let mut rows: Vec<TableRow> = self.lock().rows.values().cloned().collect();
        rows.sort_by(|a, b| a.file.cmp(&b.file).then(a.seq.cmp(&b.seq)));
        rows
    }

    /// Row contents as text, ordered like [`TableSink::rows`].
    pub fn texts(&self) -> Vec<String> {
        self.rows()
            .into_iter()
            .map(|row| String::from_utf8_lossy(&row.data).into_owned())
            .collect()
    }

    fn apply(&self, batch: &CommitBatch) {
        let mut state = self.lock();
        if batch.seq <= state.last_seq {
            debug!(seq = batch.seq, last_seq = state.last_seq, "Re-applying replayed batch");
            state.replays += 1;
        }

        for event in &batch.events {
            match event {
                ChangeEvent::Insertion(record) => {
                    state.rows.insert(
                        record.key(),
                        TableRow {
                            file: record.id.file.clone(),
                            seq: record.id.seq,
                            data: record.data.clone(),
                        },
                    );
                }
                ChangeEvent::Deletion(id) => {
                    state.rows.remove(&id.key);
                }
            }
        }
        state.last_seq = state.last_seq.max(batch.seq);
        state.batches_applied += 1;
    }
}

#[async_trait]
impl CommitSink for TableSink {
    async fn accept(&mut self, batch: &CommitBatch) -> Result<(), SinkRejection> {
        self.apply(batch);
        Ok(())
    }
}
