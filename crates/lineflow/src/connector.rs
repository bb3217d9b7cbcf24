//! The ingestion loop.
//!
//! One task owns the source, its tracker and the batcher. Listing and reading run
//! on blocking workers; their results come back to this task and are applied in a
//! single step. The loop:
//!
//! 1. scan when the rescan timer fires (once, for static sources)
//! 2. flush when the autocommit deadline passes
//! 3. sleep until the next of those, or until cancelled
//!
//! On cancellation the pending batch is flushed before the loop exits.

use crate::batcher::{deliver, CommitBatcher, RetryPolicy};
use crate::checkpoint::CheckpointManager;
use crate::error::Result;
use crate::mode::ModePolicy;
use crate::sink::CommitSink;
use crate::source::DataSource;
use serde::Serialize;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Totals over a connector's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectorStats {
    pub scans: u64,
    pub commits: u64,
    pub insertions: u64,
    pub deletions: u64,
    pub read_errors: u64,
}

pub struct Connector {
    source: DataSource,
    policy: ModePolicy,
    batcher: CommitBatcher,
    sink: Box<dyn CommitSink>,
    checkpoint: Option<CheckpointManager>,
    retry: RetryPolicy,
    rescan_interval: Duration,
    cancel: CancellationToken,
    stats: ConnectorStats,
}

impl Connector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: DataSource,
        policy: ModePolicy,
        batcher: CommitBatcher,
        sink: Box<dyn CommitSink>,
        checkpoint: Option<CheckpointManager>,
        retry: RetryPolicy,
        rescan_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            policy,
            batcher,
            sink,
            checkpoint,
            retry,
            rescan_interval,
            cancel,
            stats: ConnectorStats::default(),
        }
    }

    /// Run until the source is drained, the token is cancelled, or a fatal error.
    pub async fn run(mut self) -> Result<ConnectorStats> {
        let source = self.source.describe();
        info!(
            source = %source,
            persistent_id = ?self.checkpoint.as_ref().map(|c| c.id().to_string()),
            next_seq = self.batcher.next_seq(),
            "Connector started"
        );

        match self.run_loop().await {
            Ok(()) => {
                info!(
                    source = %source,
                    scans = self.stats.scans,
                    commits = self.stats.commits,
                    insertions = self.stats.insertions,
                    deletions = self.stats.deletions,
                    "Connector stopped"
                );
                Ok(self.stats)
            }
            Err(e) => {
                error!(source = %source, error = %e, "Connector failed");
                Err(e)
            }
        }
    }

    async fn run_loop(&mut self) -> Result<()> {
        let cancel = self.cancel.clone();
        let mut next_scan = Instant::now();

        loop {
            if Instant::now() >= next_scan {
                let scanned = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("Stop requested during scan - discarding it");
                        break;
                    }
                    result = self.source.scan() => result?,
                };
                self.stats.scans += 1;
                if let Some(output) = scanned {
                    self.stats.read_errors += output.stats.read_errors;
                    self.batcher.push(output.events);
                }
                next_scan = Instant::now() + self.rescan_interval;

                if !self.policy.rescan || self.source.is_drained() {
                    break;
                }
            }

            if self.batcher.is_due(Instant::now()) {
                self.flush().await?;
            }

            let wake = match self.batcher.deadline() {
                Some(deadline) => deadline.min(next_scan),
                None => next_scan,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep_until(wake) => {}
            }
        }

        self.flush().await
    }

    /// Seal, deliver and checkpoint everything pending.
    async fn flush(&mut self) -> Result<()> {
        let Some(batch) = self.batcher.seal() else {
            return Ok(());
        };

        let attempts = deliver(self.sink.as_mut(), &batch, &self.retry).await?;
        if let Some(checkpoint) = &self.checkpoint {
            checkpoint.commit(batch.seq, self.source.snapshot()).await?;
        }

        let insertions = batch.insertions().count() as u64;
        let deletions = batch.deletions().count() as u64;
        self.stats.commits += 1;
        self.stats.insertions += insertions;
        self.stats.deletions += deletions;
        debug!(seq = batch.seq, insertions, deletions, attempts, "Committed batch");
        Ok(())
    }
}
