//! Commit batching and delivery.
//!
//! Events accumulate between flushes. A flush seals everything pending into one
//! [`CommitBatch`] with the next sequence number; delivery retries that exact batch
//! until the sink accepts it or the retry budget runs out.

use crate::config::RetryConfig;
use crate::error::{ConnectorError, Result};
use crate::sink::CommitSink;
use crate::types::{ChangeEvent, CommitBatch};
use chrono::Utc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::{error, warn};

#[derive(Debug)]
pub struct CommitBatcher {
    pending: Vec<ChangeEvent>,
    autocommit: Option<Duration>,
    /// When the oldest pending event arrived.
    opened_at: Option<Instant>,
    next_seq: u64,
}

impl CommitBatcher {
    /// `autocommit: None` disables time-based flushing.
    pub fn new(autocommit: Option<Duration>) -> Self {
        Self::resume(autocommit, None)
    }

    /// Continue numbering after `last_seq`.
    pub fn resume(autocommit: Option<Duration>, last_seq: Option<u64>) -> Self {
        Self {
            pending: Vec::new(),
            autocommit,
            opened_at: None,
            next_seq: last_seq.map_or(1, |seq| seq + 1),
        }
    }

    pub fn push(&mut self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        self.opened_at.get_or_insert_with(Instant::now);
        self.pending.extend(events);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// When the pending batch must be flushed, if time-based flushing applies.
    pub fn deadline(&self) -> Option<Instant> {
        Some(self.opened_at? + self.autocommit?)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Take all pending events as the next batch. Nothing pending, no batch.
    pub fn seal(&mut self) -> Option<CommitBatch> {
        if self.pending.is_empty() {
            return None;
        }
        let batch = CommitBatch {
            seq: self.next_seq,
            committed_at: Utc::now(),
            events: std::mem::take(&mut self.pending),
        };
        self.next_seq += 1;
        self.opened_at = None;
        Some(batch)
    }
}

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
    pub jitter_ms: u64,
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: Duration::from_millis(config.base_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            jitter_ms: config.jitter_ms,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(factor).min(self.max)
    }

    fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = if self.jitter_ms == 0 {
            0
        } else {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.subsec_nanos() as u64 % self.jitter_ms)
                .unwrap_or(0)
        };
        self.backoff(attempt) + Duration::from_millis(jitter_ms)
    }
}

/// Offer `batch` to `sink` until accepted. Returns the number of attempts used.
pub async fn deliver(
    sink: &mut dyn CommitSink,
    batch: &CommitBatch,
    policy: &RetryPolicy,
) -> Result<u32> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match sink.accept(batch).await {
            Ok(()) => return Ok(attempt),
            Err(rejection) if rejection.retryable && attempt < policy.max_attempts => {
                let delay = policy.delay(attempt);
                warn!(
                    seq = batch.seq,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %rejection,
                    "Commit rejected - retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(rejection) => {
                error!(
                    seq = batch.seq,
                    attempts = attempt,
                    reason = %rejection,
                    "Commit rejected - giving up"
                );
                return Err(ConnectorError::CommitRejected {
                    seq: batch.seq,
                    attempts: attempt,
                    message: rejection.message,
                });
            }
        }
    }
}
