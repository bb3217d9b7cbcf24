//! Lineflow - Streaming Plaintext File Connector
//!
//! Lineflow turns a file or directory into an ordered, incrementally updated stream
//! of line records, grouped into atomic commits for a downstream engine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌───────────────┐
//! │  FileGlob   │     │ FileTracker │     │  Batcher    │     │  CommitSink   │
//! │ (list +     │────▶│ (new/mod/   │────▶│ (autocommit │────▶│ (RowStream,   │
//! │  order)     │     │  removed)   │     │  + retry)   │     │  TableSink)   │
//! └─────────────┘     └─────────────┘     └─────────────┘     └───────┬───────┘
//!                                                                     │
//!                                                             ┌───────▼───────┐
//!                                                             │  Checkpoint   │
//!                                                             └───────────────┘
//! ```
//!
//! # Core Concepts
//!
//! - **Mode**: `static` reads once; `streaming` keeps tailing; `streaming_with_deletions`
//!   also retracts rows of removed or rewritten files
//! - **Commit**: an atomic batch of insertions and deletions with a sequence number
//! - **Persistent id**: names a checkpoint so a restart resumes without duplicates
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> lineflow::Result<()> {
//! use lineflow::{read, ReadMode, ReadOptions};
//!
//! let mut rows = read("/var/log/app", ReadOptions::new().mode(ReadMode::Static))?;
//! while let Some(batch) = rows.next_batch().await {
//!     for record in batch.insertions() {
//!         println!("{}", record.text());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod batcher;
pub mod checkpoint;
pub mod config;
pub mod connector;
pub mod error;
pub mod glob;
pub mod mode;
pub mod patterns;
pub mod read;
pub mod reader;
pub mod scan_path;
pub mod sink;
pub mod source;
pub mod splitter;
pub mod tracker;
pub mod types;

// Re-exports for convenience
pub use checkpoint::{
    CheckpointState, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, PersistentId,
};
pub use config::{ConnectorConfig, RetryConfig};
pub use connector::ConnectorStats;
pub use error::{ConnectorError, Result};
pub use mode::ReadMode;
pub use read::{read, read_into, Autocommit, ConnectorHandle, ReadOptions, RowStream};
pub use sink::{ChannelSink, CommitSink, SinkRejection, TableRow, TableSink};
pub use tracker::{CandidateFile, ScanStats};
pub use types::{ChangeEvent, CommitBatch, FileStamp, LineRecord, RecordId, RowKey};
