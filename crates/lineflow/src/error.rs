//! Error types for the connector

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Connector error type
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Invalid mode '{0}': expected static, streaming or streaming_with_deletions")]
    InvalidMode(String),

    #[error("Invalid autocommit duration: {0}ms (must be positive)")]
    InvalidAutocommit(u64),

    #[error("Invalid persistent id: {0}")]
    InvalidPersistentId(String),

    #[error("Persistent id '{0}' is already claimed by another source")]
    PersistentIdInUse(String),

    #[error("Failed to read {}: {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Commit {seq} rejected after {attempts} attempt(s): {message}")]
    CommitRejected {
        seq: u64,
        attempts: u32,
        message: String,
    },

    #[error("Checkpoint write failed for '{persistent_id}': {message}")]
    CheckpointWrite {
        persistent_id: String,
        message: String,
    },

    #[error("Checkpoint read failed for '{persistent_id}': {message}")]
    CheckpointRead {
        persistent_id: String,
        message: String,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("No tokio runtime available to drive the connector")]
    NoRuntime,

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ConnectorError>;
