//! Polling modes and the component policy each one selects.

use crate::error::ConnectorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the connector polls its source. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// One scan, one commit, then done.
    Static,
    /// Keep scanning; only insertions are emitted.
    #[default]
    Streaming,
    /// Keep scanning; removals and rewrites are retracted downstream.
    StreamingWithDeletions,
}

impl ReadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadMode::Static => "static",
            ReadMode::Streaming => "streaming",
            ReadMode::StreamingWithDeletions => "streaming_with_deletions",
        }
    }

    pub fn policy(&self) -> ModePolicy {
        match self {
            ReadMode::Static => ModePolicy {
                rescan: false,
                propagate_removals: false,
                retract_rewrites: false,
                flush_tails: true,
            },
            ReadMode::Streaming => ModePolicy {
                rescan: true,
                propagate_removals: false,
                retract_rewrites: false,
                flush_tails: false,
            },
            ReadMode::StreamingWithDeletions => ModePolicy {
                rescan: true,
                propagate_removals: true,
                retract_rewrites: true,
                flush_tails: false,
            },
        }
    }
}

impl fmt::Display for ReadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadMode {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(ReadMode::Static),
            "streaming" => Ok(ReadMode::Streaming),
            "streaming_with_deletions" => Ok(ReadMode::StreamingWithDeletions),
            other => Err(ConnectorError::InvalidMode(other.to_string())),
        }
    }
}

/// Knobs the tracker, splitter and loop read instead of matching on the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModePolicy {
    /// Scan again after the first pass.
    pub rescan: bool,
    /// Removed files retract every line they produced.
    pub propagate_removals: bool,
    /// Non-append modifications retract then re-insert the whole file.
    pub retract_rewrites: bool,
    /// Emit unterminated final lines immediately (the source is drained after one pass).
    pub flush_tails: bool,
}
