//! Public entry point: turn a path into a stream of committed batches.
//!
//! Construction errors (missing path, bad pattern, bad mode, bad autocommit,
//! claimed persistent id) are returned from [`read`] before anything is spawned.
//! Everything after that happens on a background task driven by the caller's
//! tokio runtime.

use crate::batcher::{CommitBatcher, RetryPolicy};
use crate::checkpoint::{CheckpointManager, CheckpointStore, FileCheckpointStore, PersistentId};
use crate::config::ConnectorConfig;
use crate::connector::{Connector, ConnectorStats};
use crate::error::{ConnectorError, Result};
use crate::glob::{FileGlob, GlobOptions};
use crate::mode::ReadMode;
use crate::patterns::MATCH_ALL;
use crate::scan_path::{canonicalize_scan_path, expand_scan_path, resolve_source_root};
use crate::sink::{ChannelSink, CommitSink};
use crate::source::{DataSource, FilesystemSource, InMemorySource};
use crate::tracker::FileTracker;
use crate::types::CommitBatch;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Name the rows of an in-memory source are attributed to.
pub const DEBUG_SOURCE_NAME: &str = "<debug_data>";

/// Flush cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Autocommit {
    /// `ConnectorConfig::default_autocommit_ms`
    #[default]
    Default,
    Millis(u64),
    /// Flush only when the source is drained or stopped.
    Disabled,
}

/// Per-source settings for [`read`].
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub mode: ReadMode,
    /// Shell-style pattern; only used when the path is a directory.
    pub object_pattern: String,
    pub persistent_id: Option<String>,
    pub autocommit: Autocommit,
    /// Rows to emit instead of reading the filesystem.
    pub debug_data: Option<Vec<String>>,
    pub config: Option<ConnectorConfig>,
    pub checkpoint_store: Option<Arc<dyn CheckpointStore>>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            mode: ReadMode::default(),
            object_pattern: MATCH_ALL.to_string(),
            persistent_id: None,
            autocommit: Autocommit::Default,
            debug_data: None,
            config: None,
            checkpoint_store: None,
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: ReadMode) -> Self {
        self.mode = mode;
        self
    }

    /// Parse `mode` ("static", "streaming", "streaming_with_deletions").
    pub fn mode_str(self, mode: &str) -> Result<Self> {
        Ok(self.mode(mode.parse()?))
    }

    pub fn object_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.object_pattern = pattern.into();
        self
    }

    pub fn persistent_id(mut self, id: impl Into<String>) -> Self {
        self.persistent_id = Some(id.into());
        self
    }

    pub fn autocommit_ms(mut self, ms: u64) -> Self {
        self.autocommit = Autocommit::Millis(ms);
        self
    }

    pub fn no_autocommit(mut self) -> Self {
        self.autocommit = Autocommit::Disabled;
        self
    }

    pub fn debug_data<I, S>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.debug_data = Some(rows.into_iter().map(Into::into).collect());
        self
    }

    pub fn config(mut self, config: ConnectorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    fn autocommit_duration(&self, config: &ConnectorConfig) -> Result<Option<Duration>> {
        match self.autocommit {
            Autocommit::Default => Ok(Some(Duration::from_millis(config.default_autocommit_ms))),
            Autocommit::Millis(0) => Err(ConnectorError::InvalidAutocommit(0)),
            Autocommit::Millis(ms) => Ok(Some(Duration::from_millis(ms))),
            Autocommit::Disabled => Ok(None),
        }
    }
}

/// Start ingesting `path`, delivering commits to the returned [`RowStream`].
///
/// Must be called from within a tokio runtime.
pub fn read(path: impl AsRef<Path>, options: ReadOptions) -> Result<RowStream> {
    let (sink, rx) = ChannelSink::channel();
    let handle = read_into(path, options, Box::new(sink))?;
    Ok(RowStream { rx, handle })
}

/// Like [`read`], but commits go to `sink`.
pub fn read_into(
    path: impl AsRef<Path>,
    options: ReadOptions,
    sink: Box<dyn CommitSink>,
) -> Result<ConnectorHandle> {
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| ConnectorError::NoRuntime)?;
    let config = options.config.clone().unwrap_or_default();
    config.validate()?;
    let autocommit = options.autocommit_duration(&config)?;
    let policy = options.mode.policy();

    if let Some(rows) = options.debug_data {
        debug!(rows = rows.len(), "Using in-memory source");
        let source = DataSource::InMemory(InMemorySource::new(
            DEBUG_SOURCE_NAME,
            rows.into_iter().map(String::into_bytes).collect(),
        ));
        let cancel = CancellationToken::new();
        let connector = Connector::new(
            source,
            policy,
            CommitBatcher::new(autocommit),
            sink,
            None,
            RetryPolicy::from(config.retry),
            rescan_interval(autocommit, &config),
            cancel.clone(),
        );
        return Ok(ConnectorHandle::spawn(&runtime, cancel, connector));
    }

    let scan_path = canonicalize_scan_path(&expand_scan_path(path.as_ref()));
    let root = resolve_source_root(&scan_path)?;
    let glob = FileGlob::new(
        root,
        &options.object_pattern,
        GlobOptions {
            follow_symlinks: config.follow_symlinks,
            include_hidden: config.include_hidden,
        },
    )?;

    let (checkpoint, restored) = match &options.persistent_id {
        Some(raw) => {
            let id = PersistentId::new(raw)?;
            let store: Arc<dyn CheckpointStore> = match options.checkpoint_store.clone() {
                Some(store) => store,
                None => Arc::new(FileCheckpointStore::new(config.checkpoint_dir.clone())),
            };
            let (manager, restored) = CheckpointManager::open(
                store,
                id,
                scan_path.display().to_string(),
                options.mode,
            )?;
            (Some(manager), restored)
        }
        None => (None, None),
    };

    let (tracker, last_seq) = match restored {
        Some(state) => (FileTracker::restore(policy, state.files), state.last_commit_seq),
        None => (FileTracker::new(policy), None),
    };

    let cancel = CancellationToken::new();
    let connector = Connector::new(
        DataSource::Filesystem(FilesystemSource::new(glob, tracker)),
        policy,
        CommitBatcher::resume(autocommit, last_seq),
        sink,
        checkpoint,
        RetryPolicy::from(config.retry),
        rescan_interval(autocommit, &config),
        cancel.clone(),
    );
    Ok(ConnectorHandle::spawn(&runtime, cancel, connector))
}

fn rescan_interval(autocommit: Option<Duration>, config: &ConnectorConfig) -> Duration {
    autocommit.unwrap_or_else(|| config.idle_poll_interval())
}

/// Controls a running connector. Dropping it stops the connector.
#[derive(Debug)]
pub struct ConnectorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<ConnectorStats>>>,
}

impl ConnectorHandle {
    fn spawn(
        runtime: &tokio::runtime::Handle,
        cancel: CancellationToken,
        connector: Connector,
    ) -> Self {
        Self {
            cancel,
            task: Some(runtime.spawn(connector.run())),
        }
    }

    /// Ask the connector to flush what it has and exit.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the connector to exit.
    pub async fn join(mut self) -> Result<ConnectorStats> {
        let Some(task) = self.task.take() else {
            return Err(ConnectorError::TaskFailed("connector already joined".to_string()));
        };
        task.await
            .map_err(|e| ConnectorError::TaskFailed(format!("connector task: {e}")))?
    }
}

impl Drop for ConnectorHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel.cancel();
        }
    }
}

/// Committed batches, in sequence order.
///
/// The stream ends once the connector exits: after one commit for static and
/// in-memory sources, after [`RowStream::stop`] for streaming ones.
#[derive(Debug)]
pub struct RowStream {
    rx: mpsc::UnboundedReceiver<CommitBatch>,
    handle: ConnectorHandle,
}

impl RowStream {
    /// Public row schema: the raw line.
    pub const COLUMNS: [&'static str; 1] = ["data"];

    pub async fn next_batch(&mut self) -> Option<CommitBatch> {
        self.rx.recv().await
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the connector to exit. Batches not yet received are discarded.
    pub async fn join(self) -> Result<ConnectorStats> {
        let RowStream { rx, handle } = self;
        let stats = handle.join().await;
        drop(rx);
        stats
    }

    /// Receive every batch until the connector exits, then join it.
    pub async fn drain(mut self) -> Result<(Vec<CommitBatch>, ConnectorStats)> {
        let mut batches = Vec::new();
        while let Some(batch) = self.rx.recv().await {
            batches.push(batch);
        }
        let stats = self.join().await?;
        Ok((batches, stats))
    }
}
