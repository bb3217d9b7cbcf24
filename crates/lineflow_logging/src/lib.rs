//! Logging bootstrap and on-disk layout for lineflow.
//!
//! Everything lineflow keeps on disk lives under one home directory:
//!
//! ```text
//! $LINEFLOW_HOME (default ~/.lineflow)
//! ├── logs/          <app>.<generation>.log, only the newest generation is written
//! └── checkpoints/   one JSON document per persistent id
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable overriding the lineflow home directory.
pub const HOME_ENV: &str = "LINEFLOW_HOME";

const DEFAULT_LOG_FILTER: &str = "lineflow=info,lineflow_tail=info";

/// How much log history is kept for one app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRetention {
    /// A new generation is started once the current one would exceed this.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Generations kept on disk, including the one being written.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_max_files() -> usize {
    5
}

impl Default for LogRetention {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_files: default_max_files(),
        }
    }
}

/// Logging configuration shared by lineflow binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Mirror the file filter on stderr instead of warnings only.
    pub verbose: bool,
    pub retention: LogRetention,
}

/// Install the global subscriber: generation files under [`logs_dir`] plus stderr.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let dir = logs_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;
    let files = LogFiles::open(&dir, config.app_name, config.retention)
        .with_context(|| format!("Failed to open log file for {}", config.app_name))?;

    let console_filter = if config.verbose {
        env_filter()
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(files)
                .with_ansi(false)
                .with_filter(env_filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Global tracing subscriber already installed")?;

    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// `$LINEFLOW_HOME`, or `~/.lineflow`.
pub fn lineflow_home() -> PathBuf {
    if let Ok(override_path) = std::env::var(HOME_ENV) {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .map(|home| home.join(".lineflow"))
        .unwrap_or_else(|| PathBuf::from(".lineflow"))
}

pub fn logs_dir() -> PathBuf {
    lineflow_home().join("logs")
}

/// Default home of the file-backed checkpoint store.
pub fn checkpoints_dir() -> PathBuf {
    lineflow_home().join("checkpoints")
}

/// Replace anything outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

/// Numbered log files for one app. Writes go to the highest generation; starting a
/// new one deletes generations that fall outside the retention window.
struct LogFiles {
    dir: PathBuf,
    stem: String,
    retention: LogRetention,
    active: Mutex<ActiveFile>,
}

struct ActiveFile {
    file: File,
    generation: u64,
    written: u64,
}

impl ActiveFile {
    fn open(path: &Path, generation: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            file,
            generation,
            written,
        })
    }
}

impl LogFiles {
    fn open(dir: &Path, app_name: &str, retention: LogRetention) -> io::Result<Self> {
        let stem = sanitize_name(app_name);
        let newest = generations(dir, &stem)?.last().copied().unwrap_or(0);
        let active = ActiveFile::open(&generation_path(dir, &stem, newest), newest)?;
        let files = Self {
            dir: dir.to_path_buf(),
            stem,
            retention,
            active: Mutex::new(active),
        };
        files.prune(newest)?;
        Ok(files)
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, ActiveFile>> {
        self.active
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))
    }

    fn write_record(&self, buf: &[u8]) -> io::Result<usize> {
        let mut active = self.lock()?;
        if active.written > 0 && active.written + buf.len() as u64 > self.retention.max_file_bytes {
            let next = active.generation + 1;
            active.file.flush()?;
            *active = ActiveFile::open(&generation_path(&self.dir, &self.stem, next), next)?;
            self.prune(next)?;
        }
        let written = active.file.write(buf)?;
        active.written += written as u64;
        Ok(written)
    }

    fn prune(&self, newest: u64) -> io::Result<()> {
        let keep = self.retention.max_files.max(1) as u64;
        for generation in generations(&self.dir, &self.stem)? {
            if generation + keep > newest {
                continue;
            }
            match fs::remove_file(generation_path(&self.dir, &self.stem, generation)) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }
}

fn generation_path(dir: &Path, stem: &str, generation: u64) -> PathBuf {
    dir.join(format!("{stem}.{generation}.log"))
}

/// Generations present for `stem`, oldest first. Unrelated files are ignored.
fn generations(dir: &Path, stem: &str) -> io::Result<Vec<u64>> {
    let prefix = format!("{stem}.");
    let mut found: Vec<u64> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            name.strip_prefix(&prefix)?
                .strip_suffix(".log")?
                .parse()
                .ok()
        })
        .collect();
    found.sort_unstable();
    Ok(found)
}

struct LogWriter<'a>(&'a LogFiles);

impl<'a> MakeWriter<'a> for LogFiles {
    type Writer = LogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter(self)
    }
}

impl Write for LogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_record(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock()?.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn retention(max_file_bytes: u64, max_files: usize) -> LogRetention {
        LogRetention {
            max_file_bytes,
            max_files,
        }
    }

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize_name("lineflow-tail"), "lineflow-tail");
        assert_eq!(sanitize_name("a/b c.d"), "a_b_c_d");
    }

    #[test]
    fn full_generation_starts_the_next_and_prunes_old_ones() {
        let temp = TempDir::new().unwrap();
        let files = LogFiles::open(temp.path(), "app", retention(16, 2)).unwrap();
        let mut writer = files.make_writer();

        for _ in 0..4 {
            writer.write_all(b"0123456789").unwrap();
        }
        writer.flush().unwrap();

        assert_eq!(generations(temp.path(), "app").unwrap(), vec![2, 3]);
        assert_eq!(fs::read(temp.path().join("app.3.log")).unwrap(), b"0123456789");
    }

    #[test]
    fn reopening_continues_the_newest_generation() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("app.4.log"), b"old\n").unwrap();
        fs::write(temp.path().join("app.1.log"), b"ancient\n").unwrap();
        fs::write(temp.path().join("other.1.log"), b"x").unwrap();

        let files = LogFiles::open(temp.path(), "app", retention(1024, 3)).unwrap();
        files.make_writer().write_all(b"new\n").unwrap();

        assert_eq!(fs::read(temp.path().join("app.4.log")).unwrap(), b"old\nnew\n");
        assert_eq!(generations(temp.path(), "app").unwrap(), vec![4]);
        assert!(temp.path().join("other.1.log").exists());
    }

    #[test]
    fn oversized_record_is_written_whole() {
        let temp = TempDir::new().unwrap();
        let files = LogFiles::open(temp.path(), "solo", retention(4, 1)).unwrap();
        files.make_writer().write_all(b"longer than four").unwrap();
        files.make_writer().write_all(b"next").unwrap();

        assert_eq!(generations(temp.path(), "solo").unwrap(), vec![1]);
        assert_eq!(fs::read(temp.path().join("solo.1.log")).unwrap(), b"next");
    }

    #[test]
    fn retention_defaults_fill_missing_fields() {
        let parsed: LogRetention = serde_json::from_str(r#"{"max_files": 2}"#).unwrap();
        assert_eq!(parsed.max_files, 2);
        assert_eq!(parsed.max_file_bytes, LogRetention::default().max_file_bytes);
    }

    #[test]
    fn layout_lives_under_home() {
        let home = lineflow_home();
        assert_eq!(logs_dir(), home.join("logs"));
        assert_eq!(checkpoints_dir(), home.join("checkpoints"));
    }
}
