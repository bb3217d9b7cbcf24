//! lineflow-tail: follow a file or directory and print commits as NDJSON.
//!
//! Usage:
//!     lineflow-tail /var/log/app --pattern '*.log' --mode streaming_with_deletions

use anyhow::Context;
use clap::Parser;
use lineflow::{read, ChangeEvent, CommitBatch, ConnectorConfig, ReadOptions};
use lineflow_logging::{init_logging, LogConfig};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lineflow-tail", about = "Stream lines from files as committed batches")]
struct Args {
    /// File or directory to read
    path: PathBuf,

    /// static, streaming or streaming_with_deletions
    #[arg(long, default_value = "streaming")]
    mode: String,

    /// Shell-style pattern applied when PATH is a directory
    #[arg(long, default_value = "*")]
    pattern: String,

    /// Resume from (and record to) this checkpoint
    #[arg(long, env = "LINEFLOW_PERSISTENT_ID")]
    persistent_id: Option<String>,

    /// Flush interval in milliseconds
    #[arg(long)]
    autocommit_ms: Option<u64>,

    /// TOML connector configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log to stderr at the file log level
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args
        .config
        .as_ref()
        .map(|path| {
            ConnectorConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))
        })
        .transpose()?;
    init_logging(LogConfig {
        app_name: "lineflow-tail",
        verbose: args.verbose,
        retention: config.as_ref().map(|c| c.logging).unwrap_or_default(),
    })?;

    let mut options = ReadOptions::new()
        .mode_str(&args.mode)?
        .object_pattern(args.pattern.clone());
    if let Some(id) = &args.persistent_id {
        options = options.persistent_id(id.clone());
    }
    if let Some(ms) = args.autocommit_ms {
        options = options.autocommit_ms(ms);
    }
    if let Some(config) = config {
        options = options.config(config);
    }

    tracing::info!(path = %args.path.display(), mode = %args.mode, "Starting lineflow-tail");
    let mut rows = read(&args.path, options)
        .with_context(|| format!("Failed to start reading {}", args.path.display()))?;

    let mut stdout = std::io::stdout().lock();
    let mut stopping = false;
    loop {
        let interrupted = tokio::select! {
            _ = tokio::signal::ctrl_c(), if !stopping => true,
            batch = rows.next_batch() => match batch {
                Some(batch) => {
                    print_batch(&mut stdout, &batch)?;
                    false
                }
                None => break,
            },
        };
        if interrupted {
            tracing::info!("Interrupted - flushing pending rows");
            rows.stop();
            stopping = true;
        }
    }

    let stats = rows.join().await?;
    tracing::info!(
        commits = stats.commits,
        insertions = stats.insertions,
        deletions = stats.deletions,
        "lineflow-tail finished"
    );
    Ok(())
}

fn print_batch(out: &mut impl Write, batch: &CommitBatch) -> anyhow::Result<()> {
    for event in &batch.events {
        let line = match event {
            ChangeEvent::Insertion(record) => serde_json::json!({
                "seq": batch.seq,
                "diff": event.diff(),
                "key": record.key().to_string(),
                "data": record.text(),
            }),
            ChangeEvent::Deletion(id) => serde_json::json!({
                "seq": batch.seq,
                "diff": event.diff(),
                "key": id.key.to_string(),
            }),
        };
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}
