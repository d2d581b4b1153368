/*!
 * ingestd - content-defined-chunking ingestion engine CLI
 *
 * Walks a directory, chunks every file with FastCDC (or fixed-size chunking), and reports a
 * summary of what was scanned and chunked. With `--watch`, keeps running and reports debounced
 * filesystem events after the initial pass.
 */

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{presets::UTF8_FULL, Table};

use ingest_engine::{
    ChunkAlgorithmChoice, ChunkingOptions, ConfigFile, LogLevel, Runtime, RuntimeConfig,
    WatchOptions,
};

#[derive(Parser, Debug)]
#[command(name = "ingestd", version, about = "FastCDC directory ingestion engine")]
struct Cli {
    /// Directory to scan and chunk.
    root: PathBuf,

    /// Path to a TOML configuration file; CLI flags below override its contents.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured log level.
    #[arg(long, value_enum)]
    log_level: Option<CliLogLevel>,

    /// Emit the summary as JSON instead of a human-readable table.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Use fixed-size chunking of this many bytes instead of content-defined chunking.
    #[arg(long)]
    fixed_chunk_size: Option<usize>,

    /// After the initial scan, keep watching the directory and print debounced events.
    #[arg(long, default_value_t = false)]
    watch: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for LogLevel {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => LogLevel::Error,
            CliLogLevel::Warn => LogLevel::Warn,
            CliLogLevel::Info => LogLevel::Info,
            CliLogLevel::Debug => LogLevel::Debug,
            CliLogLevel::Trace => LogLevel::Trace,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RuntimeConfig::default();
    if let Some(path) = &cli.config {
        let file = ConfigFile::load(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?;
        file.apply_to(&mut config);
    }
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }

    ingest_engine::logging::init_logging(&config)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let runtime = Runtime::new(config.clone());
    let _adaptive_loops = runtime.spawn_adaptive_loops();
    let cancelled = Arc::new(AtomicBool::new(false));

    let mut chunking = ChunkingOptions::default();
    if let Some(size) = cli.fixed_chunk_size {
        chunking.algorithm = ChunkAlgorithmChoice::Fixed { chunk_size: size };
    }

    let scan_options = config.scan.clone();

    let outcome = runtime
        .ingest_directory(&cli.root, &scan_options, chunking, &cancelled)
        .await;

    let failed = outcome.files.iter().filter(|(_, r)| r.is_err()).count();
    let total_chunks: usize = outcome
        .files
        .iter()
        .filter_map(|(_, r)| r.as_ref().ok())
        .map(|(result, _)| result.chunk_count)
        .sum();

    if cli.json {
        let summary = serde_json::json!({
            "root": cli.root,
            "files_scanned": outcome.scan.files.len(),
            "scan_errors": outcome.scan.errors.len(),
            "files_chunked": outcome.files.len() - failed,
            "files_failed": failed,
            "total_bytes": outcome.scan.total_bytes(),
            "total_chunks": total_chunks,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL).set_header(vec!["metric", "value"]);
        table.add_row(vec!["root".to_string(), cli.root.display().to_string()]);
        table.add_row(vec!["files scanned".to_string(), outcome.scan.files.len().to_string()]);
        table.add_row(vec!["total bytes".to_string(), outcome.scan.total_bytes().to_string()]);
        table.add_row(vec!["scan errors".to_string(), outcome.scan.errors.len().to_string()]);
        table.add_row(vec!["files chunked".to_string(), (outcome.files.len() - failed).to_string()]);
        table.add_row(vec!["files failed".to_string(), failed.to_string()]);
        table.add_row(vec!["total chunks".to_string(), total_chunks.to_string()]);
        println!("{table}");
    }

    if cli.watch {
        let mut watcher = runtime.watch_directory(&cli.root, WatchOptions::default(), Vec::new())?;
        println!("watching {} for changes (ctrl-c to stop)...", cli.root.display());
        while let Some(batch) = watcher.next_batch().await {
            for event in batch {
                println!("{:?} {}", event.kind, event.path.display());
            }
        }
    }

    runtime.shutdown(Duration::from_secs(5)).await;
    Ok(())
}
