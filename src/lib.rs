/*!
 * A content-defined-chunking ingestion engine for backup-oriented file pipelines.
 *
 * Walks a directory tree, splits each file into FastCDC (or fixed-size) chunks over a
 * pool-leased buffer, computes a whole-file digest and a MinHash similarity signature per file,
 * and can keep watching a tree afterward for incremental changes. Chunking and batch dispatch
 * run on bounded, backpressured pools so a large tree never runs away with memory.
 */

pub mod batch;
pub mod config;
pub mod error;
pub mod file_chunker;
pub mod logging;
pub mod runtime;
pub mod scanner;
pub mod types;
pub mod watcher;

pub use batch::{BatchDispatchResult, BatchOperation, BatchScheduler, BatchStrategy};
pub use config::{BatchConfiguration, ConfigFile, LogLevel, PoolConfiguration, RuntimeConfig};
pub use error::{ErrorCategory, IngestError, Result};
pub use file_chunker::chunk_file;
pub use runtime::{IngestOutcome, Runtime};
pub use scanner::{scan_directory, scan_directory_cancellable, scan_directory_parallel, scan_directory_streaming};
pub use types::{
    ChunkAlgorithmChoice, ChunkProgress, ChunkRecord, ChunkingOptions, FileChunkingResult,
    FileDescriptor, ScanErrorEntry, ScanErrorKind, ScanOptions, ScanResult, SymlinkStrategy,
    WatchEvent, WatchEventKind, WatchOptions,
};
pub use watcher::{EventFilter, EventWatcher};

/// Library version, pulled from this crate's own `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_populated() {
        assert!(!VERSION.is_empty());
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
