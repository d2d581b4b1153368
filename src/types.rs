/*!
 * Public result/options types shared by the scanner, file chunker, watcher and scheduler.
 */

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// How symbolic links are treated during a directory walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymlinkStrategy {
    /// Resolve the link and descend into/read through it.
    Follow,
    /// Emit a descriptor for the link without recursing into it.
    Record,
    /// Ignore symlinks entirely.
    Skip,
}

impl Default for SymlinkStrategy {
    fn default() -> Self {
        SymlinkStrategy::Record
    }
}

/// Options controlling a single directory walk.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub max_depth: usize,
    pub include_pattern: Option<String>,
    pub exclude_pattern: Option<String>,
    pub min_file_size: Option<u64>,
    pub max_file_size: Option<u64>,
    pub symlink_strategy: SymlinkStrategy,
    pub include_hidden: bool,
    pub detect_sparse: bool,
    /// 0 disables the streaming-progress callback cadence; otherwise emit progress every N files.
    pub progress_every: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_depth: usize::MAX,
            include_pattern: None,
            exclude_pattern: None,
            min_file_size: None,
            max_file_size: None,
            symlink_strategy: SymlinkStrategy::Record,
            include_hidden: false,
            detect_sparse: true,
            progress_every: 0,
        }
    }
}

/// An entry produced by the scanner.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub is_symlink: bool,
    pub is_sparse: bool,
    pub link_target: Option<PathBuf>,
}

/// One error encountered while walking or reading; never aborts the overall operation.
#[derive(Debug, Clone)]
pub struct ScanErrorEntry {
    pub path: PathBuf,
    pub kind: ScanErrorKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanErrorKind {
    PermissionDenied,
    SymlinkCycle,
    Unreadable,
    Other,
}

/// Result of walking one root directory.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub root: PathBuf,
    pub files: Vec<FileDescriptor>,
    pub errors: Vec<ScanErrorEntry>,
    pub started: SystemTime,
    pub ended: SystemTime,
    /// Free-form counters/labels a caller can attach (e.g. `"mode" -> "parallel"`); never
    /// inspected by the scanner itself.
    pub metadata: BTreeMap<String, String>,
}

impl ScanResult {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Which chunking algorithm an ingestion run should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkAlgorithmChoice {
    Fixed { chunk_size: usize },
    Cdc { min: usize, avg: usize, max: usize },
}

impl Default for ChunkAlgorithmChoice {
    fn default() -> Self {
        ChunkAlgorithmChoice::Cdc {
            min: 4096,
            avg: 64 * 1024,
            max: 256 * 1024,
        }
    }
}

/// Progress reported by the file chunker after each full chunk is cut.
#[derive(Debug, Clone, Copy)]
pub struct ChunkProgress {
    pub file_size: u64,
    pub bytes_processed: u64,
    pub chunks_emitted: usize,
}

/// Options controlling how a single file is chunked.
#[derive(Clone)]
pub struct ChunkingOptions {
    pub algorithm: ChunkAlgorithmChoice,
    pub max_concurrent_chunks: usize,
    pub minhash_k: usize,
    /// Invoked once per full chunk cut from the file.
    pub progress_cb: Option<Arc<dyn Fn(ChunkProgress) + Send + Sync>>,
    /// Invoked on coarse lifecycle transitions ("opened", "finalizing", ...).
    pub status_cb: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl fmt::Debug for ChunkingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkingOptions")
            .field("algorithm", &self.algorithm)
            .field("max_concurrent_chunks", &self.max_concurrent_chunks)
            .field("minhash_k", &self.minhash_k)
            .field("progress_cb", &self.progress_cb.is_some())
            .field("status_cb", &self.status_cb.is_some())
            .finish()
    }
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            algorithm: ChunkAlgorithmChoice::default(),
            max_concurrent_chunks: 64,
            minhash_k: 16,
            progress_cb: None,
            status_cb: None,
        }
    }
}

/// One content-defined (or fixed-size) chunk record emitted for a file.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub offset: u64,
    pub length: u32,
    pub digest: [u8; 32],
    /// Identifies which file (within the enclosing scan/batch) this chunk belongs to.
    pub origin_file_id: u64,
}

/// The complete result of chunking a single file.
#[derive(Debug, Clone)]
pub struct FileChunkingResult {
    pub file: FileDescriptor,
    pub chunk_count: usize,
    pub total_size: u64,
    pub file_digest: [u8; 32],
    pub chunk_digests: Vec<[u8; 32]>,
    pub similarity_signature: Vec<u64>,
}

/// A single filesystem change reported by the watcher.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
    pub file_size: Option<u64>,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Create,
    Modify,
    Delete,
    Overflow,
}

/// Options controlling the debounced event watcher.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub batch_size: usize,
    pub debounce: std::time::Duration,
    pub queue_capacity: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            debounce: std::time::Duration::from_millis(100),
            queue_capacity: 4096,
        }
    }
}

pub(crate) fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}
