/*!
 * Error types for the ingestion engine
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug)]
pub enum IngestError {
    /// Chunker or pool constructed with an invalid configuration.
    InvalidConfig(String),

    /// Bad runtime argument (empty path, non-positive size, ...).
    InvalidArgument(String),

    /// File read or directory walk failure, with the path that caused it.
    Io { path: PathBuf, source: io::Error },

    /// Scan entry could not be read due to permissions; recorded, not fatal.
    PermissionDenied(PathBuf),

    /// Path disappeared between enumeration and read.
    NotFound(PathBuf),

    /// Pool, chunker, or runtime used after shutdown.
    Closed,

    /// Cooperative cancellation; callers should treat this as a non-error outcome.
    Cancelled,

    /// Backpressure rejection; caller should retry after the hint.
    Overloaded { retry_after_ms: u64 },

    /// Allocation failed even after the pool reclaimed idle buffers.
    AllocationFailed,

    /// Input was not a regular file where one was required.
    InvalidFile(PathBuf),

    /// Configuration file could not be read or parsed.
    Config(String),

    /// Generic error with message, used sparingly at the CLI boundary.
    Other(String),
}

impl IngestError {
    /// Whether this error should not be retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            IngestError::InvalidConfig(_) => true,
            IngestError::InvalidArgument(_) => true,
            IngestError::InvalidFile(_) => true,
            IngestError::Config(_) => true,
            IngestError::Closed => true,

            IngestError::Io { .. } => false,
            IngestError::PermissionDenied(_) => false,
            IngestError::NotFound(_) => false,
            IngestError::Cancelled => false,
            IngestError::Overloaded { .. } => false,
            IngestError::AllocationFailed => false,
            IngestError::Other(_) => false,
        }
    }

    /// Whether this error is transient and worth retrying after a delay.
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Io { source, .. } => Self::is_io_transient(source),
            IngestError::Overloaded { .. } => true,
            IngestError::AllocationFailed => true,
            _ => false,
        }
    }

    fn is_io_transient(io_err: &io::Error) -> bool {
        use io::ErrorKind::*;
        matches!(
            io_err.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | Interrupted
                | WouldBlock
                | TimedOut
        )
    }

    /// Cancellation is a cooperative stop signal, not a failure a caller need log as one.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, IngestError::Cancelled)
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            IngestError::InvalidConfig(_) | IngestError::InvalidArgument(_) => {
                ErrorCategory::Validation
            }
            IngestError::Io { .. } => ErrorCategory::IoError,
            IngestError::PermissionDenied(_) => ErrorCategory::Filesystem,
            IngestError::NotFound(_) => ErrorCategory::Filesystem,
            IngestError::Closed => ErrorCategory::Lifecycle,
            IngestError::Cancelled => ErrorCategory::Lifecycle,
            IngestError::Overloaded { .. } => ErrorCategory::Backpressure,
            IngestError::AllocationFailed => ErrorCategory::Resource,
            IngestError::InvalidFile(_) => ErrorCategory::Validation,
            IngestError::Config(_) => ErrorCategory::Configuration,
            IngestError::Other(_) => ErrorCategory::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    IoError,
    Filesystem,
    Lifecycle,
    Backpressure,
    Resource,
    Configuration,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Filesystem => write!(f, "filesystem"),
            ErrorCategory::Lifecycle => write!(f, "lifecycle"),
            ErrorCategory::Backpressure => write!(f, "backpressure"),
            ErrorCategory::Resource => write!(f, "resource"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            IngestError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            IngestError::Io { path, source } => {
                write!(f, "I/O error at {}: {}", path.display(), source)
            }
            IngestError::PermissionDenied(path) => {
                write!(f, "permission denied: {}", path.display())
            }
            IngestError::NotFound(path) => write!(f, "not found: {}", path.display()),
            IngestError::Closed => write!(f, "used after shutdown"),
            IngestError::Cancelled => write!(f, "operation cancelled"),
            IngestError::Overloaded { retry_after_ms } => {
                write!(f, "rejected by backpressure, retry after {retry_after_ms} ms")
            }
            IngestError::AllocationFailed => write!(f, "allocation failed after reclaim"),
            IngestError::InvalidFile(path) => {
                write!(f, "not a readable regular file: {}", path.display())
            }
            IngestError::Config(msg) => write!(f, "configuration error: {msg}"),
            IngestError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngestError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ingest_resilience::ResilienceError> for IngestError {
    fn from(err: ingest_resilience::ResilienceError) -> Self {
        match err {
            ingest_resilience::ResilienceError::Closed => IngestError::Closed,
            ingest_resilience::ResilienceError::InvalidSize(msg) => IngestError::InvalidArgument(msg),
            ingest_resilience::ResilienceError::AllocationFailed => IngestError::AllocationFailed,
            ingest_resilience::ResilienceError::Cancelled => IngestError::Cancelled,
            ingest_resilience::ResilienceError::Overloaded { retry_after_ms } => {
                IngestError::Overloaded { retry_after_ms }
            }
            ingest_resilience::ResilienceError::Timeout => IngestError::Overloaded {
                retry_after_ms: 100,
            },
        }
    }
}

impl From<ingest_cdc::ChunkError> for IngestError {
    fn from(err: ingest_cdc::ChunkError) -> Self {
        IngestError::InvalidConfig(err.to_string())
    }
}
