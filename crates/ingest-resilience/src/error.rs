//! Error taxonomy for buffer pool and thread-pool operations.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    #[error("pool is closed")]
    Closed,

    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("allocation failed after reclaim")]
    AllocationFailed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("rejected by backpressure, retry after {retry_after_ms} ms")]
    Overloaded { retry_after_ms: u64 },

    #[error("acquire timed out")]
    Timeout,
}
