//! Resource management for the ingestion engine: a direct-buffer pool, a typed thread-pool
//! manager with per-type backpressure, and the adaptive-sizing controller that drives both from
//! observed load and memory pressure.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     ThreadPoolManager                    │
//! │   IO   CPU   COMPLETION   BATCH   WATCH   MGMT            │
//! │  (each a Pool: semaphore + PoolPolicy + BackpressureGuard)│
//! └─────────────────────────────────────────────────────────┘
//!                 ▲                           ▲
//!                 │ trigger_adaptive_resize   │ apply_backpressure
//!                 │                           │
//!         AdaptiveController            BackpressureGuard
//!         (EWMA utilization)            (per-pool level)
//!
//! ┌─────────────────────────────────────────────────────────┐
//! │                       BufferPool                         │
//! │   idle: Mutex<Vec<Vec<u8>>>   in_use/total: AtomicUsize   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The buffer pool and thread pools are independent of each other; a `Runtime` in the root crate
//! owns one of each plus an `AdaptiveController` and wires periodic sampling between them.
//!
//! ```rust
//! use ingest_resilience::{BufferPool, BufferPoolConfig};
//!
//! let pool = BufferPool::new(BufferPoolConfig::default_config());
//! let buf = pool.acquire(4096).unwrap();
//! assert!(buf.capacity() >= 4096);
//! ```

pub mod adaptive;
pub mod backpressure;
pub mod buffer_pool;
pub mod error;
pub mod thread_pool;

pub use adaptive::{AdaptiveController, LoadSample, MemoryMonitor, MemoryPressure, SizeRecommendation};
pub use backpressure::{BackpressureConfig, BackpressureGuard, BackpressureRegistry, BackpressureState};
pub use buffer_pool::{Buffer, BufferPool, BufferPoolConfig, BufferPoolStats};
pub use error::ResilienceError;
pub use thread_pool::{Pool, PoolPolicy, PoolStats, PoolType, RejectionPolicy, ThreadPoolManager};

pub mod prelude {
    pub use super::adaptive::{AdaptiveController, LoadSample, MemoryMonitor, MemoryPressure};
    pub use super::backpressure::{BackpressureConfig, BackpressureGuard};
    pub use super::buffer_pool::{Buffer, BufferPool, BufferPoolConfig};
    pub use super::error::ResilienceError;
    pub use super::thread_pool::{Pool, PoolType, ThreadPoolManager};
}
