//! Backpressure: dual-threshold flow control for a queue of pending work.
//!
//! Each pool's pending-task queue has two independent thresholds:
//! - **Object count**: Maximum number of tasks queued for a permit
//! - **Byte size**: Maximum total bytes associated with queued tasks (unused by pools that
//!   don't track per-task size; reads as `0` in that case)
//!
//! When either threshold is breached, the upstream producer is signaled to
//! pause. This is cooperative — the producer checks `can_accept()` before
//! dispatching new work.
//!
//! # Example
//!
//! ```
//! use ingest_resilience::backpressure::{BackpressureGuard, BackpressureConfig};
//!
//! let config = BackpressureConfig {
//!     max_object_count: 10_000,
//!     max_byte_size: 1_073_741_824, // 1 GiB
//! };
//!
//! let guard = BackpressureGuard::new("io-pool", config);
//!
//! // Producer checks before dispatching
//! assert!(guard.can_accept());
//!
//! // Record incoming items
//! guard.record_enqueue(1, 4096);
//! assert!(guard.can_accept());
//!
//! // Record item completion
//! guard.record_dequeue(1, 4096);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Configuration for backpressure thresholds
#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    /// Maximum number of objects allowed in the queue
    pub max_object_count: u64,

    /// Maximum total bytes allowed in the queue
    pub max_byte_size: u64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_object_count: 10_000,
            max_byte_size: 1_073_741_824, // 1 GiB
        }
    }
}

/// Current state of a backpressure-monitored queue
#[derive(Debug, Clone)]
pub struct BackpressureState {
    /// Current object count in the queue
    pub object_count: u64,

    /// Current total bytes in the queue
    pub byte_size: u64,

    /// Whether the queue is currently applying backpressure
    pub is_backpressured: bool,

    /// Percentage of object count threshold used (0.0 - 1.0+)
    pub object_utilization: f64,

    /// Percentage of byte size threshold used (0.0 - 1.0+)
    pub byte_utilization: f64,
}

/// Tracks queue depth for a single pool's pending-task queue and signals backpressure.
///
/// Thread-safe via atomic operations — no locking required.
#[derive(Debug)]
pub struct BackpressureGuard {
    /// Identifier for this queue (e.g. the owning pool's name)
    name: String,

    /// Configuration thresholds
    config: BackpressureConfig,

    /// Current object count
    object_count: AtomicU64,

    /// Current byte size
    byte_size: AtomicU64,
}

impl BackpressureGuard {
    /// Create a new backpressure guard for a named queue
    pub fn new(name: impl Into<String>, config: BackpressureConfig) -> Self {
        Self {
            name: name.into(),
            config,
            object_count: AtomicU64::new(0),
            byte_size: AtomicU64::new(0),
        }
    }

    /// Check if the queue can accept more items (neither threshold breached)
    pub fn can_accept(&self) -> bool {
        let count = self.object_count.load(Ordering::Relaxed);
        let size = self.byte_size.load(Ordering::Relaxed);

        count < self.config.max_object_count && size < self.config.max_byte_size
    }

    /// Record items being enqueued
    pub fn record_enqueue(&self, count: u64, bytes: u64) {
        self.object_count.fetch_add(count, Ordering::Relaxed);
        self.byte_size.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record items being dequeued (completed or removed)
    pub fn record_dequeue(&self, count: u64, bytes: u64) {
        // Use saturating subtraction to prevent underflow
        let _ = self
            .object_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(count))
            });
        let _ = self
            .byte_size
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(bytes))
            });
    }

    /// Get the current state of this queue
    pub fn state(&self) -> BackpressureState {
        let object_count = self.object_count.load(Ordering::Relaxed);
        let byte_size = self.byte_size.load(Ordering::Relaxed);

        BackpressureState {
            object_count,
            byte_size,
            is_backpressured: object_count >= self.config.max_object_count
                || byte_size >= self.config.max_byte_size,
            object_utilization: object_count as f64 / self.config.max_object_count as f64,
            byte_utilization: byte_size as f64 / self.config.max_byte_size as f64,
        }
    }

    /// Get the name of this queue
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configuration
    pub fn config(&self) -> &BackpressureConfig {
        &self.config
    }

    /// Reset counters (e.g., after a reconnection)
    pub fn reset(&self) {
        self.object_count.store(0, Ordering::Relaxed);
        self.byte_size.store(0, Ordering::Relaxed);
    }
}

/// Manages backpressure guards for multiple named queues (e.g. one per pool type)
#[derive(Debug, Clone)]
pub struct BackpressureRegistry {
    guards: Arc<std::sync::RwLock<Vec<Arc<BackpressureGuard>>>>,
}

impl BackpressureRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            guards: Arc::new(std::sync::RwLock::new(Vec::new())),
        }
    }

    /// Register a new backpressure guard
    pub fn register(&self, guard: Arc<BackpressureGuard>) {
        let mut guards = self.guards.write().unwrap();
        guards.push(guard);
    }

    /// Find a guard by name
    pub fn get(&self, name: &str) -> Option<Arc<BackpressureGuard>> {
        let guards = self.guards.read().unwrap();
        guards.iter().find(|g| g.name() == name).cloned()
    }

    /// Get all guards that can accept more work
    pub fn available_destinations(&self) -> Vec<Arc<BackpressureGuard>> {
        let guards = self.guards.read().unwrap();
        guards.iter().filter(|g| g.can_accept()).cloned().collect()
    }

    /// Get a snapshot of all queue states
    pub fn all_states(&self) -> Vec<(String, BackpressureState)> {
        let guards = self.guards.read().unwrap();
        guards
            .iter()
            .map(|g| (g.name().to_string(), g.state()))
            .collect()
    }

    /// Check if any destination is backpressured
    pub fn any_backpressured(&self) -> bool {
        let guards = self.guards.read().unwrap();
        guards.iter().any(|g| !g.can_accept())
    }

    /// Remove a guard by name
    pub fn remove(&self, name: &str) {
        let mut guards = self.guards.write().unwrap();
        guards.retain(|g| g.name() != name);
    }
}

impl Default for BackpressureRegistry {
    fn default() -> Self {
        Self::new()
    }
}
