//! Typed thread-pool manager with backpressure and adaptive resizing.
//!
//! Each pool type shares this module's `Pool` implementation (config, stats, a tokio semaphore
//! gating concurrency) plus a `PoolPolicy` capturing what's different about it — this mirrors the
//! capability-interface-plus-policy-object shape the rest of this crate uses for the connection
//! pool, generalized to six pool types instead of one.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::backpressure::{BackpressureConfig, BackpressureGuard};
use crate::error::ResilienceError;

/// The six pool types named by the thread-pool manager's contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolType {
    Io,
    Cpu,
    Completion,
    Batch,
    Watch,
    Mgmt,
}

/// What differs between pool types: how aggressively backpressure reduces effective
/// concurrency, and what happens to a submission that cannot be enqueued.
#[derive(Debug, Clone, Copy)]
pub struct PoolPolicy {
    pub pool_type: PoolType,
    pub core_size: usize,
    pub configured_max: usize,
    /// How much of `max` backpressure removes at `level == 1.0`; BATCH/MGMT are closer to 1.0
    /// (aggressive), IO/COMPLETION closer to a small fraction (least aggressive).
    pub backpressure_aggressiveness: f64,
    pub rejection: RejectionPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionPolicy {
    /// Caller gets `Overloaded` with a retry-after hint.
    RetryAfter,
    /// The submission runs on the caller's own task/thread instead of the pool.
    CallerRuns,
}

impl PoolPolicy {
    pub fn for_type(pool_type: PoolType) -> Self {
        match pool_type {
            PoolType::Io => Self {
                pool_type,
                core_size: 4,
                configured_max: 32,
                backpressure_aggressiveness: 0.3,
                rejection: RejectionPolicy::RetryAfter,
            },
            PoolType::Cpu => Self {
                pool_type,
                core_size: num_cpus(),
                configured_max: num_cpus(),
                backpressure_aggressiveness: 0.5,
                rejection: RejectionPolicy::RetryAfter,
            },
            PoolType::Completion => Self {
                pool_type,
                core_size: 2,
                configured_max: 8,
                backpressure_aggressiveness: 0.2,
                rejection: RejectionPolicy::RetryAfter,
            },
            PoolType::Batch => Self {
                pool_type,
                core_size: 2,
                configured_max: 16,
                backpressure_aggressiveness: 0.8,
                rejection: RejectionPolicy::RetryAfter,
            },
            PoolType::Watch => Self {
                pool_type,
                core_size: 1,
                configured_max: 64,
                backpressure_aggressiveness: 0.1,
                rejection: RejectionPolicy::RetryAfter,
            },
            PoolType::Mgmt => Self {
                pool_type,
                core_size: 1,
                configured_max: 4,
                backpressure_aggressiveness: 0.9,
                rejection: RejectionPolicy::CallerRuns,
            },
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub active: usize,
    pub queued: usize,
    pub max_size: usize,
    pub completed: u64,
    pub rejected: u64,
}

struct PoolState {
    semaphore: Arc<Semaphore>,
    active: AtomicUsize,
    current_max: AtomicUsize,
    completed: AtomicU64,
    rejected: AtomicU64,
    backpressure_level: std::sync::Mutex<f64>,
    guard: BackpressureGuard,
    shutting_down: std::sync::atomic::AtomicBool,
}

/// One typed pool. `submit` runs the future on the current tokio runtime, gated by a semaphore
/// sized to the pool's effective maximum concurrency.
#[derive(Clone)]
pub struct Pool {
    policy: PoolPolicy,
    state: Arc<PoolState>,
}

impl Pool {
    fn new(policy: PoolPolicy) -> Self {
        let guard = BackpressureGuard::new(
            format!("{:?}", policy.pool_type),
            BackpressureConfig::default(),
        );
        Self {
            policy,
            state: Arc::new(PoolState {
                semaphore: Arc::new(Semaphore::new(policy.configured_max)),
                active: AtomicUsize::new(0),
                current_max: AtomicUsize::new(policy.configured_max),
                completed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                backpressure_level: std::sync::Mutex::new(0.0),
                guard,
                shutting_down: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    pub fn pool_type(&self) -> PoolType {
        self.policy.pool_type
    }

    /// Runs `task` with a concurrency permit. Honors backpressure and shutdown before
    /// acquiring; `RejectionPolicy::CallerRuns` pools run the task inline instead of erroring
    /// when no permit is available within a short window.
    pub async fn submit<F, T>(&self, task: F) -> Result<T, ResilienceError>
    where
        F: std::future::Future<Output = T>,
    {
        if self.state.shutting_down.load(Ordering::SeqCst) {
            return Err(ResilienceError::Closed);
        }

        // The guard's object count tracks tasks waiting for (or holding) a permit, independent
        // of the semaphore's own accounting; a pool whose queue is already saturated rejects
        // immediately instead of waiting out the acquire timeout below.
        if !self.state.guard.can_accept() {
            self.state.rejected.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(pool = ?self.policy.pool_type, "rejecting task, queue depth saturated");
            return Err(ResilienceError::Overloaded {
                retry_after_ms: 100,
            });
        }
        self.state.guard.record_enqueue(1, 0);

        let acquire = self.state.semaphore.clone().acquire_owned();
        let outcome = match self.policy.rejection {
            RejectionPolicy::RetryAfter => match timeout(Duration::from_millis(50), acquire).await
            {
                Ok(Ok(permit)) => {
                    self.state.active.fetch_add(1, Ordering::SeqCst);
                    let result = task.await;
                    self.state.active.fetch_sub(1, Ordering::SeqCst);
                    self.state.completed.fetch_add(1, Ordering::SeqCst);
                    drop(permit);
                    Ok(result)
                }
                _ => {
                    self.state.rejected.fetch_add(1, Ordering::SeqCst);
                    tracing::debug!(pool = ?self.policy.pool_type, "rejecting task, retry after 100ms");
                    Err(ResilienceError::Overloaded {
                        retry_after_ms: 100,
                    })
                }
            },
            RejectionPolicy::CallerRuns => match timeout(Duration::from_millis(10), acquire).await
            {
                Ok(Ok(permit)) => {
                    self.state.active.fetch_add(1, Ordering::SeqCst);
                    let result = task.await;
                    self.state.active.fetch_sub(1, Ordering::SeqCst);
                    self.state.completed.fetch_add(1, Ordering::SeqCst);
                    drop(permit);
                    Ok(result)
                }
                _ => {
                    // Caller-runs: execute on the calling task without a permit.
                    let result = task.await;
                    self.state.completed.fetch_add(1, Ordering::SeqCst);
                    Ok(result)
                }
            },
        };
        self.state.guard.record_dequeue(1, 0);
        outcome
    }

    /// Reduces effective maximum concurrency to `max * (1 - aggressiveness * level)`.
    pub fn apply_backpressure(&self, level: f64) {
        let level = level.clamp(0.0, 1.0);
        *self.state.backpressure_level.lock().unwrap() = level;
        let reduction = self.policy.backpressure_aggressiveness * level;
        let new_max = ((self.policy.configured_max as f64) * (1.0 - reduction))
            .max(1.0)
            .round() as usize;
        tracing::debug!(pool = ?self.policy.pool_type, level, new_max, "applying backpressure");
        self.resize_permits(new_max);
    }

    pub fn release_backpressure(&self) {
        *self.state.backpressure_level.lock().unwrap() = 0.0;
        self.resize_permits(self.policy.configured_max);
    }

    fn resize_permits(&self, new_max: usize) {
        let current = self.state.current_max.swap(new_max, Ordering::SeqCst);
        if new_max > current {
            self.state.semaphore.add_permits(new_max - current);
        } else if new_max < current {
            // Permits already checked out cannot be revoked; forget future permits to shrink
            // the pool's effective ceiling as outstanding work completes.
            let to_remove = current - new_max;
            if let Ok(permits) = self.state.semaphore.try_acquire_many(to_remove as u32) {
                permits.forget();
            }
        }
    }

    /// Applies a sizing recommendation from the adaptive controller: observed latency/queue
    /// depth and memory pressure class drive a new `max_size` within `[core, configured_max]`.
    pub fn trigger_adaptive_resize(&self, recommendation: super::adaptive::SizeRecommendation) {
        let current = self.state.current_max.load(Ordering::SeqCst);
        let new_max = match recommendation {
            super::adaptive::SizeRecommendation::Increase(factor) => {
                ((current as f64) * factor).round() as usize
            }
            super::adaptive::SizeRecommendation::Decrease(factor) => {
                ((current as f64) * factor).round() as usize
            }
            super::adaptive::SizeRecommendation::Maintain => current,
        };
        let bounded = new_max.clamp(self.policy.core_size, self.policy.configured_max);
        tracing::debug!(pool = ?self.policy.pool_type, from = current, to = bounded, "adaptive resize");
        self.resize_permits(bounded);
    }

    /// Stops accepting tasks, waits up to `deadline` for in-flight tasks to drain, then returns
    /// regardless — any tasks still holding permits past the deadline are abandoned rather than
    /// forcibly killed, since this pool has no handle to cancel a caller's future.
    pub async fn shutdown(&self, deadline: Duration) {
        self.state.shutting_down.store(true, Ordering::SeqCst);
        let start = tokio::time::Instant::now();
        while self.state.active.load(Ordering::SeqCst) > 0 {
            if start.elapsed() >= deadline {
                tracing::warn!(
                    pool = ?self.policy.pool_type,
                    remaining = self.state.active.load(Ordering::SeqCst),
                    "shutdown deadline reached with tasks still active"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.state.active.load(Ordering::SeqCst),
            queued: self.state.semaphore.available_permits(),
            max_size: self.state.current_max.load(Ordering::SeqCst),
            completed: self.state.completed.load(Ordering::SeqCst),
            rejected: self.state.rejected.load(Ordering::SeqCst),
        }
    }
}

/// Process-wide registry of the six typed pools. Construct once per `Runtime`; tests construct
/// throwaway managers freely since nothing here is a process singleton.
pub struct ThreadPoolManager {
    io: Pool,
    cpu: Pool,
    completion: Pool,
    batch: Pool,
    watch: Pool,
    mgmt: Pool,
}

impl ThreadPoolManager {
    pub fn new() -> Self {
        Self {
            io: Pool::new(PoolPolicy::for_type(PoolType::Io)),
            cpu: Pool::new(PoolPolicy::for_type(PoolType::Cpu)),
            completion: Pool::new(PoolPolicy::for_type(PoolType::Completion)),
            batch: Pool::new(PoolPolicy::for_type(PoolType::Batch)),
            watch: Pool::new(PoolPolicy::for_type(PoolType::Watch)),
            mgmt: Pool::new(PoolPolicy::for_type(PoolType::Mgmt)),
        }
    }

    pub fn pool(&self, pool_type: PoolType) -> &Pool {
        match pool_type {
            PoolType::Io => &self.io,
            PoolType::Cpu => &self.cpu,
            PoolType::Completion => &self.completion,
            PoolType::Batch => &self.batch,
            PoolType::Watch => &self.watch,
            PoolType::Mgmt => &self.mgmt,
        }
    }

    pub async fn shutdown_all(&self, deadline: Duration) {
        // Shutdown does not hold any pool's internal lock while awaiting; each pool's shutdown
        // only spins on an atomic counter, so awaiting all six concurrently cannot deadlock.
        tokio::join!(
            self.io.shutdown(deadline),
            self.cpu.shutdown(deadline),
            self.completion.shutdown(deadline),
            self.batch.shutdown(deadline),
            self.watch.shutdown(deadline),
            self.mgmt.shutdown(deadline),
        );
    }
}

impl Default for ThreadPoolManager {
    fn default() -> Self {
        Self::new()
    }
}
