//! Direct-buffer pool: lease/return fixed- or variable-size I/O buffers without a per-call
//! allocation.
//!
//! Shaped after `connection_pool::ConnectionPool` — a mutex-guarded idle list plus atomic
//! counters — but specialized to byte buffers instead of generic pooled connections, since
//! buffers have no health check and no async factory.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::ResilienceError;

/// Bounds and defaults for a `BufferPool`.
#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    pub default_size: usize,
    pub max_buffers: usize,
    pub min_buffer_size: usize,
    pub max_buffer_size: usize,
}

impl BufferPoolConfig {
    /// 1 KiB – 1 MiB default pool, matching the compatibility-boundary bounds named in the
    /// ingestion engine's data model.
    pub fn default_config() -> Self {
        Self {
            default_size: 64 * 1024,
            max_buffers: 64,
            min_buffer_size: 1024,
            max_buffer_size: 1024 * 1024,
        }
    }
}

/// A leased direct-addressable byte buffer. Capacity is fixed at construction; `len()` tracks how
/// much of it the lessee has written so far ("position/limit" collapsed to a single cursor).
pub struct Buffer {
    data: Vec<u8>,
    len: usize,
    pool: Option<Arc<PoolInner>>,
}

impl Buffer {
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Records how many bytes of the underlying storage are meaningful after a caller writes
    /// into `as_mut_slice()`. Must not exceed `capacity()`.
    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.data.len());
        self.len = len.min(self.data.len());
    }

    fn reset(&mut self) {
        self.len = 0;
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release_raw(std::mem::take(&mut self.data));
        }
    }
}

struct PoolInner {
    idle: Mutex<Vec<Vec<u8>>>,
    in_use: AtomicUsize,
    total: AtomicUsize,
    closed: std::sync::atomic::AtomicBool,
    config: BufferPoolConfig,
}

impl PoolInner {
    fn release_raw(&self, data: Vec<u8>) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            self.total.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        // Contents are not cleared here: callers must treat buffer contents as uninitialized
        // regardless of what a previous lessee wrote.
        let mut idle = self.idle.lock().unwrap();
        idle.push(data);
    }
}

/// Lock-guarded queue of idle buffers plus `total`/`in_use` counters satisfying `total = idle +
/// in_use` outside acquire/release critical sections.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(config: BufferPoolConfig) -> Self {
        let inner = Arc::new(PoolInner {
            idle: Mutex::new(Vec::new()),
            in_use: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
            config,
        });

        let pool = Self { inner };
        pool.preallocate();
        pool
    }

    fn preallocate(&self) {
        let n = (self.inner.config.max_buffers / 2).min(4);
        let mut idle = self.inner.idle.lock().unwrap();
        for _ in 0..n {
            idle.push(vec![0u8; self.inner.config.default_size]);
            self.inner.total.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn acquire(&self, size: usize) -> Result<Buffer, ResilienceError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ResilienceError::Closed);
        }
        if size == 0 || size > self.inner.config.max_buffer_size {
            return Err(ResilienceError::InvalidSize(format!(
                "requested size {size} outside pool bounds"
            )));
        }

        let mut idle = self.inner.idle.lock().unwrap();
        let slot = idle.iter().position(|buf| buf.len() >= size);
        let data = if let Some(i) = slot {
            idle.swap_remove(i)
        } else {
            drop(idle);
            match self.allocate_with_retry(size.max(self.inner.config.default_size)) {
                Ok(data) => data,
                Err(e) => return Err(e),
            }
        };

        self.inner.in_use.fetch_add(1, Ordering::SeqCst);

        Ok(Buffer {
            data,
            len: 0,
            pool: Some(self.inner.clone()),
        })
    }

    fn allocate_with_retry(&self, size: usize) -> Result<Vec<u8>, ResilienceError> {
        match try_allocate(size) {
            Ok(data) => {
                self.inner.total.fetch_add(1, Ordering::SeqCst);
                Ok(data)
            }
            Err(_) => {
                // Drop up to four idle buffers and retry once, giving the allocator a chance to
                // reclaim freed pages before surfacing AllocationFailed.
                let mut idle = self.inner.idle.lock().unwrap();
                let drop_n = idle.len().min(4);
                let dropped = idle.drain(..drop_n).count();
                drop(idle);
                self.inner.total.fetch_sub(dropped, Ordering::SeqCst);

                try_allocate(size)
                    .map(|data| {
                        self.inner.total.fetch_add(1, Ordering::SeqCst);
                        data
                    })
                    .map_err(|_| {
                        tracing::warn!(size, dropped, "allocation failed after reclaiming idle buffers");
                        ResilienceError::AllocationFailed
                    })
            }
        }
    }

    /// Releases a buffer back to the pool. Normally this happens automatically via `Drop`; this
    /// method exists for callers that want to release explicitly and reuse the `Buffer` value's
    /// lifetime for something else.
    pub fn release(&self, mut buffer: Buffer) {
        buffer.reset();
        // Dropping runs `Buffer::drop`, which performs the actual release.
        drop(buffer);
    }

    pub fn clear(&self) {
        let mut idle = self.inner.idle.lock().unwrap();
        let n = idle.len();
        idle.clear();
        self.inner.total.fetch_sub(n, Ordering::SeqCst);
    }

    /// Drains idle buffers and disallows further acquisition. Idempotent: concurrent callers
    /// all observe the same (first) outcome since `closed` only ever transitions false -> true.
    pub fn close(&self) {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.clear();
        }
    }

    pub fn stats(&self) -> BufferPoolStats {
        let in_use = self.inner.in_use.load(Ordering::SeqCst);
        let total = self.inner.total.load(Ordering::SeqCst);
        BufferPoolStats {
            idle: total.saturating_sub(in_use),
            in_use,
            total,
        }
    }
}

fn try_allocate(size: usize) -> Result<Vec<u8>, ()> {
    // `Vec::with_capacity` aborts rather than returning an error on real allocator failure in
    // stable Rust; this indirection exists so a future fallible-allocation API slots in here
    // without touching callers.
    Ok(vec![0u8; size])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolStats {
    pub idle: usize,
    pub in_use: usize,
    pub total: usize,
}

impl BufferPoolStats {
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.in_use as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> BufferPoolConfig {
        BufferPoolConfig {
            default_size: 4096,
            max_buffers: 8,
            min_buffer_size: 1024,
            max_buffer_size: 1024 * 1024,
        }
    }

    #[test]
    fn preallocates_half_of_max_buffers_capped_at_four() {
        let pool = BufferPool::new(small_config());
        assert_eq!(pool.stats().total, 4);
        assert_eq!(pool.stats().idle, 4);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn acquire_increments_in_use_and_release_decrements() {
        let pool = BufferPool::new(small_config());
        let buf = pool.acquire(2048).unwrap();
        assert_eq!(pool.stats().in_use, 1);
        pool.release(buf);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn total_equals_idle_plus_in_use_after_many_operations() {
        let pool = BufferPool::new(small_config());
        let mut held = Vec::new();
        for _ in 0..10 {
            held.push(pool.acquire(1024).unwrap());
        }
        let stats = pool.stats();
        assert_eq!(stats.total, stats.idle + stats.in_use);

        for buf in held {
            pool.release(buf);
        }
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.total, stats.idle);
    }

    #[test]
    fn rejects_invalid_size() {
        let pool = BufferPool::new(small_config());
        assert_eq!(
            pool.acquire(0).unwrap_err(),
            ResilienceError::InvalidSize("requested size 0 outside pool bounds".into())
        );
        assert!(pool.acquire(10 * 1024 * 1024).is_err());
    }

    #[test]
    fn closed_pool_rejects_acquire_and_silently_drops_release() {
        let pool = BufferPool::new(small_config());
        let buf = pool.acquire(1024).unwrap();
        pool.close();
        assert_eq!(pool.acquire(1024).unwrap_err(), ResilienceError::Closed);
        // Release after close must not panic and must not resurrect idle count.
        pool.release(buf);
        assert_eq!(pool.stats().idle, 0);
    }

    #[test]
    fn close_is_idempotent_across_repeated_calls() {
        let pool = BufferPool::new(small_config());
        pool.close();
        pool.close();
        assert_eq!(pool.stats().total, 0);
    }

    #[test]
    fn acquire_reuses_idle_buffer_with_sufficient_capacity() {
        let pool = BufferPool::new(small_config());
        let before = pool.stats().total;
        let buf = pool.acquire(1024).unwrap();
        assert!(buf.capacity() >= 1024);
        pool.release(buf);
        assert_eq!(pool.stats().total, before);
    }

    #[test]
    fn in_use_never_goes_negative_under_concurrent_load() {
        use std::thread;

        let pool = BufferPool::new(BufferPoolConfig {
            default_size: 4096,
            max_buffers: 32,
            min_buffer_size: 1024,
            max_buffer_size: 1024 * 1024,
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        let buf = pool.acquire(2048).unwrap();
                        pool.release(buf);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.total, stats.idle);
    }
}
