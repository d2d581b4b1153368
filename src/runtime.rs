/*!
 * Runtime: owns the shared buffer pool, thread-pool manager, and adaptive controller for
 * one process, and exposes the entry points that tie scanning, chunking, watching, and batch
 * dispatch together.
 */

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ingest_resilience::{
    AdaptiveController, BufferPool, LoadSample, MemoryMonitor, MemoryPressure, PoolType,
    ThreadPoolManager,
};

use crate::batch::{BatchOperation, BatchScheduler};
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::file_chunker::chunk_file;
use crate::scanner::scan_directory_cancellable;
use crate::types::{ChunkRecord, ChunkingOptions, FileChunkingResult, ScanOptions, ScanResult};
use crate::watcher::{EventFilter, EventWatcher};

fn pressure_to_f64(pressure: MemoryPressure) -> f64 {
    match pressure {
        MemoryPressure::Low => 0.2,
        MemoryPressure::Medium => 0.5,
        MemoryPressure::High => 0.65,
        MemoryPressure::Critical => 0.85,
        MemoryPressure::Emergency => 1.0,
    }
}

/// Outcome of a full directory ingestion pass: the scan summary plus every file's chunking
/// result (in scan order; a failed file's chunking error sits alongside its descriptor rather
/// than aborting the run).
pub struct IngestOutcome {
    pub scan: ScanResult,
    pub files: Vec<(std::path::PathBuf, Result<(FileChunkingResult, Vec<ChunkRecord>)>)>,
}

/// Process-wide handle to the pooled resources an ingestion run needs. Cheap to clone — every
/// clone shares the same underlying pools.
#[derive(Clone)]
pub struct Runtime {
    buffer_pool: BufferPool,
    thread_pools: Arc<ThreadPoolManager>,
    adaptive: Arc<AdaptiveController>,
    memory_monitor: Arc<MemoryMonitor>,
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let buffer_pool = BufferPool::new(config.pool.to_buffer_pool_config());
        let thread_pools = Arc::new(ThreadPoolManager::new());
        let adaptive = Arc::new(AdaptiveController::new());
        let memory_monitor = Arc::new(MemoryMonitor::new(config.pool.memory_pressure_threshold));

        Self {
            buffer_pool,
            thread_pools,
            adaptive,
            memory_monitor,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn thread_pools(&self) -> &Arc<ThreadPoolManager> {
        &self.thread_pools
    }

    pub fn adaptive(&self) -> &Arc<AdaptiveController> {
        &self.adaptive
    }

    /// Current memory-pressure reading, as the `[0.0, 1.0]` figure the batch scheduler's
    /// resource-aware strategy consumes.
    pub fn memory_pressure(&self) -> f64 {
        pressure_to_f64(self.memory_monitor.sample())
    }

    fn batch_scheduler(&self) -> BatchScheduler {
        let monitor = Arc::clone(&self.memory_monitor);
        BatchScheduler::with_pressure_source(
            self.buffer_pool.clone(),
            self.config.batch,
            Arc::new(move || pressure_to_f64(monitor.sample())),
        )
    }

    /// Walks `root`, then chunks every discovered file through the batch scheduler with bounded
    /// concurrency. Cancellation is cooperative: `cancelled` is checked by the scan and threaded
    /// into every chunking task.
    pub async fn ingest_directory(
        &self,
        root: &Path,
        scan_options: &ScanOptions,
        chunking_options: ChunkingOptions,
        cancelled: &Arc<AtomicBool>,
    ) -> IngestOutcome {
        let scan = scan_directory_cancellable(root, scan_options, cancelled);

        let scheduler = self.batch_scheduler();
        let op = BatchOperation {
            files: scan.files.clone(),
            options: chunking_options,
            priority: 0,
            deadline: None,
            strategy: crate::batch::BatchStrategy::ResourceAware,
        };
        scheduler.submit(op).await;

        let mut files = Vec::with_capacity(scan.files.len());
        for dispatch in scheduler.run_to_completion(cancelled).await {
            for (descriptor, outcome) in dispatch.results {
                files.push((descriptor.path, outcome));
            }
        }

        IngestOutcome { scan, files }
    }

    /// Chunks a single file directly, bypassing the batch scheduler — used for one-off or
    /// interactively-triggered ingestion (e.g. a file the watcher just reported as modified).
    pub async fn ingest_file(
        &self,
        file: crate::types::FileDescriptor,
        origin_file_id: u64,
        options: &ChunkingOptions,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<(FileChunkingResult, Vec<ChunkRecord>)> {
        chunk_file(file, origin_file_id, options, &self.buffer_pool, cancelled).await
    }

    /// Starts a debounced watch on `root`; events can be fed back into `ingest_file` by the
    /// caller's own loop.
    pub fn watch_directory(
        &self,
        root: &Path,
        options: crate::types::WatchOptions,
        filters: Vec<EventFilter>,
    ) -> Result<EventWatcher> {
        EventWatcher::new(root, options, filters)
    }

    /// Drains all thread pools within `deadline`, rejecting new work as it goes.
    pub async fn shutdown(&self, deadline: std::time::Duration) {
        self.thread_pools.shutdown_all(deadline).await;
    }

    /// One sizing-controller tick: every pool's current stats become a `LoadSample`, and the
    /// resulting recommendation is applied back to that same pool. Exposed standalone (rather
    /// than only via `spawn_adaptive_loops`) so tests can drive it deterministically instead of
    /// waiting on a real 30s timer.
    pub fn run_sizing_tick(&self) {
        for pool_type in [
            PoolType::Io,
            PoolType::Cpu,
            PoolType::Completion,
            PoolType::Batch,
            PoolType::Watch,
            PoolType::Mgmt,
        ] {
            let pool = self.thread_pools.pool(pool_type);
            let stats = pool.stats();
            let denom = (stats.max_size.max(1)) as f64;
            let total_attempts = (stats.completed + stats.rejected).max(1) as f64;
            let sample = LoadSample {
                utilization: stats.active as f64 / denom,
                failure_rate: stats.rejected as f64 / total_attempts,
                // No per-task latency histogram is tracked; queue depth is used as a proxy so a
                // pool with a deep backlog still looks "busy" to the failure/wait-time checks.
                wait_time_micros: if stats.queued == 0 { 0.0 } else { 200.0 },
            };
            let recommendation = self.adaptive.observe(sample);
            pool.trigger_adaptive_resize(recommendation);
        }
    }

    /// One memory-pressure tick: samples current pressure and, at HIGH or above, drops idle
    /// buffers; at CRITICAL or above, additionally halves every pool's ceiling via backpressure
    /// (the closest equivalent this runtime has to "force a GC" in a language with one).
    pub fn run_memory_tick(&self) -> MemoryPressure {
        let pressure = self.memory_monitor.sample();
        if pressure.should_trigger_cleanup() {
            tracing::info!(?pressure, "memory pressure high, dropping idle buffers");
            self.buffer_pool.clear();
        }
        if pressure.should_force_reclaim() {
            tracing::warn!(?pressure, "memory pressure critical, halving pool ceilings");
            for pool_type in [
                PoolType::Io,
                PoolType::Cpu,
                PoolType::Completion,
                PoolType::Batch,
                PoolType::Watch,
                PoolType::Mgmt,
            ] {
                self.thread_pools.pool(pool_type).apply_backpressure(0.5);
            }
        }
        pressure
    }

    /// Spawns the two background loops named by the adaptive-sizing contract: a ~30s sizing
    /// tick and a ~1s memory-pressure tick. Returns both join handles so a caller (typically the
    /// CLI binary) can abort them on shutdown; dropping the handles leaves the tasks running
    /// detached, which is fine for a process that's about to exit anyway.
    pub fn spawn_adaptive_loops(&self) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let sizing_runtime = self.clone();
        let sizing = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                ticker.tick().await;
                sizing_runtime.run_sizing_tick();
            }
        });

        let memory_runtime = self.clone();
        let memory = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                ticker.tick().await;
                memory_runtime.run_memory_tick();
            }
        });

        (sizing, memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkAlgorithmChoice;

    #[tokio::test]
    async fn ingest_directory_chunks_every_discovered_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), vec![1u8; 5_000]).unwrap();
        std::fs::write(dir.path().join("b.txt"), vec![2u8; 9_000]).unwrap();

        let runtime = Runtime::new(RuntimeConfig::default());
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut chunking = ChunkingOptions::default();
        chunking.algorithm = ChunkAlgorithmChoice::Fixed { chunk_size: 4096 };

        let outcome = runtime
            .ingest_directory(dir.path(), &ScanOptions::default(), chunking, &cancelled)
            .await;

        assert_eq!(outcome.scan.files.len(), 2);
        assert_eq!(outcome.files.len(), 2);
        for (_, result) in &outcome.files {
            assert!(result.is_ok());
        }
    }

    #[tokio::test]
    async fn ingest_file_chunks_a_single_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solo.bin");
        std::fs::write(&path, vec![7u8; 1_000]).unwrap();

        let runtime = Runtime::new(RuntimeConfig::default());
        let cancelled = Arc::new(AtomicBool::new(false));
        let descriptor = crate::types::FileDescriptor {
            path: path.clone(),
            size: 1_000,
            modified: None,
            is_symlink: false,
            is_sparse: false,
            link_target: None,
        };

        let (result, records) = runtime
            .ingest_file(descriptor, 0, &ChunkingOptions::default(), &cancelled)
            .await
            .unwrap();

        assert_eq!(result.total_size, 1_000);
        assert!(!records.is_empty());
    }

    #[test]
    fn sizing_tick_runs_without_panicking_on_an_idle_runtime() {
        let runtime = Runtime::new(RuntimeConfig::default());
        // An idle runtime has zero active/queued work on every pool; the tick should settle on
        // Maintain or Decrease, never panic on a division by a zero pool size.
        runtime.run_sizing_tick();
        runtime.run_sizing_tick();
    }

    #[test]
    fn memory_tick_returns_a_pressure_reading() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let pressure = runtime.run_memory_tick();
        // Whatever the host's actual memory pressure is, classification must produce one of the
        // five defined bands rather than panicking.
        assert!(matches!(
            pressure,
            MemoryPressure::Low
                | MemoryPressure::Medium
                | MemoryPressure::High
                | MemoryPressure::Critical
                | MemoryPressure::Emergency
        ));
    }
}
