/*!
 * Batch processor & scheduler: a priority queue of file batches dispatched to the file
 * chunker with bounded parallelism, under one of several sizing/locality strategies.
 */

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};

use crate::config::BatchConfiguration;
use crate::error::{IngestError, Result};
use crate::file_chunker::chunk_file;
use crate::types::{ChunkRecord, ChunkingOptions, FileChunkingResult, FileDescriptor};
use ingest_resilience::BufferPool;

/// How a batch's files are grouped/sized before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStrategy {
    /// Small-file-heavy workloads get larger batches to amortize per-file overhead.
    SizeBased,
    /// Group by path prefix so files dispatched together tend to share I/O locality.
    LocationBased,
    /// Smaller batches to minimize latency of high-priority work.
    PriorityBased,
    /// Shrinks under memory pressure per the resource-aware formula.
    ResourceAware,
    /// Bigger batches, more parallelism — tuned for NVMe-class random-access throughput.
    NvmeOptimized,
    /// Smaller, sequential batches — tuned for rotational media.
    HddOptimized,
}

/// Computes the resource-aware batch size: `max(floor(base * 2^-k), min_batch)` where `k` steps
/// with memory pressure — 0 below 0.6, 1 in `[0.6, 0.8]`, 2 above 0.8.
pub fn resource_aware_batch_size(base: usize, min_batch: usize, pressure: f64) -> usize {
    let k: i32 = if pressure > 0.8 {
        2
    } else if pressure >= 0.6 {
        1
    } else {
        0
    };
    let scaled = ((base as f64) * 2f64.powi(-k)).floor() as usize;
    scaled.max(min_batch)
}

impl BatchStrategy {
    /// Splits `files` into sub-batches according to this strategy, given the scheduler's base
    /// size, floor, and the current memory-pressure reading (only consulted by
    /// `ResourceAware`).
    fn partition(
        &self,
        files: &[FileDescriptor],
        base: usize,
        min_batch: usize,
        pressure: f64,
    ) -> Vec<Vec<FileDescriptor>> {
        match self {
            BatchStrategy::SizeBased => chunk_by(files, (base * 2).max(min_batch)),
            BatchStrategy::PriorityBased => chunk_by(files, (base / 2).max(min_batch)),
            BatchStrategy::ResourceAware => {
                chunk_by(files, resource_aware_batch_size(base, min_batch, pressure))
            }
            BatchStrategy::NvmeOptimized => chunk_by(files, (base * 4).max(min_batch)),
            BatchStrategy::HddOptimized => chunk_by(files, (base / 4).max(min_batch)),
            BatchStrategy::LocationBased => group_by_prefix(files, base.max(min_batch)),
        }
    }
}

fn chunk_by(files: &[FileDescriptor], size: usize) -> Vec<Vec<FileDescriptor>> {
    let size = size.max(1);
    files.chunks(size).map(|c| c.to_vec()).collect()
}

fn group_by_prefix(files: &[FileDescriptor], cap: usize) -> Vec<Vec<FileDescriptor>> {
    use std::collections::BTreeMap;
    let mut groups: BTreeMap<PathBuf, Vec<FileDescriptor>> = BTreeMap::new();
    for file in files {
        let prefix = file.path.parent().map(Path::to_path_buf).unwrap_or_default();
        groups.entry(prefix).or_default().push(file.clone());
    }

    let mut batches = Vec::new();
    for (_, group) in groups {
        batches.extend(chunk_by(&group, cap.max(1)));
    }
    batches
}

/// One operation submitted to the scheduler: a set of files to chunk together under one set of
/// chunking options, a priority, and an optional deadline.
#[derive(Clone)]
pub struct BatchOperation {
    pub files: Vec<FileDescriptor>,
    pub options: ChunkingOptions,
    pub priority: i32,
    pub deadline: Option<Instant>,
    pub strategy: BatchStrategy,
}

struct QueuedBatch {
    id: u64,
    op: BatchOperation,
    submitted_at: Instant,
}

impl PartialEq for QueuedBatch {
    fn eq(&self, other: &Self) -> bool {
        self.op.priority == other.op.priority && self.submitted_at == other.submitted_at
    }
}
impl Eq for QueuedBatch {}

impl Ord for QueuedBatch {
    /// `(priority desc, submission_time asc)`: `BinaryHeap` is a max-heap, so higher priority
    /// must compare greater, and for equal priority the earlier-submitted entry must compare
    /// greater so it pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.op
            .priority
            .cmp(&other.op.priority)
            .then_with(|| other.submitted_at.cmp(&self.submitted_at))
    }
}
impl PartialOrd for QueuedBatch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The outcome of dispatching one batch: per-file results, kept in the same order files were
/// supplied, with failures reported alongside successes rather than aborting the whole batch.
pub struct BatchDispatchResult {
    pub batch_id: u64,
    pub results: Vec<(FileDescriptor, Result<(FileChunkingResult, Vec<ChunkRecord>)>)>,
}

/// Priority queue of `BatchOperation`s, dispatched to the file chunker with bounded parallelism.
pub struct BatchScheduler {
    heap: Mutex<BinaryHeap<QueuedBatch>>,
    semaphore: Arc<Semaphore>,
    buffer_pool: BufferPool,
    next_id: AtomicU64,
    config: BatchConfiguration,
    pressure_fn: Arc<dyn Fn() -> f64 + Send + Sync>,
}

impl BatchScheduler {
    pub fn new(buffer_pool: BufferPool, config: BatchConfiguration) -> Self {
        Self::with_pressure_source(buffer_pool, config, Arc::new(|| 0.0))
    }

    pub fn with_pressure_source(
        buffer_pool: BufferPool,
        config: BatchConfiguration,
        pressure_fn: Arc<dyn Fn() -> f64 + Send + Sync>,
    ) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_batches.max(1))),
            buffer_pool,
            next_id: AtomicU64::new(1),
            config,
            pressure_fn,
        }
    }

    /// Enqueues an operation, returning its assigned id (monotonically increasing, not reused).
    pub async fn submit(&self, op: BatchOperation) -> u64 {
        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        let mut heap = self.heap.lock().await;
        heap.push(QueuedBatch {
            id,
            op,
            submitted_at: Instant::now(),
        });
        id
    }

    pub async fn queue_len(&self) -> usize {
        self.heap.lock().await.len()
    }

    /// Acquires a concurrency permit, pops the highest-priority queued operation, partitions it
    /// per its strategy, and dispatches every sub-batch's files to the file chunker
    /// concurrently. Returns `None` once the queue is empty.
    pub async fn run_one(&self, cancelled: &Arc<AtomicBool>) -> Option<BatchDispatchResult> {
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;

        let queued = {
            let mut heap = self.heap.lock().await;
            heap.pop()
        };
        let Some(queued) = queued else {
            drop(permit);
            return None;
        };

        if let Some(deadline) = queued.op.deadline {
            if Instant::now() > deadline {
                return Some(BatchDispatchResult {
                    batch_id: queued.id,
                    results: queued
                        .op
                        .files
                        .into_iter()
                        .map(|f| (f, Err(IngestError::Overloaded { retry_after_ms: 0 })))
                        .collect(),
                });
            }
        }

        let pressure = (self.pressure_fn)();
        let sub_batches = queued.op.strategy.partition(
            &queued.op.files,
            self.config.base_batch_size,
            self.config.min_batch_size,
            pressure,
        );

        let mut results = Vec::with_capacity(queued.op.files.len());
        for sub_batch in sub_batches {
            let mut futures = Vec::with_capacity(sub_batch.len());
            for (idx, file) in sub_batch.iter().enumerate() {
                let file = file.clone();
                let options = queued.op.options.clone();
                let pool = self.buffer_pool.clone();
                let cancelled = Arc::clone(cancelled);
                let origin_id = (queued.id << 32) | idx as u64;
                futures.push(async move {
                    let outcome = chunk_file(file.clone(), origin_id, &options, &pool, &cancelled).await;
                    (file, outcome)
                });
            }
            results.extend(futures::future::join_all(futures).await);
        }

        drop(permit);
        Some(BatchDispatchResult {
            batch_id: queued.id,
            results,
        })
    }

    /// Drains the queue, running batches with up to `max_concurrent_batches` in flight, until
    /// empty or cancellation is observed.
    pub async fn run_to_completion(&self, cancelled: &Arc<AtomicBool>) -> Vec<BatchDispatchResult> {
        let mut all = Vec::new();
        loop {
            if cancelled.load(AtomicOrdering::Relaxed) {
                break;
            }
            match self.run_one(cancelled).await {
                Some(result) => all.push(result),
                None => break,
            }
        }
        all
    }
}

/// Deadline helper: converts a relative duration into an `Instant` deadline.
pub fn deadline_in(duration: Duration) -> Instant {
    Instant::now() + duration
}
