/*!
 * Async file chunker: streams one file through a pool-leased buffer, feeding each filled
 * window to the content-defined (or fixed-size) chunker and folding every full chunk into an
 * incremental whole-file digest.
 *
 * A single file is chunked on one cooperative task end to end; the caller (the scanner or batch
 * scheduler) is responsible for running many of these concurrently up to its own concurrency
 * bound.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncReadExt;

use ingest_cdc::gear::GEAR_SEED;
use ingest_cdc::minhash::compute_signature;
use ingest_cdc::{ChunkAlgorithm, ChunkConfig, FastCdcChunker, FixedChunker};
use ingest_resilience::BufferPool;

use crate::error::{IngestError, Result};
use crate::types::{
    ChunkAlgorithmChoice, ChunkProgress, ChunkRecord, ChunkingOptions, FileChunkingResult,
    FileDescriptor,
};

/// Read buffer size named by the ingestion contract; the pool lease is sized to at least twice
/// the chunker's max chunk size so a forced cut at `max` is always found within one fill,
/// matching `ingest_cdc::ChunkStream`'s `2 * max_size` buffering.
const READ_BUFFER_SIZE: usize = 1024 * 1024;

fn build_algorithm(choice: ChunkAlgorithmChoice) -> Result<ChunkAlgorithm> {
    match choice {
        ChunkAlgorithmChoice::Cdc { min, avg, max } => {
            let config = ChunkConfig::new(min, avg, max)?;
            Ok(ChunkAlgorithm::Cdc(FastCdcChunker::new(config)))
        }
        ChunkAlgorithmChoice::Fixed { chunk_size } => {
            if chunk_size == 0 {
                return Err(IngestError::InvalidConfig(
                    "fixed chunk_size must be greater than zero".into(),
                ));
            }
            Ok(ChunkAlgorithm::Fixed(FixedChunker { chunk_size }))
        }
    }
}

fn configured_max_size(choice: &ChunkAlgorithmChoice) -> usize {
    match choice {
        ChunkAlgorithmChoice::Cdc { max, .. } => *max,
        ChunkAlgorithmChoice::Fixed { chunk_size } => *chunk_size,
    }
}

/// Chunks `file`'s contents, returning the whole-file summary plus the ordered chunk records.
/// `origin_file_id` is stamped onto every record so a caller combining several files' chunks
/// into one stream can tell them apart.
///
/// The pool-leased buffer is released automatically when this function returns (success,
/// error, or cancellation) because `Buffer::drop` always returns it to the pool — there is no
/// explicit release call to forget on an error path.
pub async fn chunk_file(
    file: FileDescriptor,
    origin_file_id: u64,
    options: &ChunkingOptions,
    buffer_pool: &BufferPool,
    cancelled: &Arc<AtomicBool>,
) -> Result<(FileChunkingResult, Vec<ChunkRecord>)> {
    if !file.path.is_file() {
        return Err(IngestError::InvalidFile(file.path.clone()));
    }

    let algorithm = build_algorithm(options.algorithm)?;
    let capacity = READ_BUFFER_SIZE.max(configured_max_size(&options.algorithm) * 2);
    let mut buffer = buffer_pool.acquire(capacity)?;

    let mut handle = File::open(&file.path)
        .await
        .map_err(|e| IngestError::Io {
            path: file.path.clone(),
            source: e,
        })?;

    if let Some(cb) = &options.status_cb {
        cb("opened");
    }

    let file_size = file.size;
    let mut hasher = blake3::Hasher::new();
    let mut chunk_digests: Vec<[u8; 32]> = Vec::new();
    let mut records: Vec<ChunkRecord> = Vec::new();

    let mut buf_pos = 0usize;
    let mut buf_len = 0usize;
    let mut read_pos = 0u64;
    let mut total_emitted = 0u64;

    loop {
        if cancelled.load(Ordering::Relaxed) {
            return Err(IngestError::Cancelled);
        }

        if buf_pos > 0 {
            buffer.as_mut_slice().copy_within(buf_pos..buf_len, 0);
            buf_len -= buf_pos;
            buf_pos = 0;
        }

        if buf_len < buffer.capacity() && read_pos < file_size {
            let n = handle
                .read(&mut buffer.as_mut_slice()[buf_len..])
                .await
                .map_err(|e| IngestError::Io {
                    path: file.path.clone(),
                    source: e,
                })?;
            read_pos += n as u64;
            buf_len += n;
        }

        if buf_len == buf_pos {
            break;
        }

        loop {
            if cancelled.load(Ordering::Relaxed) {
                return Err(IngestError::Cancelled);
            }

            let available = buf_len - buf_pos;
            if available == 0 {
                break;
            }
            let at_eof = read_pos == file_size;

            let cut = {
                let window = &buffer.as_mut_slice()[..buf_len];
                algorithm.next_chunk(window, buf_pos, available)
            };

            let configured_max = configured_max_size(&options.algorithm);
            let full_chunk = cut < available || (cut == available && (cut == configured_max || at_eof));
            if !full_chunk {
                break;
            }

            let digest = {
                let slice = &buffer.as_mut_slice()[buf_pos..buf_pos + cut];
                hasher.update(slice);
                *blake3::hash(slice).as_bytes()
            };

            chunk_digests.push(digest);
            records.push(ChunkRecord {
                offset: total_emitted,
                length: cut as u32,
                digest,
                origin_file_id,
            });

            buf_pos += cut;
            total_emitted += cut as u64;

            if let Some(cb) = &options.progress_cb {
                cb(ChunkProgress {
                    file_size,
                    bytes_processed: total_emitted,
                    chunks_emitted: records.len(),
                });
            }
        }

        if read_pos == file_size && buf_pos == buf_len {
            break;
        }
    }

    if let Some(cb) = &options.status_cb {
        cb("finalizing");
    }

    let file_digest = *hasher.finalize().as_bytes();
    let similarity_signature = compute_signature(&chunk_digests, options.minhash_k, GEAR_SEED);

    let result = FileChunkingResult {
        file,
        chunk_count: records.len(),
        total_size: total_emitted,
        file_digest,
        chunk_digests,
        similarity_signature,
    };

    Ok((result, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkAlgorithmChoice;
    use ingest_resilience::{BufferPool, BufferPoolConfig};
    use std::sync::atomic::AtomicBool;

    fn descriptor_for(path: std::path::PathBuf, size: u64) -> FileDescriptor {
        FileDescriptor {
            path,
            size,
            modified: None,
            is_symlink: false,
            is_sparse: false,
            link_target: None,
        }
    }

    #[tokio::test]
    async fn empty_file_yields_no_chunks_and_empty_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let pool = BufferPool::new(BufferPoolConfig::default_config());
        let cancelled = Arc::new(AtomicBool::new(false));
        let options = ChunkingOptions::default();

        let (result, records) = chunk_file(descriptor_for(path, 0), 0, &options, &pool, &cancelled)
            .await
            .unwrap();

        assert_eq!(result.chunk_count, 0);
        assert!(records.is_empty());
        assert_eq!(result.file_digest, *blake3::hash(b"").as_bytes());
    }

    #[tokio::test]
    async fn tiny_file_below_min_is_a_single_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny");
        let data = vec![9u8; 17];
        std::fs::write(&path, &data).unwrap();

        let pool = BufferPool::new(BufferPoolConfig::default_config());
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut options = ChunkingOptions::default();
        options.algorithm = ChunkAlgorithmChoice::Cdc {
            min: 4096,
            avg: 8192,
            max: 16384,
        };

        let (result, records) =
            chunk_file(descriptor_for(path, 17), 0, &options, &pool, &cancelled)
                .await
                .unwrap();

        assert_eq!(result.chunk_count, 1);
        assert_eq!(records[0].length, 17);
        assert_eq!(result.total_size, 17);
        assert_eq!(result.file_digest, *blake3::hash(&data).as_bytes());
    }

    #[tokio::test]
    async fn sum_of_chunk_lengths_equals_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big");
        let mut state = 12345u64;
        let data: Vec<u8> = (0..4 * 1024 * 1024)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state & 0xFF) as u8
            })
            .collect();
        std::fs::write(&path, &data).unwrap();

        let pool = BufferPool::new(BufferPoolConfig::default_config());
        let cancelled = Arc::new(AtomicBool::new(false));
        let options = ChunkingOptions::default();

        let (result, records) = chunk_file(
            descriptor_for(path, data.len() as u64),
            7,
            &options,
            &pool,
            &cancelled,
        )
        .await
        .unwrap();

        let total: u64 = records.iter().map(|r| r.length as u64).sum();
        assert_eq!(total, data.len() as u64);
        assert_eq!(result.total_size, data.len() as u64);
        assert!(records.iter().all(|r| r.origin_file_id == 7));
        assert_eq!(result.similarity_signature.len(), options.minhash_k);
    }

    #[tokio::test]
    async fn fixed_mode_cuts_at_exact_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixed");
        std::fs::write(&path, vec![0u8; 10_000]).unwrap();

        let pool = BufferPool::new(BufferPoolConfig::default_config());
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut options = ChunkingOptions::default();
        options.algorithm = ChunkAlgorithmChoice::Fixed { chunk_size: 4096 };

        let (result, records) =
            chunk_file(descriptor_for(path, 10_000), 0, &options, &pool, &cancelled)
                .await
                .unwrap();

        let lengths: Vec<u32> = records.iter().map(|r| r.length).collect();
        assert_eq!(lengths, vec![4096, 4096, 1808]);
        assert_eq!(result.chunk_count, 3);
    }

    #[tokio::test]
    async fn cancellation_is_observed_before_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cancel");
        std::fs::write(&path, vec![1u8; 1_000_000]).unwrap();

        let pool = BufferPool::new(BufferPoolConfig::default_config());
        let cancelled = Arc::new(AtomicBool::new(true));
        let options = ChunkingOptions::default();

        let result = chunk_file(
            descriptor_for(path, 1_000_000),
            0,
            &options,
            &pool,
            &cancelled,
        )
        .await;

        assert!(matches!(result, Err(IngestError::Cancelled)));
    }

    #[tokio::test]
    async fn missing_file_is_invalid_file_error() {
        let pool = BufferPool::new(BufferPoolConfig::default_config());
        let cancelled = Arc::new(AtomicBool::new(false));
        let options = ChunkingOptions::default();

        let result = chunk_file(
            descriptor_for(std::path::PathBuf::from("/nonexistent/path/xyz"), 0),
            0,
            &options,
            &pool,
            &cancelled,
        )
        .await;

        assert!(matches!(result, Err(IngestError::InvalidFile(_))));
    }
}
