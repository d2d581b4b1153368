//! Content-defined chunking (FastCDC + Gear hash) and MinHash similarity signatures.
//!
//! This crate implements the pure, allocation-light half of the ingestion pipeline: given a
//! chunk-size configuration and a byte window, find the next chunk boundary. It knows nothing
//! about files, threads, or pools — those concerns live in `ingest-resilience` and the root
//! crate's async file chunker.

pub mod gear;
pub mod minhash;

use std::io::{self, Read};

use gear::{build_gear_table, GearHash, GEAR_SEED};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid chunk configuration: {0}")]
    InvalidConfig(String),
}

/// Min/average/max chunk size bounds for FastCDC, plus the derived normalization masks.
#[derive(Debug, Clone, Copy)]
pub struct ChunkConfig {
    pub min_size: usize,
    pub avg_size: usize,
    pub max_size: usize,
    mask_strict: u64,
    mask_loose: u64,
}

impl ChunkConfig {
    /// Validates `0 < min < avg < max` and derives the strict/loose normalization masks from
    /// `bits = floor(log2(avg))`.
    pub fn new(min_size: usize, avg_size: usize, max_size: usize) -> Result<Self, ChunkError> {
        if min_size == 0 {
            return Err(ChunkError::InvalidConfig(
                "min_size must be greater than zero".into(),
            ));
        }
        if !(min_size < avg_size && avg_size < max_size) {
            return Err(ChunkError::InvalidConfig(format!(
                "chunk sizes must satisfy min < avg < max, got ({min_size}, {avg_size}, {max_size})"
            )));
        }

        let bits = 63 - (avg_size as u64).leading_zeros();
        if bits == 0 {
            return Err(ChunkError::InvalidConfig(
                "avg_size too small to derive normalization masks".into(),
            ));
        }
        let mask_strict = (1u64 << (bits + 1)) - 1;
        let mask_loose = (1u64 << (bits - 1)) - 1;

        Ok(Self {
            min_size,
            avg_size,
            max_size,
            mask_strict,
            mask_loose,
        })
    }

    /// `(4 KiB, 64 KiB, 256 KiB)` — the bounds used throughout the testable-properties scenarios.
    pub fn default_config() -> Self {
        Self::new(4 * 1024, 64 * 1024, 256 * 1024).expect("default bounds are valid")
    }
}

/// A FastCDC chunker bound to one gear table and one size configuration. Stateless and `Sync`;
/// safe to share across concurrently-chunked files.
#[derive(Clone)]
pub struct FastCdcChunker {
    config: ChunkConfig,
    table: [u64; 256],
}

impl FastCdcChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self::with_seed(config, GEAR_SEED)
    }

    /// Construct with an explicit gear-table seed. Exposed mainly for tests that want to prove
    /// two different seeds produce different boundaries.
    pub fn with_seed(config: ChunkConfig, seed: u64) -> Self {
        Self {
            config,
            table: build_gear_table(seed),
        }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Finds the next chunk boundary in `data[offset..offset+length]`, returning the boundary
    /// as a length relative to `offset` (i.e. `data[offset..offset+result]` is the chunk).
    ///
    /// `data` must have at least `offset + length` bytes.
    pub fn next_chunk(&self, data: &[u8], offset: usize, length: usize) -> usize {
        let min = self.config.min_size;
        let avg = self.config.avg_size;
        let max = self.config.max_size;

        if length <= min {
            return length;
        }

        let mid = (offset + avg).min(offset + length).min(offset + max);
        let limit = (offset + max).min(offset + length);

        let mut hash = GearHash::new(&self.table);

        let mut p = offset + min;
        while p < mid {
            let fp = hash.roll(data[p]);
            if fp & self.config.mask_strict == 0 {
                return p - offset + 1;
            }
            p += 1;
        }

        let mut p = mid;
        while p < limit {
            let fp = hash.roll(data[p]);
            if fp & self.config.mask_loose == 0 {
                return p - offset + 1;
            }
            p += 1;
        }

        limit - offset
    }
}

/// A fixed-size chunker used for `ChunkAlgorithm::Fixed`. Ignores content entirely.
#[derive(Clone, Copy)]
pub struct FixedChunker {
    pub chunk_size: usize,
}

impl FixedChunker {
    pub fn next_chunk(&self, _data: &[u8], _offset: usize, length: usize) -> usize {
        length.min(self.chunk_size)
    }
}

/// Selects between content-defined and fixed-size chunking. A tagged variant standing in for
/// what would otherwise be a dynamically dispatched chunker interface.
#[derive(Clone)]
pub enum ChunkAlgorithm {
    Cdc(FastCdcChunker),
    Fixed(FixedChunker),
}

impl ChunkAlgorithm {
    pub fn next_chunk(&self, data: &[u8], offset: usize, length: usize) -> usize {
        match self {
            ChunkAlgorithm::Cdc(c) => c.next_chunk(data, offset, length),
            ChunkAlgorithm::Fixed(c) => c.next_chunk(data, offset, length),
        }
    }
}

/// One content-defined chunk: its position in the source, its digest, and (for in-memory
/// callers) its bytes.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub offset: u64,
    pub length: usize,
    pub digest: [u8; 32],
    pub data: Vec<u8>,
    pub is_zero: bool,
}

/// Streaming chunker over any `Read`. Buffers up to `2 * max_size` bytes so a forced cut at
/// `max_size` is always found within one fill. Intended for synchronous/test use; the async file
/// chunker in the root crate reimplements this loop against a pool-leased buffer and
/// non-blocking I/O rather than reusing this type directly.
pub struct ChunkStream<R: Read> {
    reader: R,
    algorithm: ChunkAlgorithm,
    buffer: Vec<u8>,
    buffer_len: usize,
    buffer_pos: usize,
    stream_offset: u64,
    finished: bool,
}

impl<R: Read> ChunkStream<R> {
    pub fn new(reader: R, config: ChunkConfig) -> Self {
        let max_size = config.max_size;
        Self::with_algorithm(reader, ChunkAlgorithm::Cdc(FastCdcChunker::new(config)), max_size)
    }

    pub fn with_algorithm(reader: R, algorithm: ChunkAlgorithm, max_size: usize) -> Self {
        Self {
            reader,
            algorithm,
            buffer: vec![0u8; max_size * 2],
            buffer_len: 0,
            buffer_pos: 0,
            stream_offset: 0,
            finished: false,
        }
    }

    fn fill_buffer(&mut self) -> io::Result<()> {
        let residue = self.buffer_len - self.buffer_pos;
        if self.buffer_pos > 0 {
            self.buffer.copy_within(self.buffer_pos..self.buffer_len, 0);
            self.buffer_len = residue;
            self.buffer_pos = 0;
        }

        while self.buffer_len < self.buffer.len() {
            match self.reader.read(&mut self.buffer[self.buffer_len..]) {
                Ok(0) => break,
                Ok(n) => self.buffer_len += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn next_chunk(&mut self) -> Option<Result<Chunk, ChunkError>> {
        if self.finished {
            return None;
        }

        loop {
            if let Err(e) = self.fill_buffer() {
                self.finished = true;
                return Some(Err(e.into()));
            }

            let available = self.buffer_len - self.buffer_pos;
            if available == 0 {
                self.finished = true;
                return None;
            }

            // fill_buffer's short read (buffer not topped up to capacity) is the only signal we
            // have that the underlying reader is exhausted.
            let at_eof = self.buffer_len < self.buffer.len();
            let cut = self.algorithm.next_chunk(&self.buffer, self.buffer_pos, available);

            let full_chunk = cut < available || (cut == available && at_eof);
            if !full_chunk {
                // Not at EOF and the algorithm wants more bytes than we have buffered. The
                // buffer is sized 2*max_size so this only happens transiently; loop to refill.
                continue;
            }

            let offset = self.stream_offset;
            let chunk_data = self.buffer[self.buffer_pos..self.buffer_pos + cut].to_vec();
            let is_zero = chunk_data.iter().all(|&b| b == 0);
            let digest = *blake3::hash(&chunk_data).as_bytes();

            self.buffer_pos += cut;
            self.stream_offset += cut as u64;

            return Some(Ok(Chunk {
                offset,
                length: cut,
                digest,
                data: chunk_data,
                is_zero,
            }));
        }
    }
}

impl<R: Read> Iterator for ChunkStream<R> {
    type Item = Result<Chunk, ChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn config_rejects_bad_ordering() {
        assert!(ChunkConfig::new(0, 10, 20).is_err());
        assert!(ChunkConfig::new(20, 10, 30).is_err());
        assert!(ChunkConfig::new(10, 30, 20).is_err());
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let stream = ChunkStream::new(Cursor::new(Vec::<u8>::new()), ChunkConfig::default_config());
        let chunks: Vec<_> = stream.collect::<Result<Vec<_>, _>>().unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn tiny_input_below_min_is_one_chunk() {
        let config = ChunkConfig::new(4096, 8192, 16384).unwrap();
        let data = vec![7u8; 17];
        let stream = ChunkStream::new(Cursor::new(data.clone()), config);
        let chunks: Vec<_> = stream.collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[0].length, 17);
        assert_eq!(chunks[0].digest, *blake3::hash(&data).as_bytes());
    }

    #[test]
    fn exactly_min_size_is_one_chunk() {
        let config = ChunkConfig::new(4096, 8192, 16384).unwrap();
        let data = vec![9u8; 4096];
        let stream = ChunkStream::new(Cursor::new(data), config);
        let chunks: Vec<_> = stream.collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].length, 4096);
    }

    fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state & 0xFF) as u8
            })
            .collect()
    }

    #[test]
    fn sums_to_total_size_and_reconstructs_bytes() {
        let config = ChunkConfig::default_config();
        let data = pseudo_random_bytes(10 * 1024 * 1024, 12345);
        let stream = ChunkStream::new(Cursor::new(data.clone()), config);
        let chunks: Vec<_> = stream.collect::<Result<Vec<_>, _>>().unwrap();

        let total: usize = chunks.iter().map(|c| c.length).sum();
        assert_eq!(total, data.len());

        let mut reconstructed = Vec::with_capacity(data.len());
        for chunk in &chunks {
            reconstructed.extend_from_slice(&chunk.data);
        }
        assert_eq!(reconstructed, data);

        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.length >= config.min_size);
            assert!(chunk.length <= config.max_size);
        }
    }

    #[test]
    fn chunking_is_deterministic_across_runs() {
        let config = ChunkConfig::default_config();
        let data = pseudo_random_bytes(2 * 1024 * 1024, 999);

        let run1: Vec<_> = ChunkStream::new(Cursor::new(data.clone()), config)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let run2: Vec<_> = ChunkStream::new(Cursor::new(data), config)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(run1.len(), run2.len());
        for (a, b) in run1.iter().zip(run2.iter()) {
            assert_eq!(a.offset, b.offset);
            assert_eq!(a.length, b.length);
            assert_eq!(a.digest, b.digest);
        }
    }

    #[test]
    fn insertion_only_shifts_nearby_boundaries() {
        let config = ChunkConfig::default_config();
        let original = pseudo_random_bytes(1024 * 1024, 42);

        let mut modified = original.clone();
        let insert_at = 500 * 1024;
        let inserted: Vec<u8> = pseudo_random_bytes(100, 7);
        modified.splice(insert_at..insert_at, inserted.iter().cloned());

        let chunks_a: Vec<_> = ChunkStream::new(Cursor::new(original), config)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let chunks_b: Vec<_> = ChunkStream::new(Cursor::new(modified), config)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        let safe_boundary = insert_at.saturating_sub(config.avg_size) as u64;
        let unaffected_prefix: Vec<_> = chunks_a
            .iter()
            .take_while(|c| c.offset < safe_boundary)
            .collect();
        for (a, b) in unaffected_prefix.iter().zip(chunks_b.iter()) {
            assert_eq!(a.digest, b.digest);
            assert_eq!(a.offset, b.offset);
        }
        assert!(!unaffected_prefix.is_empty());
    }

    #[test]
    fn fixed_mode_ignores_content() {
        let data = vec![0u8; 10_000];
        let stream = ChunkStream::with_algorithm(
            Cursor::new(data),
            ChunkAlgorithm::Fixed(FixedChunker { chunk_size: 4096 }),
            4096,
        );
        let chunks: Vec<_> = stream.collect::<Result<Vec<_>, _>>().unwrap();
        let lengths: Vec<_> = chunks.iter().map(|c| c.length).collect();
        assert_eq!(lengths, vec![4096, 4096, 1808]);
    }
}
