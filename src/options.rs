//! Configuration for the database, column families, reads, and writes.
//!
//! All knobs are plain documented struct fields with `Default` impls; the
//! semantic effect of each option is specified on the field. Trait-object
//! collaborators (comparator, merge operator, prefix extractor, env, rate
//! limiter, compaction filter) ride along as `Arc`s.

use std::sync::Arc;

use crate::cache::BlockCache;
use crate::compaction::CompactionFilter;
use crate::comparator::{BytewiseComparator, Comparator};
use crate::encoding::ChecksumType;
use crate::env::{Env, PosixEnv};
use crate::merge::MergeOperator;
use crate::prefix::PrefixExtractor;
use crate::rate_limiter::{NoopRateLimiter, RateLimiter};
use crate::types::SequenceNumber;

/// Compaction strategy for one column family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStyle {
    /// Leveled: score levels, merge into the next level.
    Level,
    /// Universal: merge sorted runs when size ratios or counts trigger.
    Universal,
    /// FIFO: drop oldest files beyond a total-size or TTL bound.
    Fifo,
}

/// Block compression algorithm. The numeric tags are part of the on-disk
/// block trailer format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    /// Store blocks raw.
    None = 0,
    /// Snappy framing.
    Snappy = 1,
    /// Raw deflate (no zlib wrapper).
    Zlib = 2,
    /// LZ4 block format with a varint size prefix.
    Lz4 = 4,
    /// LZ4 high-compression; identical decode path to LZ4.
    Lz4hc = 5,
    /// Zstandard.
    Zstd = 7,
}

impl CompressionType {
    /// Decode a block-trailer tag byte.
    pub fn from_u8(b: u8) -> Option<CompressionType> {
        Some(match b {
            0 => CompressionType::None,
            1 => CompressionType::Snappy,
            2 => CompressionType::Zlib,
            4 => CompressionType::Lz4,
            5 => CompressionType::Lz4hc,
            7 => CompressionType::Zstd,
            _ => return None,
        })
    }
}

/// Database-wide options.
#[derive(Clone)]
pub struct Options {
    /// Filesystem gateway. All I/O goes through this object.
    pub env: Arc<dyn Env>,

    /// Create the database if the directory holds none; otherwise opening
    /// a missing database fails with `InvalidArgument`.
    pub create_if_missing: bool,

    /// Fail if a database already exists at the path.
    pub error_if_exists: bool,

    /// Verify checksums aggressively on every internal read.
    pub paranoid_checks: bool,

    /// Upper bound on concurrent background flush + compaction jobs.
    pub max_background_jobs: usize,

    /// Maximum parallel subcompactions within one compaction.
    pub max_subcompactions: usize,

    /// Shared block cache for hot data blocks; `None` disables caching.
    pub block_cache: Option<Arc<BlockCache>>,

    /// Byte-quota gate for background file writes.
    pub rate_limiter: Arc<dyn RateLimiter>,

    /// Bypass the OS page cache for table reads.
    pub use_direct_reads: bool,

    /// Bypass the OS page cache for flush and compaction writes.
    pub use_direct_io_for_flush_and_compaction: bool,

    /// Options for the default column family.
    pub cf_options: ColumnFamilyOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            env: Arc::new(PosixEnv),
            create_if_missing: false,
            error_if_exists: false,
            paranoid_checks: false,
            max_background_jobs: 2,
            max_subcompactions: 1,
            block_cache: None,
            rate_limiter: Arc::new(NoopRateLimiter),
            use_direct_reads: false,
            use_direct_io_for_flush_and_compaction: false,
            cf_options: ColumnFamilyOptions::default(),
        }
    }
}

/// Per-column-family options.
#[derive(Clone)]
pub struct ColumnFamilyOptions {
    /// Key ordering; persisted by name, mismatch on reopen is fatal.
    pub comparator: Arc<dyn Comparator>,

    /// Combine function for `Merge` writes; absent ⇒ merges error.
    pub merge_operator: Option<Arc<dyn MergeOperator>>,

    /// Enables prefix bloom filters and prefix seeks.
    pub prefix_extractor: Option<Arc<dyn PrefixExtractor>>,

    /// User hook consulted for every key during compaction.
    pub compaction_filter: Option<Arc<dyn CompactionFilter>>,

    /// Memtable size (bytes) before it is switched for flushing.
    pub write_buffer_size: usize,

    /// Active + immutable memtables allowed before writers stall.
    pub max_write_buffer_number: usize,

    /// L0 file count that triggers a compaction.
    pub level0_file_num_compaction_trigger: usize,

    /// L0 file count at which each write is delayed.
    pub level0_slowdown_writes_trigger: usize,

    /// L0 file count at which writes stop until compaction catches up.
    pub level0_stop_writes_trigger: usize,

    /// Number of levels (L0..L`num_levels - 1`).
    pub num_levels: usize,

    /// Target total bytes for L1; deeper levels multiply.
    pub max_bytes_for_level_base: u64,

    /// Per-level size multiplier beyond L1.
    pub max_bytes_for_level_multiplier: f64,

    /// Target size of one output file at L1; deeper levels multiply by 2.
    pub target_file_size_base: u64,

    /// Compaction strategy.
    pub compaction_style: CompactionStyle,

    /// FIFO only: total table bytes retained before the oldest files are
    /// dropped.
    pub max_table_files_size: u64,

    /// FIFO only: drop files older than this many seconds (0 = disabled).
    pub ttl_seconds: u64,

    /// Block compression.
    pub compression: CompressionType,

    /// Block checksum function.
    pub checksum: ChecksumType,

    /// Table format version; selects footer layout and context-checksum
    /// folding (>= 6).
    pub format_version: u32,

    /// Uncompressed payload bytes per data block.
    pub block_size: usize,

    /// Keys between restart points inside a block.
    pub block_restart_interval: usize,

    /// Bloom bits per key; 0 disables filter blocks.
    pub bloom_bits_per_key: usize,

    /// Also add whole keys to a prefix bloom filter.
    pub whole_key_filtering: bool,

    /// Suppress automatic compaction scheduling.
    pub disable_auto_compactions: bool,
}

impl Default for ColumnFamilyOptions {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator),
            merge_operator: None,
            prefix_extractor: None,
            compaction_filter: None,
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 2,
            level0_file_num_compaction_trigger: 4,
            level0_slowdown_writes_trigger: 20,
            level0_stop_writes_trigger: 36,
            num_levels: 7,
            max_bytes_for_level_base: 256 * 1024 * 1024,
            max_bytes_for_level_multiplier: 10.0,
            target_file_size_base: 64 * 1024 * 1024,
            compaction_style: CompactionStyle::Level,
            max_table_files_size: 1024 * 1024 * 1024,
            ttl_seconds: 0,
            compression: CompressionType::None,
            checksum: ChecksumType::Crc32c,
            format_version: 5,
            block_size: 4096,
            block_restart_interval: 16,
            bloom_bits_per_key: 10,
            whole_key_filtering: true,
            disable_auto_compactions: false,
        }
    }
}

impl ColumnFamilyOptions {
    /// Target byte size for level `level` (1-based levels).
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let mut bytes = self.max_bytes_for_level_base as f64;
        for _ in 1..level {
            bytes *= self.max_bytes_for_level_multiplier;
        }
        bytes as u64
    }

    /// Target output file size at `level`.
    pub fn target_file_size(&self, level: usize) -> u64 {
        let mut size = self.target_file_size_base;
        for _ in 1..level {
            size = size.saturating_mul(2);
        }
        size.max(1)
    }
}

/// Options for one read.
#[derive(Clone, Default)]
pub struct ReadOptions {
    /// Read at this snapshot sequence; `None` reads the latest state.
    pub snapshot: Option<SequenceNumber>,

    /// Verify block checksums on this read path.
    pub verify_checksums: bool,

    /// Insert blocks read from disk into the block cache.
    pub fill_cache: bool,

    /// Iterators stop before this key (exclusive).
    pub iterate_upper_bound: Option<Vec<u8>>,

    /// Iterators start at or after this key (inclusive).
    pub iterate_lower_bound: Option<Vec<u8>>,

    /// Iterators stop when the key prefix departs from the seek target's
    /// prefix. Requires a prefix extractor.
    pub prefix_same_as_start: bool,
}

impl ReadOptions {
    /// Reads that populate the cache and verify checksums.
    pub fn checked() -> Self {
        Self {
            verify_checksums: true,
            fill_cache: true,
            ..Default::default()
        }
    }
}

/// Options for one write.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Fsync the WAL before acknowledging.
    pub sync: bool,

    /// Skip the WAL entirely; the write may vanish on crash but recovered
    /// state stays internally consistent.
    pub disable_wal: bool,

    /// Return `Busy` instead of blocking on a write stall.
    pub no_slowdown: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            sync: false,
            disable_wal: false,
            no_slowdown: false,
        }
    }
}
