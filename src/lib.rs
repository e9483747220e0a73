//! # QuarryDB
//!
//! An embeddable, persistent key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)** architecture, with on-disk
//! formats bit-compatible with the reference block-based table, WAL, and
//! MANIFEST layouts.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                          Db                                │
//! │  ┌────────────┐  ┌──────────────┐  ┌───────────────────┐   │
//! │  │  Active    │  │  Immutable   │  │  SSTs (L0..Lmax)  │   │
//! │  │  MemTable  │  │  MemTables   │  │  per column family│   │
//! │  │  + WAL     │  │              │  │                   │   │
//! │  └─────┬──────┘  └──────┬───────┘  └─────────┬─────────┘   │
//! │        │   switch       │   flush            │             │
//! │        └─────────►      └────────►           │             │
//! │                                              │             │
//! │  ┌───────────────────────────────────────────┘             │
//! │  │  Compaction (leveled / universal / FIFO)                │
//! │  └─────────────────────────────────────────────────────────│
//! │                                                            │
//! │  ┌────────────────────────────────────────────────────┐    │
//! │  │     VersionSet (MANIFEST log + CURRENT pointer)    │    │
//! │  └────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core database — open, read, write, snapshots, column families |
//! | [`batch`] | Atomic write batches with the reference wire format |
//! | [`memtable`] | Lock-free skip-list write buffer with range tombstones |
//! | [`wal`] | 32 KiB-block write-ahead log with recovery-safe fragmentation |
//! | [`sstable`] | Immutable block-based tables with bloom filters |
//! | [`manifest`] | Versioned metadata — VersionEdits, MANIFEST, CURRENT |
//! | [`compaction`] | Leveled, universal, and FIFO compaction |
//! | [`txn`] | Optimistic, pessimistic, and two-phase-commit transactions |
//! | [`cache`] | Sharded LRU block cache |
//!
//! ## Key Features
//!
//! - **Group-committed writes** — concurrent writers are merged into a
//!   single WAL record by a leader, preserving per-batch atomicity.
//! - **MVCC reads** — every write carries a monotonic sequence number;
//!   snapshots pin a sequence and see a consistent view.
//! - **Point and range tombstones** — delete semantics for single keys
//!   and `[start, end)` ranges.
//! - **Merge operators** — read-modify-write collapsed lazily at read
//!   and compaction time.
//! - **Crash recovery** — MANIFEST replay plus WAL replay reconstruct the
//!   exact durable state, reclaiming orphaned tables.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quarrydb::engine::Db;
//! use quarrydb::options::{Options, ReadOptions, WriteOptions};
//!
//! let mut options = Options::default();
//! options.create_if_missing = true;
//!
//! let db = Db::open("/tmp/my_db", options).unwrap();
//!
//! db.put(&WriteOptions::default(), b"hello", b"world").unwrap();
//! assert_eq!(
//!     db.get(&ReadOptions::default(), b"hello").unwrap(),
//!     Some(b"world".to_vec())
//! );
//!
//! db.delete(&WriteOptions::default(), b"hello").unwrap();
//! assert_eq!(db.get(&ReadOptions::default(), b"hello").unwrap(), None);
//!
//! db.close().unwrap();
//! ```

pub mod batch;
pub mod cache;
pub mod compaction;
pub mod comparator;
pub mod encoding;
pub mod engine;
pub mod env;
pub mod error;
pub mod iterator;
pub mod manifest;
pub mod memtable;
pub mod merge;
pub mod options;
pub mod prefix;
pub mod rate_limiter;
pub mod sstable;
pub mod txn;
pub mod types;
pub mod wal;

pub use error::{Result, Status};
