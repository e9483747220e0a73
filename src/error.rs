//! Engine-wide error type.
//!
//! Every fallible operation in the crate returns [`Result<T>`] with the
//! [`Status`] error enum. Subsystems do not define their own error types;
//! the database surfaces one status vocabulary to callers, and internal
//! layers attach context through the message payloads.
//!
//! `Status` is `Clone` so a failed background job can be latched into the
//! database state and re-surfaced to every subsequent writer until the
//! database is reopened.

use std::io;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Status>;

/// All error conditions surfaced by the engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Status {
    /// Key absent or covered by a tombstone.
    #[error("not found")]
    NotFound,

    /// Checksum mismatch, truncated record in strict mode, unparseable
    /// MANIFEST/SST, or comparator-name mismatch.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Malformed options or arguments (empty key where disallowed, etc).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Filesystem error, propagated with its cause.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Write stopped by stall triggers while `no_slowdown` was requested.
    #[error("busy: {0}")]
    Busy(String),

    /// Merge operation issued with no merge operator configured.
    #[error("merge operator not set")]
    MergeOperatorNotSet,

    /// Write attempted on a read-only instance.
    #[error("read-only: {0}")]
    ReadOnly(String),

    /// Named column family does not exist.
    #[error("column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Column family with this name already exists.
    #[error("column family already exists: {0}")]
    ColumnFamilyExists(String),

    /// The default column family cannot be dropped.
    #[error("cannot drop the default column family")]
    CannotDropDefaultCf,

    /// Pessimistic lock acquisition timed out.
    #[error("lock timeout")]
    LockTimeout,

    /// Lock acquisition would complete a wait-for cycle.
    #[error("deadlock")]
    Deadlock,

    /// Optimistic validation found a newer version of a read key.
    #[error("transaction conflict")]
    TransactionConflict,

    /// Operation on a committed or rolled-back transaction.
    #[error("transaction closed")]
    TransactionClosed,

    /// Write attempted on a read-only transaction.
    #[error("transaction is read-only")]
    TransactionReadOnly,

    /// Operation on an expired transaction.
    #[error("transaction expired")]
    TransactionExpired,

    /// Sticky error from a failed flush or compaction; fails subsequent
    /// writes until the database is reopened.
    #[error("background error: {0}")]
    Background(String),

    /// The database is shutting down.
    #[error("shutting down")]
    ShuttingDown,
}

impl Status {
    /// Build a [`Status::Corruption`] from anything printable.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Status::Corruption(msg.into())
    }

    /// Build a [`Status::InvalidArgument`] from anything printable.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Status::InvalidArgument(msg.into())
    }

    /// True if this status is `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Status::NotFound)
    }

    /// True if this status is a corruption report.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Status::Corruption(_))
    }
}

// `io::Error` is not `Clone`; reconstruct it from kind + rendered message
// so latched background errors stay faithful.
impl Clone for Status {
    fn clone(&self) -> Self {
        match self {
            Status::NotFound => Status::NotFound,
            Status::Corruption(m) => Status::Corruption(m.clone()),
            Status::InvalidArgument(m) => Status::InvalidArgument(m.clone()),
            Status::Io(e) => Status::Io(io::Error::new(e.kind(), e.to_string())),
            Status::Busy(m) => Status::Busy(m.clone()),
            Status::MergeOperatorNotSet => Status::MergeOperatorNotSet,
            Status::ReadOnly(m) => Status::ReadOnly(m.clone()),
            Status::ColumnFamilyNotFound(m) => Status::ColumnFamilyNotFound(m.clone()),
            Status::ColumnFamilyExists(m) => Status::ColumnFamilyExists(m.clone()),
            Status::CannotDropDefaultCf => Status::CannotDropDefaultCf,
            Status::LockTimeout => Status::LockTimeout,
            Status::Deadlock => Status::Deadlock,
            Status::TransactionConflict => Status::TransactionConflict,
            Status::TransactionClosed => Status::TransactionClosed,
            Status::TransactionReadOnly => Status::TransactionReadOnly,
            Status::TransactionExpired => Status::TransactionExpired,
            Status::Background(m) => Status::Background(m.clone()),
            Status::ShuttingDown => Status::ShuttingDown,
        }
    }
}
