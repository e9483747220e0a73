//! Pessimistic transactions — lock first, then write.
//!
//! Every mutation takes an exclusive point lock through the shared
//! [`LockManager`] before it buffers; `get_for_update` takes a shared or
//! exclusive lock. Conflicting transactions wait in FIFO order with a
//! timeout, and a wait that would close a cycle fails immediately with
//! `Deadlock`. Commit applies the batch as one atomic write and
//! releases every lock; rollback releases without writing.
//!
//! Transactions may carry an expiration: operations after the deadline
//! return `TransactionExpired`. Save points snapshot the batch head;
//! rolling back to one keeps the locks (they are released only at
//! commit/rollback), and preserves the batch's single-delete semantics.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Instant;

use tracing::trace;

use crate::batch::WriteBatch;
use crate::engine::Db;
use crate::error::{Result, Status};
use crate::options::{ReadOptions, WriteOptions};
use crate::types::{ColumnFamilyId, DEFAULT_COLUMN_FAMILY_ID};

use super::lock_manager::{LockManager, TxnId};
use super::{TransactionOptions, TransactionState, batch_overlay, resolve_overlay};

/// Factory for pessimistic transactions sharing one lock table.
pub struct PessimisticTransactionDb {
    db: Db,
    locks: Arc<LockManager>,
    next_txn_id: AtomicU64,
}

impl PessimisticTransactionDb {
    /// Wrap a database with a fresh lock table.
    pub fn new(db: Db) -> Self {
        Self {
            db,
            locks: Arc::new(LockManager::new()),
            next_txn_id: AtomicU64::new(1),
        }
    }

    /// The wrapped database.
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Start a transaction.
    pub fn begin(&self, options: TransactionOptions) -> PessimisticTransaction {
        let id = self.next_txn_id.fetch_add(1, AtomicOrdering::Relaxed);
        PessimisticTransaction {
            id,
            db: self.db.clone(),
            locks: Arc::clone(&self.locks),
            options,
            started: Instant::now(),
            batch: WriteBatch::new(),
            held: HashSet::new(),
            state: TransactionState::Started,
        }
    }
}

/// One pessimistic transaction.
pub struct PessimisticTransaction {
    id: TxnId,
    db: Db,
    locks: Arc<LockManager>,
    options: TransactionOptions,
    started: Instant,
    batch: WriteBatch,
    /// Keys this transaction holds locks on.
    held: HashSet<(ColumnFamilyId, Vec<u8>)>,
    state: TransactionState,
}

impl PessimisticTransaction {
    fn check_usable(&self) -> Result<()> {
        match self.state {
            TransactionState::Started => {}
            _ => return Err(Status::TransactionClosed),
        }
        if let Some(expiration) = self.options.expiration
            && self.started.elapsed() >= expiration
        {
            return Err(Status::TransactionExpired);
        }
        Ok(())
    }

    fn acquire(&mut self, key: &[u8], exclusive: bool) -> Result<()> {
        let entry = (DEFAULT_COLUMN_FAMILY_ID, key.to_vec());
        self.locks
            .lock(self.id, key, exclusive, self.options.lock_timeout)?;
        self.held.insert(entry);
        Ok(())
    }

    /// Lock `key` exclusively and buffer a put.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_usable()?;
        self.acquire(key, true)?;
        self.batch.put(key, value);
        Ok(())
    }

    /// Lock `key` exclusively and buffer a delete.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_usable()?;
        self.acquire(key, true)?;
        self.batch.delete(key);
        Ok(())
    }

    /// Lock `key` exclusively and buffer a single-delete.
    pub fn single_delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_usable()?;
        self.acquire(key, true)?;
        self.batch.single_delete(key);
        Ok(())
    }

    /// Lock `key` exclusively and buffer a merge operand.
    pub fn merge(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_usable()?;
        self.acquire(key, true)?;
        self.batch.merge(key, value);
        Ok(())
    }

    /// Read through the transaction without locking.
    pub fn get(&self, ro: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.state {
            TransactionState::Started => {}
            _ => return Err(Status::TransactionClosed),
        }
        let overlay = batch_overlay(&self.batch, DEFAULT_COLUMN_FAMILY_ID, key)?;
        let below = self.db.get(ro, key)?;
        let operator = self.db.cf_merge_operator(DEFAULT_COLUMN_FAMILY_ID)?;
        resolve_overlay(overlay, below, key, operator.as_ref())
    }

    /// Lock `key` (shared or exclusive) and read it.
    pub fn get_for_update(
        &mut self,
        ro: &ReadOptions,
        key: &[u8],
        exclusive: bool,
    ) -> Result<Option<Vec<u8>>> {
        self.check_usable()?;
        self.acquire(key, exclusive)?;
        self.get(ro, key)
    }

    /// Snapshot the batch head.
    pub fn set_save_point(&mut self) {
        self.batch.set_save_point();
    }

    /// Truncate the batch back to the latest save point. Locks taken
    /// since stay held until commit or rollback.
    pub fn rollback_to_save_point(&mut self) -> Result<()> {
        self.batch.rollback_to_save_point()
    }

    /// Apply the batch atomically and release every lock.
    pub fn commit(mut self, wo: &WriteOptions) -> Result<()> {
        self.check_usable()?;
        let batch = std::mem::take(&mut self.batch);
        let result = self.db.write(wo, batch);
        self.release_locks();
        self.state = match result {
            Ok(()) => TransactionState::Committed,
            Err(_) => TransactionState::RolledBack,
        };
        result
    }

    /// Discard the batch and release every lock.
    pub fn rollback(mut self) -> Result<()> {
        match self.state {
            TransactionState::Started => {}
            _ => return Err(Status::TransactionClosed),
        }
        self.batch.clear();
        self.release_locks();
        self.state = TransactionState::RolledBack;
        Ok(())
    }

    fn release_locks(&mut self) {
        let held = std::mem::take(&mut self.held);
        let keys: Vec<Vec<u8>> = held.into_iter().map(|(_, key)| key).collect();
        self.locks
            .unlock_all(self.id, keys.iter().map(|k| k.as_slice()));
        trace!(txn = self.id, released = keys.len(), "locks released");
    }
}

impl Drop for PessimisticTransaction {
    fn drop(&mut self) {
        // A transaction dropped mid-flight must not strand its locks.
        if self.state == TransactionState::Started {
            self.release_locks();
        }
    }
}
