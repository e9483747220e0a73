//! Optimistic transactions — validate at commit, never block.
//!
//! Writes buffer in a batch; reads record `(key, sequence-at-read)` in
//! the read set. Commit re-checks every read key: if its newest version
//! in the database now carries a higher sequence than the transaction
//! observed, another writer got there first and the commit fails with
//! `TransactionConflict`. Otherwise the batch applies as one atomic
//! write.

use std::collections::HashMap;

use tracing::debug;

use crate::batch::WriteBatch;
use crate::engine::Db;
use crate::error::{Result, Status};
use crate::options::{ReadOptions, WriteOptions};
use crate::types::{ColumnFamilyId, DEFAULT_COLUMN_FAMILY_ID, SequenceNumber};

use super::{TransactionState, batch_overlay, resolve_overlay};

/// Factory for optimistic transactions over one database.
pub struct OptimisticTransactionDb {
    db: Db,
}

impl OptimisticTransactionDb {
    /// Wrap a database.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// The wrapped database (plain reads and writes pass through).
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Start a transaction.
    pub fn begin(&self) -> OptimisticTransaction {
        OptimisticTransaction {
            db: self.db.clone(),
            batch: WriteBatch::new(),
            read_set: HashMap::new(),
            state: TransactionState::Started,
        }
    }
}

/// One optimistic transaction.
pub struct OptimisticTransaction {
    db: Db,
    batch: WriteBatch,
    /// `(cf, key)` → newest sequence observed when the key was read.
    read_set: HashMap<(ColumnFamilyId, Vec<u8>), SequenceNumber>,
    state: TransactionState,
}

impl OptimisticTransaction {
    fn check_open(&self) -> Result<()> {
        match self.state {
            TransactionState::Started => Ok(()),
            _ => Err(Status::TransactionClosed),
        }
    }

    /// Buffer a put.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        self.batch.put(key, value);
        Ok(())
    }

    /// Buffer a delete.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_open()?;
        self.batch.delete(key);
        Ok(())
    }

    /// Buffer a merge operand.
    pub fn merge(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        self.batch.merge(key, value);
        Ok(())
    }

    /// Read through the transaction (own writes shadow the database)
    /// without tracking the key for conflict detection.
    pub fn get(&self, ro: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        let overlay = batch_overlay(&self.batch, DEFAULT_COLUMN_FAMILY_ID, key)?;
        let below = self.db.get(ro, key)?;
        let operator = self.db.cf_merge_operator(DEFAULT_COLUMN_FAMILY_ID)?;
        resolve_overlay(overlay, below, key, operator.as_ref())
    }

    /// Read and track the key: commit fails if the key changes before
    /// then.
    pub fn get_for_update(&mut self, ro: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        let observed = self
            .db
            .latest_sequence_for_key(DEFAULT_COLUMN_FAMILY_ID, key)?
            .unwrap_or(0);
        self.read_set
            .insert((DEFAULT_COLUMN_FAMILY_ID, key.to_vec()), observed);
        self.get(ro, key)
    }

    /// Snapshot the batch head for partial rollback.
    pub fn set_save_point(&mut self) {
        self.batch.set_save_point();
    }

    /// Truncate the batch back to the latest save point.
    pub fn rollback_to_save_point(&mut self) -> Result<()> {
        self.batch.rollback_to_save_point()
    }

    /// Validate the read set and apply the batch atomically.
    pub fn commit(mut self, wo: &WriteOptions) -> Result<()> {
        self.check_open()?;

        for ((cf, key), observed) in &self.read_set {
            let latest = self.db.latest_sequence_for_key(*cf, key)?.unwrap_or(0);
            if latest > *observed {
                debug!(
                    observed,
                    latest, "optimistic validation failed; conflicting write detected"
                );
                self.state = TransactionState::RolledBack;
                return Err(Status::TransactionConflict);
            }
        }

        let batch = std::mem::take(&mut self.batch);
        self.db.write(wo, batch)?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Discard the buffered writes.
    pub fn rollback(mut self) -> Result<()> {
        self.check_open()?;
        self.batch.clear();
        self.state = TransactionState::RolledBack;
        Ok(())
    }
}
