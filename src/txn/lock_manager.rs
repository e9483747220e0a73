//! Point-lock manager for pessimistic transactions.
//!
//! Keys hash onto a fixed set of stripes; each stripe holds a map of
//! key → lock entry under its own mutex + condvar. A lock entry records
//! its holders (many shared, or one exclusive) and a FIFO wait queue:
//! a waiter may only acquire when it reaches the front, so lock grants
//! are fair.
//!
//! Deadlocks are detected on the wait-for graph: before blocking, the
//! waiter records edges to every current holder; a cycle reaching back
//! to the waiter fails the acquisition with `Deadlock` instead of
//! waiting. Timeouts surface as `LockTimeout`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{Result, Status};

/// Transaction identity inside the lock manager.
pub type TxnId = u64;

const NUM_STRIPES: usize = 16;

#[derive(Debug, Default)]
struct LockEntry {
    /// Current holders; more than one only in shared mode.
    holders: Vec<TxnId>,
    exclusive: bool,
    /// FIFO queue of `(txn, wants_exclusive)`.
    waiters: VecDeque<(TxnId, bool)>,
}

impl LockEntry {
    fn holds(&self, txn: TxnId) -> bool {
        self.holders.contains(&txn)
    }

    /// Whether `txn` could take the lock right now.
    fn grantable(&self, txn: TxnId, exclusive: bool) -> bool {
        if self.holders.is_empty() {
            return true;
        }
        if self.holds(txn) {
            if !exclusive || self.exclusive {
                return true;
            }
            // Shared → exclusive upgrade only as the sole holder.
            return self.holders.len() == 1;
        }
        !exclusive && !self.exclusive
    }
}

struct Stripe {
    locks: Mutex<HashMap<Vec<u8>, LockEntry>>,
    cv: Condvar,
}

/// Striped point-lock table with deadlock detection.
pub struct LockManager {
    stripes: Vec<Stripe>,
    /// Wait-for edges: waiter → holders it is blocked on.
    wait_for: Mutex<HashMap<TxnId, HashSet<TxnId>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    /// Empty lock table.
    pub fn new() -> Self {
        Self {
            stripes: (0..NUM_STRIPES)
                .map(|_| Stripe {
                    locks: Mutex::new(HashMap::new()),
                    cv: Condvar::new(),
                })
                .collect(),
            wait_for: Mutex::new(HashMap::new()),
        }
    }

    fn stripe(&self, key: &[u8]) -> &Stripe {
        let mut hash: usize = 0xcbf2_9ce4;
        for &b in key {
            hash = hash.wrapping_mul(0x0100_0193) ^ b as usize;
        }
        &self.stripes[hash % NUM_STRIPES]
    }

    /// Would blocking `waiter` on `holders` close a cycle?
    fn would_deadlock(&self, waiter: TxnId, holders: &[TxnId]) -> bool {
        let graph = self.wait_for.lock().expect("wait-for graph poisoned");
        // DFS from each holder through existing edges back to the
        // waiter.
        let mut stack: Vec<TxnId> = holders.to_vec();
        let mut seen: HashSet<TxnId> = HashSet::new();
        while let Some(txn) = stack.pop() {
            if txn == waiter {
                return true;
            }
            if !seen.insert(txn) {
                continue;
            }
            if let Some(next) = graph.get(&txn) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    fn add_wait_edges(&self, waiter: TxnId, holders: &[TxnId]) {
        let mut graph = self.wait_for.lock().expect("wait-for graph poisoned");
        graph
            .entry(waiter)
            .or_default()
            .extend(holders.iter().copied());
    }

    fn clear_wait_edges(&self, waiter: TxnId) {
        let mut graph = self.wait_for.lock().expect("wait-for graph poisoned");
        graph.remove(&waiter);
    }

    /// Acquire a point lock on `key` for `txn`.
    ///
    /// Blocks up to `timeout`; fails with `Deadlock` when waiting would
    /// close a wait-for cycle, or `LockTimeout` when the deadline
    /// passes.
    pub fn lock(
        &self,
        txn: TxnId,
        key: &[u8],
        exclusive: bool,
        timeout: Duration,
    ) -> Result<()> {
        let stripe = self.stripe(key);
        let deadline = Instant::now() + timeout;
        let mut locks = stripe.locks.lock().expect("lock stripe poisoned");
        let mut queued = false;

        loop {
            let entry = locks.entry(key.to_vec()).or_default();

            // FIFO: a newcomer may not jump ahead of queued waiters,
            // but an existing holder re-entering must never queue
            // behind itself.
            let at_front = entry
                .waiters
                .front()
                .is_none_or(|(front, _)| *front == txn);
            if entry.grantable(txn, exclusive) && (at_front || entry.holds(txn)) {
                if queued {
                    entry.waiters.retain(|(t, _)| *t != txn);
                    self.clear_wait_edges(txn);
                }
                if !entry.holds(txn) {
                    entry.holders.push(txn);
                }
                entry.exclusive = exclusive || (entry.exclusive && entry.holders.len() == 1);
                trace!(txn, exclusive, "lock acquired");
                return Ok(());
            }

            let holders: Vec<TxnId> =
                entry.holders.iter().copied().filter(|h| *h != txn).collect();
            if self.would_deadlock(txn, &holders) {
                if queued {
                    entry.waiters.retain(|(t, _)| *t != txn);
                }
                debug!(txn, "lock acquisition would deadlock");
                return Err(Status::Deadlock);
            }

            if !queued {
                entry.waiters.push_back((txn, exclusive));
                queued = true;
            }
            self.add_wait_edges(txn, &holders);

            let now = Instant::now();
            if now >= deadline {
                let entry = locks.entry(key.to_vec()).or_default();
                entry.waiters.retain(|(t, _)| *t != txn);
                self.clear_wait_edges(txn);
                debug!(txn, "lock acquisition timed out");
                return Err(Status::LockTimeout);
            }
            let (next, timed_out) = stripe
                .cv
                .wait_timeout(locks, deadline - now)
                .expect("lock stripe poisoned");
            locks = next;
            if timed_out.timed_out() {
                let entry = locks.entry(key.to_vec()).or_default();
                entry.waiters.retain(|(t, _)| *t != txn);
                self.clear_wait_edges(txn);
                debug!(txn, "lock acquisition timed out");
                return Err(Status::LockTimeout);
            }
            self.clear_wait_edges(txn);
        }
    }

    /// Release `txn`'s hold on `key`.
    pub fn unlock(&self, txn: TxnId, key: &[u8]) {
        let stripe = self.stripe(key);
        let mut locks = stripe.locks.lock().expect("lock stripe poisoned");
        if let Some(entry) = locks.get_mut(key) {
            entry.holders.retain(|h| *h != txn);
            if entry.holders.is_empty() {
                entry.exclusive = false;
                if entry.waiters.is_empty() {
                    locks.remove(key);
                }
            }
        }
        stripe.cv.notify_all();
    }

    /// Release every lock in `keys` for `txn`.
    pub fn unlock_all<'a>(&self, txn: TxnId, keys: impl IntoIterator<Item = &'a [u8]>) {
        for key in keys {
            self.unlock(txn, key);
        }
        self.clear_wait_edges(txn);
    }
}
