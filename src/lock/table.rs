//! Sharded lock table
//!
//! Each shard owns a map from row key to that row's lock state, guarded by its
//! own mutex. A row's row-lock holder, column holders and waiters all live in
//! the same entry so compatibility checks are atomic per row.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::key::{ColumnId, LockScope, RowLockKey};
use super::TxnId;

/// A request parked behind a conflicting holder
#[derive(Debug, Clone)]
pub(crate) struct Waiter {
    pub txn: TxnId,
    pub scope: LockScope,
    pub since: Instant,
    pub deadline: Instant,
}

/// Lock state of one row
#[derive(Debug, Default)]
pub(crate) struct RowLockState {
    row_holder: Option<TxnId>,
    column_holders: HashMap<ColumnId, TxnId>,
    waiters: VecDeque<Waiter>,
}

impl RowLockState {
    pub fn row_holder(&self) -> Option<TxnId> {
        self.row_holder
    }

    pub fn column_holder(&self, column: ColumnId) -> Option<TxnId> {
        self.column_holders.get(&column).copied()
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Whether `txn` already holds a lock covering `scope`
    pub fn holds(&self, txn: TxnId, scope: LockScope) -> bool {
        if self.row_holder == Some(txn) {
            return true;
        }
        match scope {
            LockScope::Row => false,
            LockScope::Column(c) => self.column_holder(c) == Some(txn),
        }
    }

    /// Another transaction holding a lock incompatible with `scope`
    pub fn conflicting_holder(&self, txn: TxnId, scope: LockScope) -> Option<TxnId> {
        if let Some(holder) = self.row_holder {
            // A row lock covers every column of the row for its holder
            return if holder == txn { None } else { Some(holder) };
        }
        match scope {
            LockScope::Row => self
                .column_holders
                .values()
                .copied()
                .find(|&holder| holder != txn),
            LockScope::Column(c) => self.column_holder(c).filter(|&holder| holder != txn),
        }
    }

    /// An earlier-queued waiter of another transaction whose request conflicts
    /// with `scope`; newcomers may not overtake it
    ///
    /// Waiters stuck behind a lock `txn` already holds cannot be granted before
    /// `txn` finishes, so they never hold back `txn`'s own upgrades.
    pub fn conflicting_waiter_ahead(&self, txn: TxnId, scope: LockScope) -> Option<TxnId> {
        for waiter in &self.waiters {
            if waiter.txn == txn && waiter.scope == scope {
                return None;
            }
            if waiter.txn != txn
                && waiter.scope.conflicts_with(scope)
                && !self.is_blocked_by(waiter, txn)
            {
                return Some(waiter.txn);
            }
        }
        None
    }

    /// Whether a lock held by `txn` conflicts with `waiter`'s request
    fn is_blocked_by(&self, waiter: &Waiter, txn: TxnId) -> bool {
        if self.row_holder == Some(txn) {
            return true;
        }
        match waiter.scope {
            LockScope::Row => self.column_holders.values().any(|&holder| holder == txn),
            LockScope::Column(c) => self.column_holder(c) == Some(txn),
        }
    }

    pub fn grant(&mut self, txn: TxnId, scope: LockScope) {
        self.remove_waiter(txn, scope);
        match scope {
            LockScope::Row => self.row_holder = Some(txn),
            LockScope::Column(c) => {
                if self.row_holder != Some(txn) {
                    self.column_holders.insert(c, txn);
                }
            }
        }
    }

    /// Queue a waiter; returns the time it started waiting
    pub fn enqueue(&mut self, txn: TxnId, scope: LockScope, now: Instant, deadline: Instant) -> Instant {
        if let Some(existing) = self
            .waiters
            .iter_mut()
            .find(|w| w.txn == txn && w.scope == scope)
        {
            existing.deadline = deadline;
            return existing.since;
        }
        self.waiters.push_back(Waiter {
            txn,
            scope,
            since: now,
            deadline,
        });
        now
    }

    pub fn remove_waiter(&mut self, txn: TxnId, scope: LockScope) -> Option<Waiter> {
        let pos = self
            .waiters
            .iter()
            .position(|w| w.txn == txn && w.scope == scope)?;
        self.waiters.remove(pos)
    }

    /// Drop waiters of other transactions whose deadline has passed. They will
    /// observe the timeout on their next attempt.
    pub fn prune_expired(&mut self, now: Instant, keep: TxnId) -> usize {
        let before = self.waiters.len();
        self.waiters.retain(|w| w.txn == keep || w.deadline > now);
        before - self.waiters.len()
    }

    /// Release every lock and wait of `txn` on this row; returns the number of
    /// locks released
    pub fn release(&mut self, txn: TxnId) -> usize {
        let mut released = 0;
        if self.row_holder == Some(txn) {
            self.row_holder = None;
            released += 1;
        }
        let before = self.column_holders.len();
        self.column_holders.retain(|_, holder| *holder != txn);
        released += before - self.column_holders.len();
        self.waiters.retain(|w| w.txn != txn);
        released
    }

    pub fn is_empty(&self) -> bool {
        self.row_holder.is_none() && self.column_holders.is_empty() && self.waiters.is_empty()
    }
}

/// One shard of the lock table
pub(crate) struct Shard {
    pub entries: Mutex<HashMap<RowLockKey, RowLockState>>,
    /// Signalled whenever locks in this shard are released
    pub released: Notify,
}

/// Lock table split into independently locked shards
pub(crate) struct LockTable {
    shards: Vec<Shard>,
}

impl LockTable {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let shards = (0..shard_count)
            .map(|_| Shard {
                entries: Mutex::new(HashMap::new()),
                released: Notify::new(),
            })
            .collect();
        Self { shards }
    }

    pub fn shard(&self, key: &RowLockKey) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    pub fn entry_count(&self) -> usize {
        self.shards.iter().map(|s| s.entries.lock().len()).sum()
    }
}
