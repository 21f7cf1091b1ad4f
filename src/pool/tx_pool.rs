//! Transaction Pool Module
//!
//! This module implements the pool of pending transactions. Transactions are
//! stored in arena slots; an index maps each id to its slot and every entry
//! carries an arrival sequence number so strategies can walk the pool in
//! arrival order.

use crate::types::{PendingTransaction, TxId};
use std::collections::HashMap;

struct Slot {
    /// Arrival sequence number, unique for the lifetime of the pool
    seq: u64,
    tx: PendingTransaction,
}

/// Pool for pending transactions
///
/// Not synchronised: the scheduler worker is its only owner.
#[derive(Default)]
pub struct TransactionPool {
    slots: Vec<Option<Slot>>,
    /// Indices of empty slots, reused before the arena grows
    free: Vec<usize>,
    index: HashMap<TxId, usize>,
    next_seq: u64,
}

impl TransactionPool {
    /// Creates a new empty transaction pool
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: &TxId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &TxId) -> Option<&PendingTransaction> {
        let slot = *self.index.get(id)?;
        self.slots[slot].as_ref().map(|s| &s.tx)
    }

    /// Add a transaction to the pool
    ///
    /// # Returns
    /// `false` (and the pool is unchanged) if a transaction with the same id is already pooled
    pub fn add(&mut self, tx: PendingTransaction) -> bool {
        if self.index.contains_key(&tx.id) {
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let id = tx.id;
        let entry = Some(Slot { seq, tx });

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = entry;
                slot
            }
            None => {
                self.slots.push(entry);
                self.slots.len() - 1
            }
        };
        self.index.insert(id, slot);
        true
    }

    /// Return transactions from a failed batch to the pool
    ///
    /// They re-enter at the back of the arrival order.
    ///
    /// # Returns
    /// Number of transactions actually re-inserted
    pub fn requeue(&mut self, txs: Vec<PendingTransaction>) -> usize {
        let mut added = 0;
        for tx in txs {
            if self.add(tx) {
                added += 1;
            }
        }
        added
    }

    /// Remove one transaction from the pool and hand ownership to the caller
    pub fn take(&mut self, id: &TxId) -> Option<PendingTransaction> {
        let slot = self.index.remove(id)?;
        let entry = self.slots[slot].take();
        self.free.push(slot);
        entry.map(|s| s.tx)
    }

    /// Remove a group of transactions, preserving the order of `ids`
    ///
    /// Ids that are not pooled are skipped.
    pub fn take_many(&mut self, ids: &[TxId]) -> Vec<PendingTransaction> {
        ids.iter().filter_map(|id| self.take(id)).collect()
    }

    /// All pooled transactions in arrival order
    pub fn pending(&self) -> Vec<&PendingTransaction> {
        let mut entries: Vec<&Slot> = self.slots.iter().flatten().collect();
        entries.sort_by_key(|s| s.seq);
        entries.into_iter().map(|s| &s.tx).collect()
    }
}
