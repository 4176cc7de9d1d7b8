//! Arrival-ordered transaction pool.
//!
//! Holds verified transactions until the producer drains them into a block.
//! Entries are keyed by transaction hash for O(1) duplicate detection and
//! ordered by the time this node first saw them, oldest first.
//!
//! ## Design
//!
//! - `DashMap` holds the entries. Duplicate checks on the gossip path only
//!   touch this map.
//! - `parking_lot::RwLock<PoolIndex>` holds the arrival order. Every mutation
//!   takes this lock first and the map second; readers that need both take
//!   them in the same order.
//! - When the pool is full, the oldest entry is evicted to make room for the
//!   incoming transaction.

use std::collections::BTreeMap;
use std::fmt;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::DEFAULT_POOL_CAPACITY;
use crate::crypto::Hash;
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// OrderKey
// ---------------------------------------------------------------------------

/// `(first_seen, seq)`: arrival time with insertion sequence as tie-break,
/// so transactions stamped in the same nanosecond keep submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    first_seen: i64,
    seq: u64,
}

#[derive(Default)]
struct PoolIndex {
    order: BTreeMap<OrderKey, Hash>,
    next_seq: u64,
}

// ---------------------------------------------------------------------------
// PoolError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool was built with zero capacity and accepts nothing.
    Disabled,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "transaction pool has zero capacity"),
        }
    }
}

impl std::error::Error for PoolError {}

// ---------------------------------------------------------------------------
// TxPool
// ---------------------------------------------------------------------------

pub struct TxPool {
    entries: DashMap<Hash, (OrderKey, Transaction)>,
    index: RwLock<PoolIndex>,
    max_size: usize,
}

impl fmt::Debug for TxPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxPool")
            .field("size", &self.entries.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}

impl TxPool {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            index: RwLock::new(PoolIndex::default()),
            max_size,
        }
    }

    /// Insert `tx` keyed by its hash.
    ///
    /// Returns `Ok(false)` without touching the pool if the hash is already
    /// present. At capacity the oldest entry is evicted first.
    pub fn add(&self, tx: Transaction) -> Result<bool, PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::Disabled);
        }
        let hash = tx.hash();
        let mut index = self.index.write();

        if self.entries.contains_key(&hash) {
            return Ok(false);
        }

        while self.entries.len() >= self.max_size {
            let Some((_, oldest)) = index.order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            debug!(evicted = %oldest, "pool full, evicted oldest transaction");
        }

        let key = OrderKey {
            first_seen: tx.first_seen(),
            seq: index.next_seq,
        };
        index.next_seq += 1;

        match self.entries.entry(hash) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert((key, tx));
                index.order.insert(key, hash);
                Ok(true)
            }
        }
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<Transaction> {
        self.entries.get(hash).map(|e| e.value().1.clone())
    }

    /// Snapshot of every pending transaction, oldest first.
    pub fn pending(&self) -> Vec<Transaction> {
        let index = self.index.read();
        index
            .order
            .values()
            .filter_map(|hash| self.entries.get(hash).map(|e| e.value().1.clone()))
            .collect()
    }

    pub fn clear_pending(&self) {
        let mut index = self.index.write();
        index.order.clear();
        self.entries.clear();
    }

    /// Remove and return every pending transaction, oldest first.
    pub fn drain_pending(&self) -> Vec<Transaction> {
        let mut index = self.index.write();
        let order = std::mem::take(&mut index.order);
        order
            .into_values()
            .filter_map(|hash| self.entries.remove(&hash).map(|(_, (_, tx))| tx))
            .collect()
    }

    /// Put previously drained transactions back, keeping their original
    /// `first_seen` so they regain their place in line.
    pub fn restore(&self, txs: Vec<Transaction>) {
        for tx in txs {
            // Capacity is never zero here: these came out of this pool.
            let _ = self.add(tx);
        }
    }

    /// Drop the given transactions if present, e.g. once they are committed
    /// in a block. Returns how many were removed.
    pub fn remove_many<I>(&self, hashes: I) -> usize
    where
        I: IntoIterator<Item = Hash>,
    {
        let mut index = self.index.write();
        let mut removed = 0;
        for hash in hashes {
            if let Some((_, (key, _))) = self.entries.remove(&hash) {
                index.order.remove(&key);
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl Default for TxPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
