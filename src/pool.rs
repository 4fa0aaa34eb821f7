//! Pending-transaction pool contract and an in-memory implementation.
//!
//! The sync pipeline only needs three things from a pool: a membership test,
//! admission of a single transaction, and a bulk "these hashes are known by
//! that peer" update. [`MemoryPool`] provides them behind `parking_lot` locks
//! so producers, the drainer and broadcast logic can share it.

use crate::crypto::{NodeId, TxHash};
use crate::error::PoolError;
use crate::transaction::Transaction;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Default maximum number of pending transactions.
pub const DEFAULT_POOL_CAPACITY: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidSignature,
    PoolFull,
}

/// Outcome of offering one transaction to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportResult {
    Success,
    AlreadyKnown,
    Rejected(RejectReason),
}

pub trait TxPool: Send + Sync {
    fn exists(&self, hash: &TxHash) -> bool;

    /// `Err` is reserved for failures of the pool itself; a transaction the
    /// pool simply does not want is `Ok(ImportResult::Rejected(..))`.
    fn import(&self, tx: Arc<Transaction>) -> Result<ImportResult, PoolError>;

    /// Records that `peer` already holds every transaction in `hashes`.
    fn mark_known_by(&self, hashes: &[TxHash], peer: &NodeId);
}

#[derive(Default)]
struct Pending {
    by_hash: HashMap<TxHash, Arc<Transaction>>,
    /// Arrival order
    order: Vec<TxHash>,
}

pub struct MemoryPool {
    pending: RwLock<Pending>,
    known_by: RwLock<HashMap<NodeId, HashSet<TxHash>>>,
    capacity: usize,
}

impl MemoryPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: RwLock::new(Pending::default()),
            known_by: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.read().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.read().by_hash.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, hash: &TxHash) -> Option<Arc<Transaction>> {
        self.pending.read().by_hash.get(hash).cloned()
    }

    /// Pending transactions in arrival order.
    pub fn transactions(&self) -> Vec<Arc<Transaction>> {
        let pending = self.pending.read();
        pending
            .order
            .iter()
            .filter_map(|hash| pending.by_hash.get(hash).cloned())
            .collect()
    }

    pub fn is_known_by(&self, hash: &TxHash, peer: &NodeId) -> bool {
        self.known_by
            .read()
            .get(peer)
            .is_some_and(|known| known.contains(hash))
    }

    pub fn known_by_count(&self, peer: &NodeId) -> usize {
        self.known_by.read().get(peer).map_or(0, HashSet::len)
    }

    /// Peers not yet known to hold `hash`, for broadcast suppression.
    pub fn peers_missing<'a>(&self, hash: &TxHash, peers: impl IntoIterator<Item = &'a NodeId>) -> Vec<NodeId> {
        let known_by = self.known_by.read();
        peers
            .into_iter()
            .filter(|peer| !known_by.get(*peer).is_some_and(|known| known.contains(hash)))
            .copied()
            .collect()
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl TxPool for MemoryPool {
    fn exists(&self, hash: &TxHash) -> bool {
        self.pending.read().by_hash.contains_key(hash)
    }

    fn import(&self, tx: Arc<Transaction>) -> Result<ImportResult, PoolError> {
        let hash = tx.hash();
        if self.exists(&hash) {
            return Ok(ImportResult::AlreadyKnown);
        }
        // Cached when the verifier already ran for this transaction.
        if tx.sender().is_err() {
            return Ok(ImportResult::Rejected(RejectReason::InvalidSignature));
        }

        let mut pending = self.pending.write();
        if pending.by_hash.contains_key(&hash) {
            return Ok(ImportResult::AlreadyKnown);
        }
        if pending.by_hash.len() >= self.capacity {
            return Ok(ImportResult::Rejected(RejectReason::PoolFull));
        }
        pending.by_hash.insert(hash, tx);
        pending.order.push(hash);
        Ok(ImportResult::Success)
    }

    fn mark_known_by(&self, hashes: &[TxHash], peer: &NodeId) {
        if hashes.is_empty() {
            return;
        }
        self.known_by
            .write()
            .entry(*peer)
            .or_default()
            .extend(hashes.iter().copied());
    }
}
