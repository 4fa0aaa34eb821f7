//! Parallel sender recovery ahead of pool import.
//!
//! Each worker touches only the transactions rayon hands it and writes only
//! their own sender cells, so no ordering is implied here; the importer walks
//! the batch in encoded order afterwards.

use crate::pool::TxPool;
use crate::transaction::Transaction;
use rayon::prelude::*;
use std::ops::Add;
use std::sync::Arc;

/// Default lower bound on transactions per rayon work item.
pub const DEFAULT_VERIFY_CHUNK: usize = 32;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VerifyStats {
    pub recovered: usize,
    pub invalid: usize,
    /// Already pooled, recovery skipped.
    pub skipped_known: usize,
}

impl Add for VerifyStats {
    type Output = VerifyStats;

    fn add(self, other: VerifyStats) -> VerifyStats {
        VerifyStats {
            recovered: self.recovered + other.recovered,
            invalid: self.invalid + other.invalid,
            skipped_known: self.skipped_known + other.skipped_known,
        }
    }
}

/// Recovers and caches the sender of every transaction the pool does not hold yet.
pub fn recover_senders(txs: &[Arc<Transaction>], pool: &dyn TxPool, min_chunk: usize) -> VerifyStats {
    txs.par_iter()
        .with_min_len(min_chunk.max(1))
        .map(|tx| {
            if pool.exists(&tx.hash()) {
                return VerifyStats { skipped_known: 1, ..VerifyStats::default() };
            }
            match tx.sender() {
                Ok(_) => VerifyStats { recovered: 1, ..VerifyStats::default() },
                Err(_) => VerifyStats { invalid: 1, ..VerifyStats::default() },
            }
        })
        .reduce(VerifyStats::default, |a, b| a + b)
}
