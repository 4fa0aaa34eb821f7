use crate::crypto::{NodeId, TxHash};
use crate::error::PoolError;
use crate::pool::{ImportResult, TxPool};
use crate::transaction::Transaction;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{trace, warn};

/// Per-shard import tally.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchImport {
    pub imported: usize,
    pub already_known: usize,
    pub rejected: usize,
    /// Refused with a per-transaction pool error.
    pub errored: usize,
    /// Hashes that reached the pool (imported or already known), in batch order.
    pub known_hashes: Vec<TxHash>,
    pub import_elapsed: Duration,
    pub mark_elapsed: Duration,
}

/// A fatal pool error that stopped a batch part-way.
#[derive(Debug, Error)]
#[error("import aborted after {} admitted transactions: {source}", .partial.imported)]
pub struct ImportAborted {
    #[source]
    pub source: PoolError,
    /// What the batch had done before the failure, unmarked.
    pub partial: BatchImport,
}

/// Offers `txs` to the pool in order, then records every hash that reached
/// the pool as known by `origin` and by each peer the shard was forwarded to.
///
/// Only a fatal pool error stops the batch; in that case nothing is marked.
pub fn import_batch(
    txs: &[Arc<Transaction>],
    origin: &NodeId,
    forwarded_to: &[NodeId],
    pool: &dyn TxPool,
) -> Result<BatchImport, ImportAborted> {
    let started = Instant::now();
    let mut batch = BatchImport {
        known_hashes: Vec::with_capacity(txs.len()),
        ..BatchImport::default()
    };

    for tx in txs {
        match pool.import(Arc::clone(tx)) {
            Ok(ImportResult::Success) => batch.imported += 1,
            Ok(ImportResult::AlreadyKnown) => {
                batch.already_known += 1;
                trace!(peer = %origin, tx = %tx.hash(), "duplicate transaction from peer");
            }
            Ok(ImportResult::Rejected(reason)) => {
                batch.rejected += 1;
                trace!(peer = %origin, tx = %tx.hash(), ?reason, "pool rejected peer transaction");
                continue;
            }
            Err(source) if source.is_fatal() => {
                batch.import_elapsed = started.elapsed();
                return Err(ImportAborted { source, partial: batch });
            }
            Err(e) => {
                batch.errored += 1;
                warn!(peer = %origin, error = %e, raw = %hex::encode(tx.encoded()), "invalid transaction received");
                continue;
            }
        }
        batch.known_hashes.push(tx.hash());
    }
    batch.import_elapsed = started.elapsed();

    let started = Instant::now();
    if !batch.known_hashes.is_empty() {
        pool.mark_known_by(&batch.known_hashes, origin);
        for peer in forwarded_to {
            pool.mark_known_by(&batch.known_hashes, peer);
        }
    }
    batch.mark_elapsed = started.elapsed();

    Ok(batch)
}
