// Shared fixtures for the sync pipeline tests
#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use txsync::{
    codec,
    crypto::{self, NodeId, TxHash},
    error::PoolError,
    metrics::StatisticsCollector,
    peers::{PeerMessenger, PeerRoster, TxsMessage},
    pool::{ImportResult, MemoryPool, TxPool},
    transaction::{Transaction, TxBody},
};

/// Deterministic, ordered node ids: `node(1) < node(2) < ...`.
pub fn node(n: u8) -> NodeId {
    let mut bytes = [0u8; 32];
    bytes[0] = n;
    NodeId(bytes)
}

pub fn nodes(range: std::ops::RangeInclusive<u8>) -> BTreeSet<NodeId> {
    range.map(node).collect()
}

/// Signs `count` transactions with one fresh key, nonces starting at `first_nonce`.
pub fn signed_txs(first_nonce: u64, count: usize) -> Vec<Arc<Transaction>> {
    let (pk, sk) = crypto::dilithium3_keypair();
    (first_nonce..first_nonce + count as u64)
        .map(|nonce| {
            let body = TxBody::signed(nonce, [7u8; 32], 10 + nonce, b"sync".to_vec(), &pk, &sk);
            Arc::new(Transaction::from_body(body).expect("encode tx"))
        })
        .collect()
}

/// A well-formed encoding whose signature does not verify.
pub fn forged_tx(nonce: u64) -> Arc<Transaction> {
    let (pk, sk) = crypto::dilithium3_keypair();
    let mut body = TxBody::signed(nonce, [9u8; 32], 1, Vec::new(), &pk, &sk);
    body.value += 1_000;
    Arc::new(Transaction::from_body(body).expect("encode tx"))
}

pub fn nested_payload(txs: &[Arc<Transaction>], consensus_index: i64) -> Vec<u8> {
    codec::encode_batch(txs, codec::NESTED_BATCH_PROTOCOL_VERSION, consensus_index).expect("encode batch")
}

pub fn hashes(txs: &[Arc<Transaction>]) -> Vec<TxHash> {
    txs.iter().map(|tx| tx.hash()).collect()
}

pub struct StaticRoster(pub BTreeSet<NodeId>);

impl PeerRoster for StaticRoster {
    fn current_peers(&self) -> BTreeSet<NodeId> {
        self.0.clone()
    }
}

/// Records every send instead of delivering it.
#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<(NodeId, Arc<TxsMessage>)>>,
}

impl RecordingMessenger {
    pub fn targets(&self) -> Vec<NodeId> {
        self.sent.lock().iter().map(|(peer, _)| *peer).collect()
    }
}

impl PeerMessenger for RecordingMessenger {
    fn send_to_peer(&self, peer: &NodeId, message: Arc<TxsMessage>) {
        self.sent.lock().push((*peer, message));
    }
}

#[derive(Default)]
pub struct CountingStats {
    pub received_bytes: AtomicUsize,
    pub received_count: AtomicUsize,
    pub sent_bytes: AtomicUsize,
}

impl StatisticsCollector for CountingStats {
    fn record_received_bytes(&self, bytes: usize) {
        self.received_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_received_count(&self, txs: usize) {
        self.received_count.fetch_add(txs, Ordering::Relaxed);
    }

    fn record_sent_bytes(&self, bytes: usize) {
        self.sent_bytes.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Wraps a `MemoryPool`, logging import order and failing on demand.
pub struct ScriptedPool {
    pub inner: MemoryPool,
    pub imports: Mutex<Vec<TxHash>>,
    pub exists_calls: AtomicUsize,
    /// Fail with a storage error on this import attempt (0-based).
    pub fail_storage_at: Mutex<Option<usize>>,
    /// Refuse these hashes with a per-transaction error.
    pub refuse: Mutex<Vec<TxHash>>,
}

impl ScriptedPool {
    pub fn new() -> Self {
        Self {
            inner: MemoryPool::default(),
            imports: Mutex::new(Vec::new()),
            exists_calls: AtomicUsize::new(0),
            fail_storage_at: Mutex::new(None),
            refuse: Mutex::new(Vec::new()),
        }
    }
}

impl TxPool for ScriptedPool {
    fn exists(&self, hash: &TxHash) -> bool {
        self.exists_calls.fetch_add(1, Ordering::Relaxed);
        self.inner.exists(hash)
    }

    fn import(&self, tx: Arc<Transaction>) -> Result<ImportResult, PoolError> {
        let attempt = {
            let mut imports = self.imports.lock();
            imports.push(tx.hash());
            imports.len() - 1
        };
        if self.fail_storage_at.lock().take_if_eq(attempt) {
            return Err(PoolError::Storage("disk unavailable".into()));
        }
        if self.refuse.lock().contains(&tx.hash()) {
            return Err(PoolError::InvalidTransaction("refused by test".into()));
        }
        self.inner.import(tx)
    }

    fn mark_known_by(&self, hashes: &[TxHash], peer: &NodeId) {
        self.inner.mark_known_by(hashes, peer)
    }
}

trait TakeIfEq {
    fn take_if_eq(&mut self, value: usize) -> bool;
}

impl TakeIfEq for Option<usize> {
    fn take_if_eq(&mut self, value: usize) -> bool {
        if *self == Some(value) {
            *self = None;
            true
        } else {
            false
        }
    }
}
