//! In-process network of sync nodes.
//!
//! Every node gets its own pool, queue, drainer and router, and a roster
//! holding every other node. Forwarded batches travel over one shared
//! channel; [`LocalNetwork::deliver_pending`] routes them into the target
//! node's queue. Everything runs on the caller's thread, so runs are
//! reproducible.
//!
//! ```text
//!   client ──► node A ──push──► queue A ──drain──► pool A
//!                 │ forward (tree children)
//!                 ▼
//!            [delivery channel] ──► node B, node C, ...
//! ```

use crate::codec::{self, SignatureCheck};
use crate::crypto::{self, NodeId};
use crate::error::{CodecError, SyncError, TxError};
use crate::metrics::StatisticsCollector;
use crate::peers::{ChannelMessenger, Delivery, MessageKind, PeerSet, TxsMessage};
use crate::pool::MemoryPool;
use crate::queue::{DownloadQueue, QueueDrainer};
use crate::router::TreeRouter;
use crate::transaction::{Transaction, TxBody};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

pub struct SimNode {
    pub id: NodeId,
    pub queue: DownloadQueue,
    pub drainer: QueueDrainer,
    pub pool: Arc<MemoryPool>,
    pub peers: Arc<PeerSet>,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub nodes: usize,
    pub branching: usize,
    pub protocol_version: u32,
    pub pool_capacity: usize,
    pub verify_chunk: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nodes: 4,
            branching: 2,
            protocol_version: codec::LATEST_PROTOCOL_VERSION,
            pool_capacity: crate::pool::DEFAULT_POOL_CAPACITY,
            verify_chunk: crate::verify::DEFAULT_VERIFY_CHUNK,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulationReport {
    pub rounds: usize,
    pub messages_routed: usize,
    pub imported: usize,
    /// Pool size per node, in node order.
    pub pool_sizes: Vec<usize>,
}

pub struct LocalNetwork {
    nodes: Vec<SimNode>,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    protocol_version: u32,
    messages_routed: usize,
}

impl LocalNetwork {
    pub fn new(cfg: &SimConfig) -> Self {
        Self::build(cfg, None)
    }

    /// Same as [`LocalNetwork::new`], with every node reporting to `stats`.
    pub fn with_statistics(cfg: &SimConfig, stats: Arc<dyn StatisticsCollector>) -> Self {
        Self::build(cfg, Some(stats))
    }

    fn build(cfg: &SimConfig, stats: Option<Arc<dyn StatisticsCollector>>) -> Self {
        let ids: Vec<NodeId> = (0..cfg.nodes).map(|_| NodeId::random()).collect();
        let (outbound, deliveries) = mpsc::unbounded_channel();

        let nodes = ids
            .iter()
            .map(|id| {
                let peers = Arc::new(PeerSet::with_peers(ids.iter().copied().filter(|p| p != id)));
                let pool = Arc::new(MemoryPool::new(cfg.pool_capacity));
                let messenger = Arc::new(ChannelMessenger::with_sender(*id, outbound.clone()));
                let mut builder = DownloadQueue::builder(peers.clone(), messenger)
                    .router(TreeRouter::new(*id, cfg.branching))
                    .protocol_version(cfg.protocol_version)
                    .verify_chunk(cfg.verify_chunk);
                if let Some(stats) = &stats {
                    builder = builder.statistics(Arc::clone(stats));
                }
                let (queue, drainer) = builder.build();
                SimNode { id: *id, queue, drainer, pool, peers }
            })
            .collect();

        Self { nodes, deliveries, protocol_version: cfg.protocol_version, messages_routed: 0 }
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&SimNode> {
        self.nodes.get(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Consensus index that roots the routing tree at node `index`.
    pub fn root_index_of(&self, index: usize) -> Option<i64> {
        let target = self.nodes.get(index)?.id;
        let members: BTreeSet<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        members.iter().position(|id| *id == target).map(|pos| pos as i64)
    }

    /// Hands a batch to node `index` as if it arrived from `origin`.
    pub fn inject(&self, index: usize, message: TxsMessage, origin: NodeId) -> bool {
        match self.nodes.get(index) {
            Some(node) => {
                node.queue.push_message(Arc::new(message), origin);
                true
            }
            None => false,
        }
    }

    /// Routes every queued forward into its target's download queue.
    pub fn deliver_pending(&mut self) -> usize {
        let mut routed = 0;
        while let Ok(delivery) = self.deliveries.try_recv() {
            match self.nodes.iter().find(|n| n.id == delivery.to) {
                Some(node) => {
                    trace!(from = %delivery.from, to = %delivery.to, "routing batch");
                    node.queue.push_message(delivery.message, delivery.from);
                    routed += 1;
                }
                None => trace!(to = %delivery.to, "no such node, dropping batch"),
            }
        }
        self.messages_routed += routed;
        routed
    }

    /// One drain pass on every node. Returns the number of new pool entries.
    pub fn drain_all(&mut self, check: SignatureCheck) -> Result<usize, SyncError> {
        let mut imported = 0;
        for node in &mut self.nodes {
            let summary = node.drainer.drain_and_import(node.pool.as_ref(), check)?;
            imported += summary.imported;
        }
        Ok(imported)
    }

    /// Delivers and drains until no message is in flight and no queue holds
    /// a shard, or `max_rounds` is reached.
    pub fn run_until_quiescent(&mut self, check: SignatureCheck, max_rounds: usize) -> Result<SimulationReport, SyncError> {
        let mut report = SimulationReport::default();
        let routed_before = self.messages_routed;
        for round in 1..=max_rounds {
            let routed = self.deliver_pending();
            if routed == 0 && self.nodes.iter().all(|n| n.queue.is_empty()) {
                break;
            }
            report.imported += self.drain_all(check)?;
            report.rounds = round;
        }
        report.messages_routed = self.messages_routed - routed_before;
        report.pool_sizes = self.nodes.iter().map(|n| n.pool.len()).collect();
        debug!(rounds = report.rounds, routed = report.messages_routed, imported = report.imported, "simulation settled");
        Ok(report)
    }
}

/// Signs `count` transfers from one fresh key pair.
pub fn generate_transactions(count: usize) -> Result<Vec<Arc<Transaction>>, TxError> {
    let (pk, sk) = crypto::dilithium3_keypair();
    (0..count as u64)
        .map(|nonce| {
            let to = crypto::blake3_hash(&nonce.to_le_bytes());
            let body = TxBody::signed(nonce, to, 1 + nonce % 100, Vec::new(), &pk, &sk);
            Transaction::from_body(body).map(Arc::new)
        })
        .collect()
}

/// Encodes `txs` as a tree-routed message rooted at `consensus_index`.
pub fn tree_message(
    txs: &[Arc<Transaction>],
    protocol_version: u32,
    consensus_index: i64,
) -> Result<TxsMessage, CodecError> {
    let payload = codec::encode_batch(txs, protocol_version, consensus_index)?;
    Ok(TxsMessage::new(MessageKind::TreeRouted, payload))
}
