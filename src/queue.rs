//! Download queue for transaction batches received from peers.
//!
//! Network callbacks push raw batches through any number of cloned
//! [`DownloadQueue`] handles. A single [`QueueDrainer`] periodically swaps the
//! buffered generation out and runs it through decode, sender recovery and
//! pool import. The drainer is not `Clone` and drains through `&mut self`, so
//! two drain passes can never overlap.
//!
//! The write lock is held only for an append or for swapping the buffer
//! handle; payload bytes are never copied under it.

use crate::codec::{self, SignatureCheck, LATEST_PROTOCOL_VERSION};
use crate::crypto::NodeId;
use crate::error::SyncError;
use crate::import;
use crate::metrics::StatisticsCollector;
use crate::peers::{MessageKind, PeerMessenger, PeerRoster, TxsMessage};
use crate::pool::TxPool;
use crate::router::{TreeRouter, UNKNOWN_CONSENSUS_INDEX};
use crate::verify::{self, DEFAULT_VERIFY_CHUNK};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// One received batch and where it came from.
#[derive(Debug)]
pub struct TxShard {
    message: Arc<TxsMessage>,
    origin: NodeId,
    forwarded_to: Vec<NodeId>,
}

impl TxShard {
    pub fn new(message: Arc<TxsMessage>, origin: NodeId) -> Self {
        Self { message, origin, forwarded_to: Vec::new() }
    }

    pub fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    pub fn kind(&self) -> MessageKind {
        self.message.kind
    }

    pub fn origin(&self) -> &NodeId {
        &self.origin
    }

    /// Peers this batch was re-broadcast to on receipt.
    pub fn forwarded_to(&self) -> &[NodeId] {
        &self.forwarded_to
    }
}

type Generation = Vec<Arc<TxShard>>;

struct Shared {
    buffer: RwLock<Generation>,
    router: Option<TreeRouter>,
    roster: Arc<dyn PeerRoster>,
    messenger: Arc<dyn PeerMessenger>,
    stats: Option<Arc<dyn StatisticsCollector>>,
    protocol_version: u32,
}

pub struct QueueBuilder {
    roster: Arc<dyn PeerRoster>,
    messenger: Arc<dyn PeerMessenger>,
    router: Option<TreeRouter>,
    stats: Option<Arc<dyn StatisticsCollector>>,
    protocol_version: u32,
    verify_chunk: usize,
}

impl QueueBuilder {
    /// Forward tree-routed batches along `router`'s topology. Without a
    /// router, received batches are only queued.
    pub fn router(mut self, router: TreeRouter) -> Self {
        self.router = Some(router);
        self
    }

    pub fn statistics(mut self, stats: Arc<dyn StatisticsCollector>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn verify_chunk(mut self, chunk: usize) -> Self {
        self.verify_chunk = chunk.max(1);
        self
    }

    pub fn build(self) -> (DownloadQueue, QueueDrainer) {
        let shared = Arc::new(Shared {
            buffer: RwLock::new(Vec::new()),
            router: self.router,
            roster: self.roster,
            messenger: self.messenger,
            stats: self.stats,
            protocol_version: self.protocol_version,
        });
        (
            DownloadQueue { shared: Arc::clone(&shared) },
            QueueDrainer { shared, verify_chunk: self.verify_chunk },
        )
    }
}

/// Producer handle. Cheap to clone, one per connection task is fine.
#[derive(Clone)]
pub struct DownloadQueue {
    shared: Arc<Shared>,
}

impl DownloadQueue {
    pub fn builder(roster: Arc<dyn PeerRoster>, messenger: Arc<dyn PeerMessenger>) -> QueueBuilder {
        QueueBuilder {
            roster,
            messenger,
            router: None,
            stats: None,
            protocol_version: LATEST_PROTOCOL_VERSION,
            verify_chunk: DEFAULT_VERIFY_CHUNK,
        }
    }

    /// Queues a batch received from `origin`.
    pub fn push(&self, payload: Vec<u8>, kind: MessageKind, origin: NodeId) {
        self.push_message(Arc::new(TxsMessage::new(kind, payload)), origin);
    }

    /// Queues a batch received from `origin`, first forwarding tree-routed
    /// batches to our children in the routing tree. The origin is never
    /// among the forward targets.
    pub fn push_message(&self, message: Arc<TxsMessage>, origin: NodeId) {
        let shared = &self.shared;
        let mut shard = TxShard::new(Arc::clone(&message), origin);

        if message.kind == MessageKind::TreeRouted {
            if let Some(router) = &shared.router {
                let index = codec::consensus_index(&message.payload, shared.protocol_version)
                    .unwrap_or(UNKNOWN_CONSENSUS_INDEX);
                trace!(consensus_index = index, from = %origin, "received transactions by tree");

                for selected in router.select_nodes(&shared.roster.current_peers(), index) {
                    if selected == origin {
                        continue;
                    }
                    shared.messenger.send_to_peer(&selected, Arc::clone(&message));
                    if let Some(stats) = &shared.stats {
                        stats.record_sent_bytes(message.len());
                    }
                    trace!(to = %selected, "forwarded transactions");
                    shard.forwarded_to.push(selected);
                }
            }
        }

        shared.buffer.write().push(Arc::new(shard));
        if let Some(stats) = &shared.stats {
            stats.record_received_bytes(message.len());
        }
    }

    /// Shards waiting for the next drain.
    pub fn len(&self) -> usize {
        self.shared.buffer.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.buffer.read().is_empty()
    }
}

/// Counters and phase timings for one drain pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub shards: usize,
    pub decoded: usize,
    pub skipped: usize,
    /// Senders recovered by the verifier.
    pub verified: usize,
    pub invalid_signatures: usize,
    /// Already pooled when the verifier ran.
    pub known_before_verify: usize,
    pub imported: usize,
    pub already_known: usize,
    pub rejected: usize,
    pub swap_elapsed: Duration,
    pub decode_elapsed: Duration,
    pub verify_elapsed: Duration,
    pub import_elapsed: Duration,
    pub mark_elapsed: Duration,
    pub total_elapsed: Duration,
}

/// The queue's only consumer.
pub struct QueueDrainer {
    shared: Arc<Shared>,
    verify_chunk: usize,
}

impl QueueDrainer {
    /// Takes every buffered shard, leaving a fresh empty generation for
    /// producers. Returns immediately when nothing is buffered.
    pub fn drain(&mut self) -> Vec<Arc<TxShard>> {
        let buffer = self.shared.buffer.upgradable_read();
        if buffer.is_empty() {
            return Vec::new();
        }
        let mut buffer = RwLockUpgradableReadGuard::upgrade(buffer);
        std::mem::take(&mut *buffer)
    }

    /// Puts shards back in front of anything pushed since they were drained.
    pub fn requeue(&mut self, shards: Vec<Arc<TxShard>>) {
        if shards.is_empty() {
            return;
        }
        let mut buffer = self.shared.buffer.write();
        let newer = std::mem::replace(&mut *buffer, shards);
        buffer.extend(newer);
    }

    pub fn protocol_version(&self) -> u32 {
        self.shared.protocol_version
    }

    /// Drains the queue and imports every shard into `pool`, in capture order.
    ///
    /// Malformed or rejected transactions are skipped. A fatal pool error
    /// stops the pass: the failing shard and everything after it are
    /// requeued and the error is returned.
    pub fn drain_and_import(&mut self, pool: &dyn TxPool, check: SignatureCheck) -> Result<ImportSummary, SyncError> {
        let started = Instant::now();
        let shards = self.drain();
        let mut summary = ImportSummary {
            shards: shards.len(),
            swap_elapsed: started.elapsed(),
            ..ImportSummary::default()
        };
        if shards.is_empty() {
            return Ok(summary);
        }

        let version = self.shared.protocol_version;
        let mut pending = shards.into_iter();
        while let Some(shard) = pending.next() {
            let phase = Instant::now();
            let report = codec::decode_batch(shard.payload(), version, check);
            summary.decode_elapsed += phase.elapsed();
            summary.decoded += report.txs.len();
            summary.skipped += report.skipped.len();

            let phase = Instant::now();
            let verified = verify::recover_senders(&report.txs, pool, self.verify_chunk);
            summary.verify_elapsed += phase.elapsed();
            summary.verified += verified.recovered;
            summary.invalid_signatures += verified.invalid;
            summary.known_before_verify += verified.skipped_known;

            let batch = match import::import_batch(&report.txs, shard.origin(), shard.forwarded_to(), pool) {
                Ok(batch) => batch,
                Err(aborted) => {
                    let unprocessed: Vec<Arc<TxShard>> = std::iter::once(shard).chain(pending).collect();
                    let requeued = unprocessed.len();
                    self.requeue(unprocessed);
                    let imported = summary.imported + aborted.partial.imported;
                    warn!(error = %aborted.source, imported, requeued, "pool failure, stopping drain pass");
                    return Err(SyncError::Pool { source: aborted.source, imported, requeued });
                }
            };
            summary.imported += batch.imported;
            summary.already_known += batch.already_known;
            summary.rejected += batch.rejected + batch.errored;
            summary.import_elapsed += batch.import_elapsed;
            summary.mark_elapsed += batch.mark_elapsed;

            if let Some(stats) = &self.shared.stats {
                stats.record_received_count(report.txs.len());
            }
        }
        summary.total_elapsed = started.elapsed();

        debug!(
            shards = summary.shards,
            imported = summary.imported,
            duplicated = summary.already_known,
            rejected = summary.rejected,
            skipped = summary.skipped,
            invalid_signatures = summary.invalid_signatures,
            swap_us = summary.swap_elapsed.as_micros() as u64,
            decode_us = summary.decode_elapsed.as_micros() as u64,
            verify_us = summary.verify_elapsed.as_micros() as u64,
            import_us = summary.import_elapsed.as_micros() as u64,
            mark_known_us = summary.mark_elapsed.as_micros() as u64,
            total_us = summary.total_elapsed.as_micros() as u64,
            "imported peer transactions"
        );
        Ok(summary)
    }
}
