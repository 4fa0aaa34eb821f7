use crate::crypto::NodeId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// How a transaction batch message travelled to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Plain broadcast; never re-forwarded.
    Broadcast,
    /// Sent along the routing tree; forwarded on to our children.
    TreeRouted,
}

/// A transaction batch message as handed over by the network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxsMessage {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl TxsMessage {
    pub fn new(kind: MessageKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Source of the live peer roster.
pub trait PeerRoster: Send + Sync {
    fn current_peers(&self) -> BTreeSet<NodeId>;
}

/// Fire-and-forget delivery of a message to one peer.
pub trait PeerMessenger: Send + Sync {
    fn send_to_peer(&self, peer: &NodeId, message: Arc<TxsMessage>);
}

/// Connected peers, updated by the connection handler.
#[derive(Debug, Default)]
pub struct PeerSet {
    peers: RwLock<BTreeSet<NodeId>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peers<I: IntoIterator<Item = NodeId>>(peers: I) -> Self {
        Self { peers: RwLock::new(peers.into_iter().collect()) }
    }

    pub fn insert(&self, peer: NodeId) -> bool {
        self.peers.write().insert(peer)
    }

    pub fn remove(&self, peer: &NodeId) -> bool {
        self.peers.write().remove(peer)
    }

    pub fn contains(&self, peer: &NodeId) -> bool {
        self.peers.read().contains(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

impl PeerRoster for PeerSet {
    fn current_peers(&self) -> BTreeSet<NodeId> {
        self.peers.read().clone()
    }
}

/// A message queued for delivery to `to`.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub from: NodeId,
    pub to: NodeId,
    pub message: Arc<TxsMessage>,
}

/// Messenger that hands deliveries to the network task over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelMessenger {
    local: NodeId,
    outbound: mpsc::UnboundedSender<Delivery>,
}

impl ChannelMessenger {
    /// Shares an existing outbound channel, e.g. one routing task for many nodes.
    pub fn with_sender(local: NodeId, outbound: mpsc::UnboundedSender<Delivery>) -> Self {
        Self { local, outbound }
    }
}

impl PeerMessenger for ChannelMessenger {
    fn send_to_peer(&self, peer: &NodeId, message: Arc<TxsMessage>) {
        let delivery = Delivery { from: self.local, to: *peer, message };
        if self.outbound.send(delivery).is_err() {
            trace!(peer = %peer, "network task gone, dropping outbound batch");
        }
    }
}
