//! Deterministic tree topology for re-broadcasting transaction batches.
//!
//! Every node lays the same members (the roster plus itself) out in sorted
//! order and hangs a `k`-ary tree off the member selected by the consensus
//! index. A node forwards only to its own children, so a batch injected at the
//! root reaches every member once without any coordinator.

use crate::crypto::NodeId;
use std::collections::BTreeSet;

/// Consensus index to use when a batch does not carry one.
pub const UNKNOWN_CONSENSUS_INDEX: i64 = -1;

/// Root position used for negative consensus indices.
const FALLBACK_ROOT: usize = 0;

#[derive(Debug, Clone)]
pub struct TreeRouter {
    local: NodeId,
    branching: usize,
}

impl TreeRouter {
    pub fn new(local: NodeId, branching: usize) -> Self {
        Self { local, branching: branching.max(1) }
    }

    pub fn branching(&self) -> usize {
        self.branching
    }

    /// Children of the local node in the tree rooted by `consensus_index`,
    /// in tree order. Pure: identical inputs give identical output.
    pub fn select_nodes(&self, peers: &BTreeSet<NodeId>, consensus_index: i64) -> Vec<NodeId> {
        if peers.is_empty() {
            return Vec::new();
        }
        let members = self.members(peers);
        let n = members.len();
        let Some(local_pos) = members.iter().position(|id| *id == self.local) else {
            return Vec::new();
        };
        let root = Self::root_position(consensus_index, n);
        let relative = (local_pos + n - root) % n;

        let first_child = relative.saturating_mul(self.branching).saturating_add(1);
        (first_child..first_child.saturating_add(self.branching))
            .take_while(|child| *child < n)
            .map(|child| members[(root + child) % n])
            .collect()
    }

    /// Sorted member list the tree is laid over.
    pub fn members(&self, peers: &BTreeSet<NodeId>) -> Vec<NodeId> {
        let mut members: Vec<NodeId> = peers.iter().copied().collect();
        if let Err(pos) = members.binary_search(&self.local) {
            members.insert(pos, self.local);
        }
        members
    }

    fn root_position(consensus_index: i64, n: usize) -> usize {
        if consensus_index < 0 {
            return FALLBACK_ROOT;
        }
        (consensus_index as u64 % n as u64) as usize
    }
}
