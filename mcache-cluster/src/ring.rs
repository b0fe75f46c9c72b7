//! # Consistent-Hash Ring
//!
//! Ordered mapping from 64-bit positions to physical nodes. Each node
//! contributes a fixed number of virtual entries named `"<nodeId>-<i>"` to
//! smooth the distribution; lookups walk clockwise from the key's hash.
//!
//! ## Design Principles
//!
//! 1. **Single Hash Function**: The ring owns its `HashAlgorithm`; add,
//!    remove, and lookup can never mix functions.
//! 2. **Exact Removal**: Inserted positions are recorded per node id, so
//!    removal deletes precisely the entries that were added, including when
//!    a position collision skipped an insert.
//! 3. **Single-Writer Many-Reader**: Writers serialize on the write half of
//!    a `RwLock`; readers always observe a fully consistent ring.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use mcache_common::{CacheNode, HashAlgorithm};

/// Virtual-entry spread over the physical nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionStats {
    pub min: usize,
    pub max: usize,
    pub avg: f64,
    pub std_dev: f64,
}

struct RingState {
    /// position -> owning node, ordered for clockwise walks.
    positions: BTreeMap<i64, CacheNode>,
    /// node id -> positions actually inserted for it.
    virtual_positions: HashMap<String, Vec<i64>>,
}

/// Consistent-hash ring with virtual nodes.
pub struct HashRing {
    algorithm: HashAlgorithm,
    virtual_nodes: usize,
    state: RwLock<RingState>,
}

impl HashRing {
    pub fn new(virtual_nodes: usize, algorithm: HashAlgorithm) -> Self {
        HashRing {
            algorithm,
            virtual_nodes: virtual_nodes.max(1),
            state: RwLock::new(RingState {
                positions: BTreeMap::new(),
                virtual_positions: HashMap::new(),
            }),
        }
    }

    /// Inserts the node's virtual entries. Re-adding a present node is a
    /// no-op.
    pub fn add_node(&self, node: &CacheNode) {
        let mut state = self.state.write();
        if state.virtual_positions.contains_key(&node.id) {
            return;
        }

        let mut inserted = Vec::with_capacity(self.virtual_nodes);
        for i in 0..self.virtual_nodes {
            let virtual_key = format!("{}-{}", node.id, i);
            let position = self.algorithm.hash(virtual_key.as_bytes());
            // A collision with another node's entry keeps the earlier owner.
            if !state.positions.contains_key(&position) {
                state.positions.insert(position, node.clone());
                inserted.push(position);
            }
        }
        debug!(node = %node.id, entries = inserted.len(), "added node to ring");
        state.virtual_positions.insert(node.id.clone(), inserted);
    }

    /// Removes every virtual entry recorded for the node id.
    pub fn remove_node(&self, node_id: &str) -> bool {
        let mut state = self.state.write();
        let positions = match state.virtual_positions.remove(node_id) {
            Some(positions) => positions,
            None => return false,
        };
        for position in &positions {
            state.positions.remove(position);
        }
        debug!(node = %node_id, entries = positions.len(), "removed node from ring");
        true
    }

    /// Returns the node owning `key`: the first entry at or after the key's
    /// hash, wrapping to the least position. Absent only when the ring is
    /// empty.
    pub fn node_for(&self, key: &str) -> Option<CacheNode> {
        let hash = self.algorithm.hash(key.as_bytes());
        let state = self.state.read();
        state
            .positions
            .range(hash..)
            .next()
            .or_else(|| state.positions.iter().next())
            .map(|(_, node)| node.clone())
    }

    /// Walks clockwise from the key's hash collecting distinct physical
    /// nodes until `count` is reached or every node has been visited. The
    /// order defines replica primacy: first is the primary.
    pub fn nodes_for(&self, key: &str, count: usize) -> Vec<CacheNode> {
        let hash = self.algorithm.hash(key.as_bytes());
        let state = self.state.read();
        let mut nodes: Vec<CacheNode> = Vec::new();

        let walk = state
            .positions
            .range(hash..)
            .chain(state.positions.range(..hash));
        for (_, node) in walk {
            if nodes.len() >= count {
                break;
            }
            if !nodes.iter().any(|seen| seen.id == node.id) {
                nodes.push(node.clone());
            }
        }
        nodes
    }

    /// Distinct physical nodes currently on the ring.
    pub fn nodes(&self) -> Vec<CacheNode> {
        let state = self.state.read();
        let mut nodes: Vec<CacheNode> = Vec::new();
        for node in state.positions.values() {
            if !nodes.iter().any(|seen| seen.id == node.id) {
                nodes.push(node.clone());
            }
        }
        nodes
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.state.read().virtual_positions.contains_key(node_id)
    }

    /// Number of distinct physical nodes.
    pub fn node_count(&self) -> usize {
        self.state.read().virtual_positions.len()
    }

    /// Total virtual entries on the ring.
    pub fn len(&self) -> usize {
        self.state.read().positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().positions.is_empty()
    }

    /// Virtual-entry counts per physical node, reduced to min/max/avg/stddev.
    pub fn distribution_stats(&self) -> DistributionStats {
        let state = self.state.read();
        let counts: Vec<usize> = state
            .virtual_positions
            .values()
            .map(|positions| positions.len())
            .collect();
        if counts.is_empty() {
            return DistributionStats::default();
        }

        let min = *counts.iter().min().expect("non-empty");
        let max = *counts.iter().max().expect("non-empty");
        let avg = counts.iter().sum::<usize>() as f64 / counts.len() as f64;
        let variance = counts
            .iter()
            .map(|&count| {
                let delta = count as f64 - avg;
                delta * delta
            })
            .sum::<f64>()
            / counts.len() as f64;

        DistributionStats {
            min,
            max,
            avg,
            std_dev: variance.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> CacheNode {
        CacheNode::new(id, "127.0.0.1", 7000)
    }

    fn ring_with(ids: &[&str]) -> HashRing {
        let ring = HashRing::new(150, HashAlgorithm::Md5);
        for id in ids {
            ring.add_node(&node(id));
        }
        ring
    }

    #[test]
    fn empty_ring_has_no_owner() {
        let ring = HashRing::new(150, HashAlgorithm::Md5);
        assert_eq!(ring.node_for("anything"), None);
        assert!(ring.nodes_for("anything", 3).is_empty());
    }

    #[test]
    fn single_node_owns_everything() {
        let ring = ring_with(&["n1"]);
        for key in ["a", "b", "c", "zebra"] {
            assert_eq!(ring.node_for(key).unwrap().id, "n1");
        }
    }

    #[test]
    fn lookup_is_stable_across_calls() {
        let ring = ring_with(&["n1", "n2", "n3"]);
        let first = ring.node_for("fixed-key").unwrap();
        for _ in 0..10 {
            assert_eq!(ring.node_for("fixed-key").unwrap().id, first.id);
        }
    }

    #[test]
    fn replica_walk_returns_distinct_nodes() {
        let ring = ring_with(&["n1", "n2", "n3"]);
        let replicas = ring.nodes_for("some-key", 2);
        assert_eq!(replicas.len(), 2);
        assert_ne!(replicas[0].id, replicas[1].id);

        // Stable across calls, primary first.
        let again = ring.nodes_for("some-key", 2);
        assert_eq!(replicas, again);
        assert_eq!(replicas[0].id, ring.node_for("some-key").unwrap().id);
    }

    #[test]
    fn replica_count_caps_at_node_count() {
        let ring = ring_with(&["n1", "n2"]);
        let replicas = ring.nodes_for("key", 5);
        assert_eq!(replicas.len(), 2);
    }

    #[test]
    fn add_remove_restores_ring() {
        let ring = ring_with(&["n1", "n2"]);
        let before = ring.len();

        ring.add_node(&node("n3"));
        assert!(ring.contains_node("n3"));
        ring.remove_node("n3");

        assert_eq!(ring.len(), before);
        assert!(!ring.contains_node("n3"));
        assert_eq!(ring.node_count(), 2);
    }

    #[test]
    fn remove_unknown_node_is_false() {
        let ring = ring_with(&["n1"]);
        assert!(!ring.remove_node("ghost"));
        assert_eq!(ring.node_count(), 1);
    }

    #[test]
    fn readd_is_noop() {
        let ring = ring_with(&["n1"]);
        let before = ring.len();
        ring.add_node(&node("n1"));
        assert_eq!(ring.len(), before);
    }

    #[test]
    fn distribution_stats_are_ordered() {
        let ring = ring_with(&["n1", "n2", "n3"]);
        let stats = ring.distribution_stats();
        assert!(stats.min as f64 <= stats.avg);
        assert!(stats.avg <= stats.max as f64);
        assert!(stats.std_dev >= 0.0);
        assert!(stats.max <= 150);
    }

    #[test]
    fn fnv_ring_routes_consistently() {
        let ring = HashRing::new(50, HashAlgorithm::Fnv1a);
        ring.add_node(&node("n1"));
        ring.add_node(&node("n2"));
        let owner = ring.node_for("key").unwrap();
        assert_eq!(ring.node_for("key").unwrap().id, owner.id);
    }
}
