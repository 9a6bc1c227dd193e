//! Consistent-hash partitioning with virtual nodes
//!
//! Ring positions are the low 32 bits of an MD5 digest. A key routes to the first
//! ring entry whose hash is `>=` the key hash, wrapping to the smallest entry.
//! Removing a node does not move keys that were routed to it; callers decide when
//! to pay for movement by calling [`PartitionManager::rebalance`].

use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::core::cluster::NodeId;
use crate::error::{CoordinationError, Result};

/// Position of `key` on the 32-bit ring.
pub fn ring_hash(key: &str) -> u32 {
    let digest = md5::compute(key.as_bytes());
    u32::from_be_bytes([digest.0[12], digest.0[13], digest.0[14], digest.0[15]])
}

/// Take ring position `hash` for `node_id`. The first claimant keeps a taken position.
fn claim_point(ring: &mut BTreeMap<u32, NodeId>, hash: u32, node_id: &str) -> bool {
    match ring.entry(hash) {
        Entry::Vacant(slot) => {
            slot.insert(node_id.to_string());
            true
        }
        Entry::Occupied(taken) => {
            debug!(hash = hash, owner = %taken.get(), node_id = %node_id, "Ring position collision, keeping first owner");
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub partition_id: String,
    pub node_id: NodeId,
    pub recoveries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAssignment {
    pub key: String,
    pub node_id: NodeId,
    pub hash: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceReport {
    pub total_keys: usize,
    pub moved: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub partition_id: String,
    pub old_node: NodeId,
    pub new_node: NodeId,
}

#[derive(Debug)]
pub struct PartitionManager {
    virtual_nodes: u32,
    nodes: BTreeMap<NodeId, u32>,
    ring: BTreeMap<u32, NodeId>,
    partitions: BTreeMap<String, Partition>,
    assignments: BTreeMap<String, NodeId>,
    rebalance_count: u64,
}

impl PartitionManager {
    pub fn new(virtual_nodes: u32) -> Self {
        Self {
            virtual_nodes,
            nodes: BTreeMap::new(),
            ring: BTreeMap::new(),
            partitions: BTreeMap::new(),
            assignments: BTreeMap::new(),
            rebalance_count: 0,
        }
    }

    fn rebuild_ring(&mut self) {
        self.ring.clear();
        let mut collisions = 0usize;
        for (node_id, weight) in &self.nodes {
            for i in 0..self.virtual_nodes.saturating_mul(*weight) {
                let hash = ring_hash(&format!("{}:{}", node_id, i));
                if !claim_point(&mut self.ring, hash, node_id) {
                    collisions += 1;
                }
            }
        }
        debug!(
            nodes = self.nodes.len(),
            ring_entries = self.ring.len(),
            collisions = collisions,
            "Hash ring rebuilt"
        );
    }

    pub fn add_node(&mut self, node_id: impl Into<NodeId>) {
        self.add_weighted_node(node_id, 1);
    }

    /// Add a node contributing `weight × virtual_nodes` ring entries.
    pub fn add_weighted_node(&mut self, node_id: impl Into<NodeId>, weight: u32) {
        let node_id = node_id.into();
        info!(node_id = %node_id, weight = weight, "Node joined hash ring");
        self.nodes.insert(node_id, weight.max(1));
        self.rebuild_ring();
    }

    /// Drop the node's ring entries and the partitions it owns.
    pub fn remove_node(&mut self, node_id: &str) -> bool {
        if self.nodes.remove(node_id).is_none() {
            return false;
        }
        self.partitions.retain(|_, p| p.node_id != node_id);
        self.rebuild_ring();
        warn!(node_id = %node_id, "Node left hash ring; keys stay assigned until rebalance");
        true
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn key_count(&self) -> usize {
        self.assignments.len()
    }

    pub fn rebalance_count(&self) -> u64 {
        self.rebalance_count
    }

    pub fn ring_size(&self) -> usize {
        self.ring.len()
    }

    fn route(&self, hash: u32) -> Option<&NodeId> {
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node_id)| node_id)
    }

    /// Route `key` through the ring and remember the assignment.
    pub fn assign_key(&mut self, key: &str) -> Result<KeyAssignment> {
        let hash = ring_hash(key);
        let node_id = self.route(hash).cloned().ok_or(CoordinationError::NoNodesAvailable)?;
        self.assignments.insert(key.to_string(), node_id.clone());
        Ok(KeyAssignment {
            key: key.to_string(),
            node_id,
            hash,
        })
    }

    /// Up to `count` distinct nodes for `key`, walking clockwise from its owner.
    pub fn preference_list(&self, key: &str, count: usize) -> Result<Vec<NodeId>> {
        if self.ring.is_empty() {
            return Err(CoordinationError::NoNodesAvailable);
        }

        let hash = ring_hash(key);
        let wanted = count.min(self.nodes.len());
        let mut nodes: Vec<NodeId> = Vec::with_capacity(wanted);
        for (_, node_id) in self.ring.range(hash..).chain(self.ring.range(..hash)) {
            if nodes.len() == wanted {
                break;
            }
            if !nodes.contains(node_id) {
                nodes.push(node_id.clone());
            }
        }
        Ok(nodes)
    }

    pub fn lookup_key(&self, key: &str) -> Option<&str> {
        self.assignments.get(key).map(String::as_str)
    }

    /// Re-route every known key against the current ring.
    pub fn rebalance(&mut self) -> Result<RebalanceReport> {
        if self.ring.is_empty() {
            return Err(CoordinationError::NoNodesAvailable);
        }

        let mut moved = 0;
        let keys: Vec<String> = self.assignments.keys().cloned().collect();
        for key in &keys {
            if let Some(target) = self.route(ring_hash(key)).cloned() {
                if self.assignments.get(key) != Some(&target) {
                    moved += 1;
                    self.assignments.insert(key.clone(), target);
                }
            }
        }

        self.rebalance_count += 1;
        info!(total_keys = keys.len(), moved = moved, "⚖️ Rebalance completed");
        Ok(RebalanceReport {
            total_keys: keys.len(),
            moved,
        })
    }

    fn least_loaded_node(&self) -> Option<NodeId> {
        let load = self.distribution();
        self.nodes
            .keys()
            .min_by_key(|id| (load.get(*id).copied().unwrap_or(0), (*id).clone()))
            .cloned()
    }

    /// Create a partition, placing it on `node_id` or the node owning the fewest partitions.
    pub fn create_partition(&mut self, partition_id: &str, node_id: Option<&str>) -> Result<&Partition> {
        if self.partitions.contains_key(partition_id) {
            return Err(CoordinationError::PartitionExists(partition_id.to_string()));
        }

        let owner = match node_id {
            Some(id) if self.nodes.contains_key(id) => id.to_string(),
            Some(id) => return Err(CoordinationError::NodeNotFound(id.to_string())),
            None => self.least_loaded_node().ok_or(CoordinationError::NoNodesAvailable)?,
        };

        debug!(partition_id = %partition_id, node_id = %owner, "Partition created");
        let partition = Partition {
            partition_id: partition_id.to_string(),
            node_id: owner,
            recoveries: 0,
        };
        Ok(self.partitions.entry(partition_id.to_string()).or_insert(partition))
    }

    /// Move ownership of a partition after its node failed. Contents are not copied.
    pub fn recover_partition(&mut self, partition_id: &str, new_node: &str) -> Result<RecoveryOutcome> {
        if !self.nodes.contains_key(new_node) {
            return Err(CoordinationError::NodeNotFound(new_node.to_string()));
        }
        let partition = self
            .partitions
            .get_mut(partition_id)
            .ok_or_else(|| CoordinationError::PartitionNotFound(partition_id.to_string()))?;

        let old_node = std::mem::replace(&mut partition.node_id, new_node.to_string());
        partition.recoveries += 1;
        info!(partition_id = %partition_id, old_node = %old_node, new_node = %new_node, "Partition recovered");

        Ok(RecoveryOutcome {
            partition_id: partition_id.to_string(),
            old_node,
            new_node: new_node.to_string(),
        })
    }

    pub fn get_partition(&self, partition_id: &str) -> Option<&Partition> {
        self.partitions.get(partition_id)
    }

    /// Partition id → owning node.
    pub fn get_partition_map(&self) -> BTreeMap<String, NodeId> {
        self.partitions
            .values()
            .map(|p| (p.partition_id.clone(), p.node_id.clone()))
            .collect()
    }

    /// Number of partitions owned by each node (nodes without partitions included).
    pub fn distribution(&self) -> BTreeMap<NodeId, usize> {
        let mut load: BTreeMap<NodeId, usize> = self.nodes.keys().map(|id| (id.clone(), 0)).collect();
        for partition in self.partitions.values() {
            *load.entry(partition.node_id.clone()).or_insert(0) += 1;
        }
        load
    }
}
