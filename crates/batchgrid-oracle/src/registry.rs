//! Node registry: the usable compute pool.
//!
//! Rebuilt on every refresh from the reachable set. Free capacity is
//! never cached: each allocation reads it fresh through
//! [`NodeRegistry::capacity_snapshot`].

use tracing::debug;

use batchgrid_core::{BatchConfig, NodeCapacity, NodeId};

use crate::interface::ClusterOracle;

/// A node the scheduler may place work on.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredNode {
    pub id: NodeId,
    /// Capacity held back from scheduling.
    pub reservation: f64,
}

#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Vec<RegisteredNode>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the node list from the reachable set.
    pub fn refresh(&mut self, oracle: &impl ClusterOracle, config: &BatchConfig) {
        let home = &config.capacity.home_node;
        self.nodes = oracle
            .reachable_nodes()
            .into_iter()
            .filter(|node| config.capacity.include_home || node != home)
            .filter(|node| oracle.has_usable_access(node))
            .filter(|node| oracle.total_capacity(node).is_ok_and(|total| total > 0.0))
            .map(|node| RegisteredNode {
                reservation: config.reservation_for(&node),
                id: node,
            })
            .collect();

        debug!(nodes = self.nodes.len(), "node registry refreshed");
    }

    pub fn nodes(&self) -> &[RegisteredNode] {
        &self.nodes
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Free capacity of one registered node right now.
    ///
    /// Nodes whose queries fail report zero.
    pub fn free_capacity(&self, oracle: &impl ClusterOracle, node: &RegisteredNode) -> f64 {
        match (oracle.total_capacity(&node.id), oracle.used_capacity(&node.id)) {
            (Ok(total), Ok(used)) => (total - used - node.reservation).max(0.0),
            _ => 0.0,
        }
    }

    /// Fresh free-capacity ledger for one allocation. Full nodes are omitted.
    pub fn capacity_snapshot(&self, oracle: &impl ClusterOracle) -> Vec<NodeCapacity> {
        self.nodes
            .iter()
            .map(|node| NodeCapacity::new(&node.id, self.free_capacity(oracle, node)))
            .filter(|cap| cap.free > 0.0)
            .collect()
    }

    /// Sum of free capacity across the pool.
    pub fn total_free(&self, oracle: &impl ClusterOracle) -> f64 {
        self.nodes
            .iter()
            .map(|node| self.free_capacity(oracle, node))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCluster, SimNode};
    use batchgrid_core::ManualClock;

    fn cluster() -> SimCluster {
        let sim = SimCluster::new(ManualClock::new(0), &BatchConfig::default());
        sim.add_node(SimNode::new("home", 128.0));
        sim.add_node(SimNode::new("pserv-0", 64.0));
        sim.add_node(SimNode::new("n00dles", 4.0).without_access());
        sim.add_node(SimNode::new("CSEC", 0.0));
        sim
    }

    #[test]
    fn refresh_keeps_only_usable_nodes() {
        let sim = cluster();
        let mut registry = NodeRegistry::new();
        registry.refresh(&sim, &BatchConfig::default());

        let ids: Vec<&str> = registry.node_ids().collect();
        assert_eq!(ids, vec!["home", "pserv-0"]);
    }

    #[test]
    fn home_can_be_excluded() {
        let sim = cluster();
        let mut config = BatchConfig::default();
        config.capacity.include_home = false;
        let mut registry = NodeRegistry::new();
        registry.refresh(&sim, &config);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.nodes()[0].id, "pserv-0");
    }

    #[test]
    fn free_capacity_subtracts_reservation_and_usage() {
        let sim = cluster();
        sim.set_background_usage("home", 16.0);
        let mut registry = NodeRegistry::new();
        registry.refresh(&sim, &BatchConfig::default());

        let snapshot = registry.capacity_snapshot(&sim);
        assert_eq!(snapshot[0], NodeCapacity::new("home", 128.0 - 16.0 - 32.0));
        assert_eq!(snapshot[1], NodeCapacity::new("pserv-0", 64.0));
        assert!((registry.total_free(&sim) - 144.0).abs() < 1e-9);
    }

    #[test]
    fn exhausted_nodes_are_left_out_of_snapshot() {
        let sim = cluster();
        sim.set_background_usage("pserv-0", 64.0);
        let mut registry = NodeRegistry::new();
        registry.refresh(&sim, &BatchConfig::default());

        let snapshot = registry.capacity_snapshot(&sim);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].node_id, "home");
    }
}
