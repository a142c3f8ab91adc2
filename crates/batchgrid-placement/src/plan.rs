//! Allocator output.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use batchgrid_core::{ActionKind, Millis, NodeId, TargetId};

/// One dispatch call: `threads` threads of `kind` on `node`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub node: NodeId,
    pub kind: ActionKind,
    pub threads: u32,
    pub target: TargetId,
    pub delay_ms: Millis,
    /// Capacity this entry occupies on `node`.
    pub demand: f64,
}

/// Ordered dispatch calls that together satisfy every requested task.
///
/// A plan is either executed in full or discarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
}

impl Plan {
    /// Number of dispatch calls needed to execute this plan.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total threads of `kind` against `target` across all nodes.
    pub fn threads_for(&self, kind: ActionKind, target: &str) -> u32 {
        self.entries
            .iter()
            .filter(|e| e.kind == kind && e.target == target)
            .map(|e| e.threads)
            .sum()
    }

    /// Threads placed on `node` for entries matching `kind`.
    pub fn threads_on(&self, node: &str, kind: ActionKind) -> u32 {
        self.entries
            .iter()
            .filter(|e| e.node == node && e.kind == kind)
            .map(|e| e.threads)
            .sum()
    }

    pub fn nodes_touched(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.node.as_str()).collect()
    }

    pub fn total_demand(&self) -> f64 {
        self.entries.iter().map(|e| e.demand).sum()
    }
}
