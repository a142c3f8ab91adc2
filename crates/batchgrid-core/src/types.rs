//! Domain types shared by every batchgrid crate.

use serde::{Deserialize, Serialize};

/// Identifier of a compute node.
pub type NodeId = String;

/// Identifier of a target resource.
pub type TargetId = String;

/// Wall-clock timestamp or duration in milliseconds.
pub type Millis = u64;

/// The three remote action kinds a pipeline is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Hack,
    Grow,
    Weaken,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [ActionKind::Hack, ActionKind::Grow, ActionKind::Weaken];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Hack => "hack",
            ActionKind::Grow => "grow",
            ActionKind::Weaken => "weaken",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request for `threads` threads of one action against one target.
///
/// Tasks only live for the duration of a single decision; the allocator
/// turns them into a concrete per-node plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub kind: ActionKind,
    pub threads: u32,
    pub target: TargetId,
    /// Start delay handed to the dispatched action.
    pub delay_ms: Millis,
    /// Capacity units consumed by one thread.
    pub cost_per_thread: f64,
}

impl Task {
    pub fn new(
        kind: ActionKind,
        threads: u32,
        target: &str,
        delay_ms: Millis,
        cost_per_thread: f64,
    ) -> Self {
        Self {
            kind,
            threads,
            target: target.to_string(),
            delay_ms,
            cost_per_thread,
        }
    }

    /// Total capacity demanded by this task.
    pub fn demand(&self) -> f64 {
        f64::from(self.threads) * self.cost_per_thread
    }
}

/// Free capacity of one node, as read at the start of an allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub node_id: NodeId,
    pub free: f64,
}

impl NodeCapacity {
    pub fn new(node_id: &str, free: f64) -> Self {
        Self {
            node_id: node_id.to_string(),
            free,
        }
    }
}
