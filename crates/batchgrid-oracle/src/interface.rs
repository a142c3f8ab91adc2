//! Substrate interface traits.
//!
//! All calls are synchronous: a tick makes every decision without
//! suspending, so implementations must answer from state they already
//! hold (or block briefly).

use serde::{Deserialize, Serialize};

use batchgrid_core::{ActionKind, Millis, NodeId, TargetId};

use crate::error::{DispatchError, OracleResult};

/// Security added per hack thread.
pub const HACK_SECURITY_DELTA: f64 = 0.002;
/// Security added per grow thread.
pub const GROW_SECURITY_DELTA: f64 = 0.004;
/// Security removed per weaken thread.
pub const WEAKEN_SECURITY_DELTA: f64 = 0.05;

/// Identity of one dispatched action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionHandle {
    pub node: NodeId,
    pub pid: u64,
}

/// An action currently occupying capacity on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningAction {
    pub handle: ActionHandle,
    pub kind: ActionKind,
    pub target: TargetId,
    pub threads: u32,
}

/// Topology and capacity of compute nodes.
pub trait ClusterOracle {
    /// Every node currently reachable, usable or not.
    fn reachable_nodes(&self) -> Vec<NodeId>;

    fn has_usable_access(&self, node: &str) -> bool;

    fn total_capacity(&self, node: &str) -> OracleResult<f64>;

    fn used_capacity(&self, node: &str) -> OracleResult<f64>;
}

/// Live target attributes. Values are only valid at the moment of the call.
pub trait TargetOracle {
    /// Every target the substrate knows about.
    fn known_targets(&self) -> Vec<TargetId>;

    /// Capability level of the operator, compared to `required_level`.
    fn player_level(&self) -> u32;

    fn current_money(&self, target: &str) -> OracleResult<f64>;

    fn max_money(&self, target: &str) -> OracleResult<f64>;

    fn current_security(&self, target: &str) -> OracleResult<f64>;

    fn min_security(&self, target: &str) -> OracleResult<f64>;

    fn required_level(&self, target: &str) -> OracleResult<u32>;

    /// Duration in milliseconds an action of `kind` would take if started now.
    fn action_duration(&self, kind: ActionKind, target: &str) -> OracleResult<f64>;

    /// Fraction of current money one hack thread extracts.
    fn extraction_fraction_per_thread(&self, target: &str) -> OracleResult<f64>;

    fn success_chance(&self, target: &str) -> OracleResult<f64>;

    /// Magnitude of the security change caused by one thread of `kind`.
    /// Hack and grow raise security; weaken lowers it.
    fn security_delta_per_thread(&self, kind: ActionKind) -> f64 {
        match kind {
            ActionKind::Hack => HACK_SECURITY_DELTA,
            ActionKind::Grow => GROW_SECURITY_DELTA,
            ActionKind::Weaken => WEAKEN_SECURITY_DELTA,
        }
    }

    /// Grow threads needed to lift `current` money to `goal`.
    fn growth_threads_needed(&self, target: &str, current: f64, goal: f64) -> OracleResult<u32>;
}

/// Side-effecting calls on the substrate.
pub trait Executor {
    fn dispatch(
        &self,
        node: &str,
        kind: ActionKind,
        threads: u32,
        target: &str,
        delay_ms: Millis,
    ) -> Result<ActionHandle, DispatchError>;

    /// Kill a running action. Returns false if it was already gone.
    fn cancel(&self, handle: &ActionHandle) -> bool;

    fn running(&self, node: &str) -> Vec<RunningAction>;
}

/// The full substrate surface the scheduler needs.
pub trait Environment: ClusterOracle + TargetOracle + Executor {}

impl<T: ClusterOracle + TargetOracle + Executor> Environment for T {}
