//! In-memory simulated substrate.
//!
//! `SimCluster` implements every substrate trait against plain in-memory
//! nodes and targets. Dispatched actions hold their capacity from dispatch
//! until completion and apply their money/security effect when they
//! complete. Time comes from a [`Clock`]; pending events are settled
//! lazily whenever the cluster is queried, so the same simulation runs in
//! virtual time (`ManualClock`) or wall-clock time (`SystemClock`).
//!
//! By default an action's duration is fixed at dispatch, so the scheduler's
//! timing arithmetic is exact. [`SimCluster::realistic`] instead fixes it
//! when the start delay elapses, using the security level at that moment,
//! which is how timing drift arises on a real substrate.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use batchgrid_core::{ActionKind, BatchConfig, Clock, Millis, NodeId, TargetId};

use crate::error::{DispatchError, OracleError, OracleResult};
use crate::interface::{
    ActionHandle, ClusterOracle, Executor, GROW_SECURITY_DELTA, HACK_SECURITY_DELTA,
    RunningAction, TargetOracle, WEAKEN_SECURITY_DELTA,
};

/// Grow and weaken take this many hack-durations.
const GROW_TIME_FACTOR: f64 = 3.2;
const WEAKEN_TIME_FACTOR: f64 = 4.0;
const MAX_SECURITY: f64 = 100.0;

/// A simulated compute node.
#[derive(Debug, Clone, PartialEq)]
pub struct SimNode {
    pub id: NodeId,
    pub capacity: f64,
    /// Capacity used by consumers the scheduler doesn't know about.
    pub background_used: f64,
    pub access: bool,
}

impl SimNode {
    pub fn new(id: &str, capacity: f64) -> Self {
        Self {
            id: id.to_string(),
            capacity,
            background_used: 0.0,
            access: true,
        }
    }

    pub fn without_access(mut self) -> Self {
        self.access = false;
        self
    }
}

/// A simulated target. Starts at max money and min security.
#[derive(Debug, Clone, PartialEq)]
pub struct SimTarget {
    pub id: TargetId,
    pub money: f64,
    pub max_money: f64,
    pub security: f64,
    pub min_security: f64,
    pub required_level: u32,
    pub fraction_per_thread: f64,
    pub chance: f64,
    /// Money multiplier applied per grow thread.
    pub growth_per_thread: f64,
    /// Hack duration at minimum security.
    pub base_hack_ms: f64,
}

impl SimTarget {
    pub fn new(id: &str, max_money: f64, min_security: f64) -> Self {
        Self {
            id: id.to_string(),
            money: max_money,
            max_money,
            security: min_security,
            min_security,
            required_level: 1,
            fraction_per_thread: 0.002,
            chance: 0.9,
            growth_per_thread: 1.01,
            base_hack_ms: 1_000.0,
        }
    }

    /// Durations scale linearly with security above the floor.
    pub fn duration(&self, kind: ActionKind) -> f64 {
        let hack = self.base_hack_ms * (self.security / self.min_security.max(1e-9));
        match kind {
            ActionKind::Hack => hack,
            ActionKind::Grow => hack * GROW_TIME_FACTOR,
            ActionKind::Weaken => hack * WEAKEN_TIME_FACTOR,
        }
    }

    fn apply(&mut self, kind: ActionKind, threads: u32) {
        let threads_f = f64::from(threads);
        match kind {
            ActionKind::Hack => {
                let fraction = (self.fraction_per_thread * threads_f).min(1.0);
                self.money -= self.money * fraction;
                self.security = (self.security + HACK_SECURITY_DELTA * threads_f).min(MAX_SECURITY);
            }
            ActionKind::Grow => {
                let grown = self.money.max(1.0) * self.growth_per_thread.powf(threads_f);
                self.money = grown.min(self.max_money);
                self.security = (self.security + GROW_SECURITY_DELTA * threads_f).min(MAX_SECURITY);
            }
            ActionKind::Weaken => {
                self.security = (self.security - WEAKEN_SECURITY_DELTA * threads_f).max(self.min_security);
            }
        }
    }
}

#[derive(Debug, Clone)]
struct SimAction {
    handle: ActionHandle,
    kind: ActionKind,
    target: TargetId,
    threads: u32,
    cost: f64,
    start_at: Millis,
    /// Known once the duration has been fixed.
    end_at: Option<Millis>,
}

impl SimAction {
    fn next_event(&self) -> Millis {
        self.end_at.unwrap_or(self.start_at)
    }
}

#[derive(Debug, Default)]
struct SimState {
    nodes: BTreeMap<NodeId, SimNode>,
    targets: BTreeMap<TargetId, SimTarget>,
    actions: Vec<SimAction>,
    next_pid: u64,
    failing: HashSet<NodeId>,
    completed: u64,
}

impl SimState {
    fn used_by_actions(&self, node: &str) -> f64 {
        self.actions
            .iter()
            .filter(|a| a.handle.node == node)
            .map(|a| a.cost * f64::from(a.threads))
            .sum()
    }

    fn target(&self, target: &str) -> OracleResult<&SimTarget> {
        self.targets
            .get(target)
            .ok_or_else(|| OracleError::UnknownTarget(target.to_string()))
    }

    fn node(&self, node: &str) -> OracleResult<&SimNode> {
        self.nodes
            .get(node)
            .ok_or_else(|| OracleError::UnknownNode(node.to_string()))
    }
}

/// In-memory substrate driven by a [`Clock`].
pub struct SimCluster {
    clock: Arc<dyn Clock>,
    costs: [f64; 3],
    player_level: u32,
    duration_at_start: bool,
    state: Mutex<SimState>,
}

impl SimCluster {
    /// Create an empty cluster. Per-thread costs come from `config`.
    pub fn new(clock: impl Clock + 'static, config: &BatchConfig) -> Self {
        Self {
            clock: Arc::new(clock),
            costs: [
                config.cost_for(ActionKind::Hack),
                config.cost_for(ActionKind::Grow),
                config.cost_for(ActionKind::Weaken),
            ],
            player_level: 100,
            duration_at_start: false,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Fix action durations when they start rather than at dispatch.
    pub fn realistic(mut self) -> Self {
        self.duration_at_start = true;
        self
    }

    pub fn with_player_level(mut self, level: u32) -> Self {
        self.player_level = level;
        self
    }

    pub fn add_node(&self, node: SimNode) {
        self.lock().nodes.insert(node.id.clone(), node);
    }

    pub fn add_target(&self, target: SimTarget) {
        self.lock().targets.insert(target.id.clone(), target);
    }

    pub fn remove_target(&self, target: &str) {
        self.lock().targets.remove(target);
    }

    pub fn set_background_usage(&self, node: &str, used: f64) {
        if let Some(n) = self.lock().nodes.get_mut(node) {
            n.background_used = used;
        }
    }

    pub fn set_security(&self, target: &str, security: f64) {
        let mut state = self.settled();
        if let Some(t) = state.targets.get_mut(target) {
            t.security = security;
        }
    }

    pub fn set_money(&self, target: &str, money: f64) {
        let mut state = self.settled();
        if let Some(t) = state.targets.get_mut(target) {
            t.money = money;
        }
    }

    /// Make every subsequent dispatch on `node` fail.
    pub fn fail_dispatch_on(&self, node: &str) {
        self.lock().failing.insert(node.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Current state of a target, after settling due events.
    pub fn target(&self, target: &str) -> Option<SimTarget> {
        self.settled().targets.get(target).cloned()
    }

    /// All actions still holding capacity.
    pub fn running_actions(&self) -> Vec<RunningAction> {
        self.settled().actions.iter().map(to_running).collect()
    }

    pub fn running_count(&self) -> usize {
        self.settled().actions.len()
    }

    pub fn completed_count(&self) -> u64 {
        self.settled().completed
    }

    fn cost(&self, kind: ActionKind) -> f64 {
        match kind {
            ActionKind::Hack => self.costs[0],
            ActionKind::Grow => self.costs[1],
            ActionKind::Weaken => self.costs[2],
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock and process every event due at the current clock time.
    fn settled(&self) -> MutexGuard<'_, SimState> {
        let now = self.clock.now_ms();
        let mut state = self.lock();
        self.settle(&mut state, now);
        state
    }

    fn settle(&self, state: &mut SimState, now: Millis) {
        loop {
            let next = state
                .actions
                .iter()
                .enumerate()
                .filter(|(_, a)| a.next_event() <= now)
                .min_by_key(|(_, a)| (a.next_event(), a.handle.pid))
                .map(|(i, _)| i);
            let Some(idx) = next else { break };

            if state.actions[idx].end_at.is_none() {
                // Start event: duration is fixed against current security.
                let action = &state.actions[idx];
                let duration = state
                    .targets
                    .get(&action.target)
                    .map(|t| t.duration(action.kind))
                    .unwrap_or(0.0);
                let end = action.start_at + duration.ceil() as Millis;
                state.actions[idx].end_at = Some(end);
                continue;
            }

            let action = state.actions.swap_remove(idx);
            if let Some(target) = state.targets.get_mut(&action.target) {
                target.apply(action.kind, action.threads);
                trace!(
                    target = %action.target,
                    kind = %action.kind,
                    threads = action.threads,
                    money = target.money,
                    security = target.security,
                    "simulated action completed"
                );
            }
            state.completed += 1;
        }
    }
}

fn to_running(action: &SimAction) -> RunningAction {
    RunningAction {
        handle: action.handle.clone(),
        kind: action.kind,
        target: action.target.clone(),
        threads: action.threads,
    }
}

impl ClusterOracle for SimCluster {
    fn reachable_nodes(&self) -> Vec<NodeId> {
        self.lock().nodes.keys().cloned().collect()
    }

    fn has_usable_access(&self, node: &str) -> bool {
        self.lock().nodes.get(node).is_some_and(|n| n.access)
    }

    fn total_capacity(&self, node: &str) -> OracleResult<f64> {
        Ok(self.lock().node(node)?.capacity)
    }

    fn used_capacity(&self, node: &str) -> OracleResult<f64> {
        let state = self.settled();
        let background = state.node(node)?.background_used;
        Ok(background + state.used_by_actions(node))
    }
}

impl TargetOracle for SimCluster {
    fn known_targets(&self) -> Vec<TargetId> {
        self.lock().targets.keys().cloned().collect()
    }

    fn player_level(&self) -> u32 {
        self.player_level
    }

    fn current_money(&self, target: &str) -> OracleResult<f64> {
        Ok(self.settled().target(target)?.money)
    }

    fn max_money(&self, target: &str) -> OracleResult<f64> {
        Ok(self.lock().target(target)?.max_money)
    }

    fn current_security(&self, target: &str) -> OracleResult<f64> {
        Ok(self.settled().target(target)?.security)
    }

    fn min_security(&self, target: &str) -> OracleResult<f64> {
        Ok(self.lock().target(target)?.min_security)
    }

    fn required_level(&self, target: &str) -> OracleResult<u32> {
        Ok(self.lock().target(target)?.required_level)
    }

    fn action_duration(&self, kind: ActionKind, target: &str) -> OracleResult<f64> {
        Ok(self.settled().target(target)?.duration(kind))
    }

    fn extraction_fraction_per_thread(&self, target: &str) -> OracleResult<f64> {
        Ok(self.lock().target(target)?.fraction_per_thread)
    }

    fn success_chance(&self, target: &str) -> OracleResult<f64> {
        Ok(self.lock().target(target)?.chance)
    }

    fn growth_threads_needed(&self, target: &str, current: f64, goal: f64) -> OracleResult<u32> {
        let state = self.lock();
        let t = state.target(target)?;
        let current = current.max(1.0);
        if goal <= current {
            return Ok(0);
        }
        let threads = (goal / current).ln() / t.growth_per_thread.ln();
        Ok(threads.ceil() as u32)
    }
}

impl Executor for SimCluster {
    fn dispatch(
        &self,
        node: &str,
        kind: ActionKind,
        threads: u32,
        target: &str,
        delay_ms: Millis,
    ) -> Result<ActionHandle, DispatchError> {
        let now = self.clock.now_ms();
        let mut state = self.settled();

        let Some(sim_node) = state.nodes.get(node) else {
            return Err(DispatchError::NodeUnavailable(node.to_string()));
        };
        if !sim_node.access {
            return Err(DispatchError::NodeUnavailable(node.to_string()));
        }
        if state.failing.contains(node) {
            return Err(DispatchError::Rejected(format!("injected failure on {node}")));
        }

        let cost = self.cost(kind);
        let needed = cost * f64::from(threads);
        let free = sim_node.capacity - sim_node.background_used - state.used_by_actions(node);
        if needed > free + 1e-9 {
            return Err(DispatchError::InsufficientCapacity {
                node: node.to_string(),
                needed,
                free,
            });
        }

        let Some(sim_target) = state.targets.get(target) else {
            return Err(DispatchError::Rejected(format!("unknown target {target}")));
        };
        let start_at = now + delay_ms;
        let end_at = (!self.duration_at_start)
            .then(|| start_at + sim_target.duration(kind).ceil() as Millis);

        state.next_pid += 1;
        let handle = ActionHandle {
            node: node.to_string(),
            pid: state.next_pid,
        };
        state.actions.push(SimAction {
            handle: handle.clone(),
            kind,
            target: target.to_string(),
            threads,
            cost,
            start_at,
            end_at,
        });

        debug!(%node, %kind, threads, %target, delay_ms, pid = handle.pid, "simulated dispatch");
        Ok(handle)
    }

    fn cancel(&self, handle: &ActionHandle) -> bool {
        let mut state = self.settled();
        let before = state.actions.len();
        state.actions.retain(|a| &a.handle != handle);
        state.actions.len() != before
    }

    fn running(&self, node: &str) -> Vec<RunningAction> {
        self.settled()
            .actions
            .iter()
            .filter(|a| a.handle.node == node)
            .map(to_running)
            .collect()
    }
}
