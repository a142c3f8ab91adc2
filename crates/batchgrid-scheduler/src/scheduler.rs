//! Tick scheduler: the control loop.
//!
//! Every tick:
//! 1. Refresh nodes and targets if the refresh interval has passed
//! 2. Forget batches whose expected completion has passed
//! 3. For each target, in selection order, until a tick budget runs out:
//!    cooldown gate → drift check → per-target cap → prep or batch
//! 4. Emit the periodic status log
//!
//! All decisions inside a tick are synchronous. Nothing a single target
//! does can stop the loop; failures become skip counters.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use batchgrid_core::{BatchConfig, Clock, ConfigError, Millis, TargetId};
use batchgrid_oracle::{Environment, NodeRegistry, TargetSnapshot};
use batchgrid_placement::allocate;
use batchgrid_state::{Mode, TargetState, TargetStateStore};

use crate::dispatcher::{cancel_target, execute};
use crate::drift::{DriftDetector, DriftVerdict};
use crate::error::{SchedulerError, SchedulerResult};
use crate::machine::{BatchSizing, BatchTiming, PrepStep, batch_tasks, lead_time};
use crate::stats::{CycleTotals, SchedulerStatus, SkipCounters, SkipReason, TargetStatus};
use crate::targets::select_targets;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub now: Millis,
    pub refreshed: bool,
    pub batches: u32,
    pub prep_launches: u32,
    pub exec_calls: u32,
    pub drift_resets: u32,
    /// Targets that switched from prep to batch.
    pub ready: Vec<TargetId>,
    pub skips: Vec<(TargetId, SkipReason)>,
}

impl TickReport {
    fn new(now: Millis) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    pub fn skipped(&self, target: &str) -> Option<SkipReason> {
        self.skips
            .iter()
            .find(|(t, _)| t == target)
            .map(|(_, reason)| *reason)
    }
}

/// Result of one target's decision.
#[derive(Debug)]
enum Outcome {
    Batch { calls: usize },
    Prep { calls: usize },
    Ready,
    DriftReset,
    Skipped(SkipReason),
}

/// Remaining per-tick budgets. `None` is unlimited.
#[derive(Debug, Clone, Copy)]
struct TickBudget {
    launches: Option<u32>,
    exec: Option<usize>,
}

impl TickBudget {
    fn new(config: &BatchConfig) -> Self {
        Self {
            launches: config.launch_budget(),
            exec: config.exec_budget().map(|n| n as usize),
        }
    }

    fn exhausted(&self) -> bool {
        self.launches == Some(0) || self.exec == Some(0)
    }

    fn check_exec(&self, needed: usize) -> SchedulerResult<()> {
        match self.exec {
            Some(remaining) if needed > remaining => {
                Err(SchedulerError::ExecBudget { needed, remaining })
            }
            _ => Ok(()),
        }
    }

    fn spend(&mut self, calls: usize, batch: bool) {
        if let Some(exec) = self.exec.as_mut() {
            *exec = exec.saturating_sub(calls);
        }
        if batch && let Some(launches) = self.launches.as_mut() {
            *launches = launches.saturating_sub(1);
        }
    }
}

/// Drives every selected target through prep and batching.
pub struct Scheduler<E: Environment> {
    env: E,
    config: BatchConfig,
    registry: NodeRegistry,
    states: TargetStateStore,
    targets: Vec<TargetId>,
    /// Targets whose oracle queries failed since the last refresh.
    failed: HashSet<TargetId>,
    drift: DriftDetector,
    skips: SkipCounters,
    cycle: CycleTotals,
    last_refresh: Option<Millis>,
    last_log: Option<Millis>,
}

impl<E: Environment> Scheduler<E> {
    /// Validate `config` and build an idle scheduler. Nothing is queried
    /// until the first tick.
    pub fn new(env: E, config: BatchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            drift: DriftDetector::new(&config),
            env,
            config,
            registry: NodeRegistry::new(),
            states: TargetStateStore::new(),
            targets: Vec::new(),
            failed: HashSet::new(),
            skips: SkipCounters::default(),
            cycle: CycleTotals::default(),
            last_refresh: None,
            last_log: None,
        })
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Targets selected at the last refresh, best first.
    pub fn targets(&self) -> &[TargetId] {
        &self.targets
    }

    pub fn state(&self, target: &str) -> Option<&TargetState> {
        self.states.get(target)
    }

    pub fn skips(&self) -> &SkipCounters {
        &self.skips
    }

    pub fn cycle(&self) -> CycleTotals {
        self.cycle
    }

    /// Run one scheduling pass at time `now`.
    pub fn tick(&mut self, now: Millis) -> TickReport {
        let mut report = TickReport::new(now);

        if self.refresh_due(now) {
            self.refresh(now);
            report.refreshed = true;
        }

        if self.targets.is_empty() {
            self.skips.record(SkipReason::NoTargets);
            self.maybe_log(now);
            return report;
        }

        for target in &self.targets {
            if let Some(state) = self.states.get_mut(target) {
                state.prune_inflight(now);
            }
        }

        let mut budget = TickBudget::new(&self.config);
        let targets = self.targets.clone();

        for target in targets {
            if budget.exhausted() {
                debug!(%target, "tick budget exhausted");
                break;
            }
            if self.failed.contains(&target) {
                continue;
            }

            match self.step_target(&target, now, &budget) {
                Outcome::Batch { calls } => {
                    budget.spend(calls, true);
                    report.batches += 1;
                    report.exec_calls += calls as u32;
                    self.cycle.batches += 1;
                    self.cycle.exec_calls += calls as u64;
                }
                Outcome::Prep { calls } => {
                    budget.spend(calls, false);
                    report.prep_launches += 1;
                    report.exec_calls += calls as u32;
                    self.cycle.prep_launches += 1;
                    self.cycle.exec_calls += calls as u64;
                }
                Outcome::Ready => report.ready.push(target),
                Outcome::DriftReset => {
                    report.drift_resets += 1;
                    self.cycle.drift_resets += 1;
                    self.skips.record(SkipReason::DriftReset);
                    report.skips.push((target, SkipReason::DriftReset));
                }
                Outcome::Skipped(reason) => {
                    if reason == SkipReason::Oracle {
                        self.failed.insert(target.clone());
                    }
                    self.skips.record(reason);
                    report.skips.push((target, reason));
                }
            }
        }

        self.maybe_log(now);
        report
    }

    /// Tick every `tick_ms` until `shutdown` flips.
    pub async fn run(&mut self, clock: &dyn Clock, mut shutdown: watch::Receiver<bool>) {
        let tick = Duration::from_millis(self.config.tick_ms());
        info!(
            tick_ms = self.config.tick_ms(),
            refresh_ms = self.config.timing.refresh_ms,
            "scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick(clock.now_ms());

            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = shutdown.changed() => {
                    break;
                }
            }
        }
        info!("scheduler shutting down");
    }

    /// Snapshot of every active target plus the cycle counters.
    pub fn status(&self, now: Millis) -> SchedulerStatus {
        let targets = self
            .targets
            .iter()
            .filter_map(|target| {
                let state = self.states.get(target)?;
                let mut status = TargetStatus::from_state(target, state, now);
                if let Ok(snap) = TargetSnapshot::read(&self.env, target, &self.config) {
                    status.money_ratio = Some(snap.money_ratio());
                    status.security_delta = Some(snap.security_delta());
                }
                Some(status)
            })
            .collect();

        SchedulerStatus {
            now,
            nodes: self.registry.len(),
            free_capacity: self.registry.total_free(&self.env),
            cycle: self.cycle,
            skips: self.skips.clone(),
            targets,
        }
    }

    fn refresh_due(&self, now: Millis) -> bool {
        self.last_refresh
            .is_none_or(|last| now.saturating_sub(last) >= self.config.timing.refresh_ms)
    }

    /// Rebuild the node pool and target set; reset cycle counters.
    fn refresh(&mut self, now: Millis) {
        self.registry.refresh(&self.env, &self.config);
        self.targets = select_targets(&self.env, &self.config);

        for dropped in self.states.retain_active(&self.targets) {
            warn!(target = %dropped, "target dropped from active set");
        }

        self.failed.clear();
        self.skips.clear();
        self.cycle = CycleTotals::default();
        self.last_refresh = Some(now);

        info!(
            nodes = self.registry.len(),
            targets = ?self.targets,
            "refreshed nodes and targets"
        );
    }

    fn step_target(&mut self, target: &str, now: Millis, budget: &TickBudget) -> Outcome {
        let env = &self.env;
        let config = &self.config;
        let registry = &self.registry;
        let drift = &self.drift;
        let state = self.states.get_or_create(target);

        let snap = match TargetSnapshot::read(env, target, config) {
            Ok(snap) => snap,
            Err(e) => {
                warn!(%target, error = %e, "target query failed");
                return Outcome::Skipped(SkipReason::Oracle);
            }
        };

        if state.in_cooldown(now) {
            return Outcome::Skipped(SkipReason::Cooldown);
        }

        if drift.observe(state, snap.money_ratio(), snap.security_delta()) == DriftVerdict::Reset {
            let cancelled = cancel_target(env, registry.node_ids(), target);
            let weaken = snap.durations.weaken;
            let hold = hold_ms(config.drift.prep_hold_cap_ms, config.drift.prep_hold_weaken_fraction, weaken);
            let cooldown = hold_ms(config.drift.cooldown_cap_ms, config.drift.cooldown_weaken_fraction, weaken);
            state.reset_for_drift(now + hold, now + cooldown);
            warn!(
                %target,
                cancelled,
                prep_hold_ms = hold,
                cooldown_ms = cooldown,
                "drift reset, back to prep"
            );
            return Outcome::DriftReset;
        }

        if state.inflight() >= config.limits.per_target_cap.max(1) as usize {
            return Outcome::Skipped(SkipReason::TargetCap);
        }

        match state.mode {
            Mode::Prep => {
                if now < state.prep_until {
                    return Outcome::Skipped(SkipReason::PrepWait);
                }
                match prep(env, config, registry, state, &snap, now, budget) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        state.prep_until = now + config.timing.prep_retry_ms;
                        debug!(%target, error = %e, "prep skipped");
                        Outcome::Skipped(SkipReason::from(&e))
                    }
                }
            }
            Mode::Batch => match batch(env, config, registry, state, &snap, now, budget) {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!(%target, error = %e, "batch skipped");
                    Outcome::Skipped(SkipReason::from(&e))
                }
            },
        }
    }

    fn maybe_log(&mut self, now: Millis) {
        if self.config.logging.quiet {
            return;
        }
        let due = self
            .last_log
            .is_none_or(|last| now.saturating_sub(last) >= self.config.logging.log_every_ms);
        if !due {
            return;
        }
        self.last_log = Some(now);

        let status = self.status(now);
        let inflight: usize = status.targets.iter().map(|t| t.inflight).sum();
        info!(
            targets = status.targets.len(),
            nodes = status.nodes,
            free_capacity = status.free_capacity,
            inflight,
            batches = status.cycle.batches,
            exec_calls = status.cycle.exec_calls,
            skips = %status.skips.summary(),
            "scheduler status"
        );
        for t in &status.targets {
            debug!(
                target = %t.target,
                mode = t.mode.as_str(),
                inflight = t.inflight,
                money_pct = t.money_ratio.map(|r| r * 100.0),
                security_delta = t.security_delta,
                ema_money_ratio = t.ema_money_ratio,
                ema_security_delta = t.ema_security_delta,
                drift = t.drift_streak,
                confirm = self.config.drift.confirm,
                anchor_in_ms = t.anchor_in_ms,
                prep_wait_ms = t.prep_wait_ms,
                "target status"
            );
        }
    }
}

/// `min(cap, weaken_ms × fraction)`, floored.
fn hold_ms(cap: Millis, fraction: f64, weaken_ms: f64) -> Millis {
    let scaled = (weaken_ms * fraction).max(0.0).floor() as Millis;
    scaled.min(cap)
}

fn prep<E: Environment>(
    env: &E,
    config: &BatchConfig,
    registry: &NodeRegistry,
    state: &mut TargetState,
    snap: &TargetSnapshot,
    now: Millis,
    budget: &TickBudget,
) -> SchedulerResult<Outcome> {
    let step = PrepStep::decide(snap, config, env)?;
    if step == PrepStep::Ready {
        state.enter_batch(snap.money_ratio(), snap.security_delta());
        info!(
            target = %snap.target,
            money_ratio = snap.money_ratio(),
            security_delta = snap.security_delta(),
            "target ready, switching to batch"
        );
        return Ok(Outcome::Ready);
    }

    let tasks = step.tasks(&snap.target, config);
    let plan = allocate(&tasks, &registry.capacity_snapshot(env))?;
    budget.check_exec(plan.len())?;
    execute(env, &plan)?;

    let run_time = step.run_time(&snap.durations).ceil() as Millis;
    state.prep_until = now + run_time + config.timing.prep_settle_ms;
    debug!(
        target = %snap.target,
        step = ?step,
        calls = plan.len(),
        prep_until = state.prep_until,
        "prep dispatched"
    );
    Ok(Outcome::Prep { calls: plan.len() })
}

fn batch<E: Environment>(
    env: &E,
    config: &BatchConfig,
    registry: &NodeRegistry,
    state: &mut TargetState,
    snap: &TargetSnapshot,
    now: Millis,
    budget: &TickBudget,
) -> SchedulerResult<Outcome> {
    let sizing = BatchSizing::compute(snap, config, env)?;

    let demand = sizing.demand(config);
    let free = registry.total_free(env);
    if free < demand {
        debug!(target = %snap.target, demand, free, "not enough free capacity for a batch");
        return Ok(Outcome::Skipped(SkipReason::Capacity));
    }

    let gap = config.gap_ms();
    let lead = lead_time(&snap.durations, gap, config.timing.lead_margin_ms);
    let anchor = state.ensure_anchor(now, lead);
    let timing = BatchTiming::compute(now, anchor, &snap.durations, gap);

    let tasks = batch_tasks(&snap.target, &sizing, &timing, config);
    let plan = allocate(&tasks, &registry.capacity_snapshot(env))?;
    budget.check_exec(plan.len())?;
    execute(env, &plan)?;

    state.record_launch(
        timing.weaken_grow_end + config.timing.inflight_slack_ms,
        config.interval_ms(),
    );
    debug!(
        target = %snap.target,
        hack = sizing.hack,
        grow = sizing.grow,
        weaken_hack = sizing.weaken_hack,
        weaken_grow = sizing.weaken_grow,
        anchor,
        calls = plan.len(),
        inflight = state.inflight(),
        "batch dispatched"
    );
    Ok(Outcome::Batch { calls: plan.len() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchgrid_core::{ActionKind, ManualClock};
    use batchgrid_oracle::{SimCluster, SimNode, SimTarget};

    fn sim(clock: &ManualClock) -> SimCluster {
        let sim = SimCluster::new(clock.clone(), &BatchConfig::default());
        sim.add_node(SimNode::new("home", 2_048.0));
        sim
    }

    fn ready_target(id: &str) -> SimTarget {
        SimTarget::new(id, 1e9, 5.0)
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let clock = ManualClock::new(0);
        let mut config = BatchConfig::default();
        config.capacity.hack_cost = 0.0;
        assert!(Scheduler::new(sim(&clock), config).is_err());
    }

    #[test]
    fn no_targets_counts_and_does_nothing() {
        let clock = ManualClock::new(0);
        let mut scheduler = Scheduler::new(sim(&clock), BatchConfig::default()).unwrap();

        let report = scheduler.tick(0);
        assert!(report.refreshed);
        assert_eq!(report.exec_calls, 0);
        assert_eq!(scheduler.skips().get(SkipReason::NoTargets), 1);
    }

    #[test]
    fn ready_target_switches_then_batches() {
        let clock = ManualClock::new(0);
        let env = sim(&clock);
        env.add_target(ready_target("joesguns"));
        let mut scheduler = Scheduler::new(env, BatchConfig::default()).unwrap();

        let first = scheduler.tick(0);
        assert_eq!(first.ready, vec!["joesguns".to_string()]);
        assert_eq!(first.exec_calls, 0);

        clock.set(200);
        let second = scheduler.tick(200);
        assert_eq!(second.batches, 1);

        let state = scheduler.state("joesguns").unwrap();
        assert_eq!(state.mode, Mode::Batch);
        assert_eq!(state.inflight(), 1);
        assert_eq!(state.total_batches, 1);
        // Lead 4000 from now, then one interval on.
        assert_eq!(state.anchor_end, Some(200 + 4_000 + 450));
        assert_eq!(state.inflight_ends[0], 200 + 4_000 + 600 + 50);
    }

    #[test]
    fn high_security_preps_with_weaken_only() {
        let clock = ManualClock::new(0);
        let env = sim(&clock);
        let mut target = ready_target("joesguns");
        target.security = 10.0;
        target.money = 5e8;
        env.add_target(target);
        let mut scheduler = Scheduler::new(env, BatchConfig::default()).unwrap();

        let report = scheduler.tick(0);
        assert_eq!(report.prep_launches, 1);
        let running = scheduler.env().running_actions();
        assert!(running.iter().all(|a| a.kind == ActionKind::Weaken));
        assert_eq!(running.iter().map(|a| a.threads).sum::<u32>(), 100);

        // Weaken at security 10 takes 8000 ms, plus the settle margin.
        let state = scheduler.state("joesguns").unwrap();
        assert_eq!(state.prep_until, 8_000 + 250);

        clock.set(200);
        assert_eq!(scheduler.tick(200).skipped("joesguns"), Some(SkipReason::PrepWait));
    }

    #[test]
    fn prep_failure_backs_off() {
        let clock = ManualClock::new(0);
        let env = sim(&clock);
        let mut target = ready_target("joesguns");
        target.money = 1e8;
        env.add_target(target);
        env.fail_dispatch_on("home");
        let mut scheduler = Scheduler::new(env, BatchConfig::default()).unwrap();

        let report = scheduler.tick(0);
        assert_eq!(report.skipped("joesguns"), Some(SkipReason::ExecFail));
        assert_eq!(scheduler.state("joesguns").unwrap().prep_until, 500);
        assert_eq!(scheduler.env().running_count(), 0);
    }

    #[test]
    fn launch_budget_limits_batches_per_tick() {
        let clock = ManualClock::new(0);
        let env = sim(&clock);
        env.add_target(ready_target("alpha"));
        env.add_target(ready_target("beta"));
        let mut config = BatchConfig::default();
        config.limits.max_launch_per_tick = 1;
        let mut scheduler = Scheduler::new(env, config).unwrap();

        scheduler.tick(0);
        let report = scheduler.tick(200);
        assert_eq!(report.batches, 1);
        assert!(report.skips.is_empty());
    }

    #[test]
    fn exec_budget_skips_oversized_plan() {
        let clock = ManualClock::new(0);
        let env = sim(&clock);
        env.add_target(ready_target("joesguns"));
        let mut config = BatchConfig::default();
        config.limits.max_exec_per_tick = 3;
        let mut scheduler = Scheduler::new(env, config).unwrap();

        scheduler.tick(0);
        let report = scheduler.tick(200);
        assert_eq!(report.skipped("joesguns"), Some(SkipReason::ExecBudget));
        assert_eq!(scheduler.env().running_count(), 0);
    }

    #[test]
    fn tiny_pool_fails_capacity_precheck() {
        let clock = ManualClock::new(0);
        let env = SimCluster::new(clock.clone(), &BatchConfig::default());
        env.add_node(SimNode::new("home", 40.0));
        env.add_target(ready_target("joesguns"));
        let mut scheduler = Scheduler::new(env, BatchConfig::default()).unwrap();

        scheduler.tick(0);
        let report = scheduler.tick(200);
        assert_eq!(report.skipped("joesguns"), Some(SkipReason::Capacity));
    }

    #[test]
    fn per_target_cap_stops_new_batches() {
        let clock = ManualClock::new(0);
        let env = sim(&clock);
        env.add_target(ready_target("joesguns"));
        let mut config = BatchConfig::default();
        config.limits.per_target_cap = 2;
        let mut scheduler = Scheduler::new(env, config).unwrap();

        scheduler.tick(0);
        for now in [200, 400] {
            clock.set(now);
            assert_eq!(scheduler.tick(now).batches, 1);
        }
        clock.set(600);
        assert_eq!(scheduler.tick(600).skipped("joesguns"), Some(SkipReason::TargetCap));
    }

    #[test]
    fn vanished_target_is_parked_until_refresh() {
        let clock = ManualClock::new(0);
        let env = sim(&clock);
        env.add_target(ready_target("joesguns"));
        let mut scheduler = Scheduler::new(env, BatchConfig::default()).unwrap();

        scheduler.tick(0);
        scheduler.env().remove_target("joesguns");

        assert_eq!(scheduler.tick(200).skipped("joesguns"), Some(SkipReason::Oracle));
        assert_eq!(scheduler.tick(400).skipped("joesguns"), None);

        let report = scheduler.tick(15_000);
        assert!(report.refreshed);
        assert!(scheduler.targets().is_empty());
        assert!(scheduler.state("joesguns").is_none());
    }

    #[test]
    fn status_reports_live_values() {
        let clock = ManualClock::new(0);
        let env = sim(&clock);
        let mut target = ready_target("joesguns");
        target.money = 5e8;
        env.add_target(target);
        let mut scheduler = Scheduler::new(env, BatchConfig::default()).unwrap();
        scheduler.tick(0);

        let status = scheduler.status(0);
        assert_eq!(status.nodes, 1);
        assert_eq!(status.targets.len(), 1);
        let t = &status.targets[0];
        assert_eq!(t.mode, Mode::Prep);
        assert!((t.money_ratio.unwrap() - 0.5).abs() < 1e-9);
        assert!(status.free_capacity < 2_048.0 - 32.0);
    }

    #[test]
    fn hold_is_capped() {
        assert_eq!(hold_ms(2_000, 0.25, 4_000.0), 1_000);
        assert_eq!(hold_ms(2_000, 0.25, 40_000.0), 2_000);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let clock = ManualClock::new(0);
        let env = sim(&clock);
        env.add_target(ready_target("joesguns"));
        let mut config = BatchConfig::default();
        config.timing.tick_ms = 50;
        let mut scheduler = Scheduler::new(env, config).unwrap();

        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = tx.send(true);
        });

        scheduler.run(&clock, rx).await;
        stopper.await.unwrap();

        // The first tick switched the target to batch; later ticks batched.
        let state = scheduler.state("joesguns").unwrap();
        assert_eq!(state.mode, Mode::Batch);
        assert!(state.total_batches >= 1);
    }
}
