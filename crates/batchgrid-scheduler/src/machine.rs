//! Per-target decisions: what to request in prep, how to size and time a
//! batch.
//!
//! A batch is four actions that must *complete* in the order
//! hack → weaken₁ → grow → weaken₂, each `gap` ms after the previous one.
//! There is no completion signal from the substrate, so ordering rests
//! entirely on start delays computed backward from a shared anchor using
//! durations queried at dispatch time.

use batchgrid_core::{ActionKind, BatchConfig, Millis, Task};
use batchgrid_oracle::{Durations, OracleResult, TargetOracle, TargetSnapshot};

/// Upper bound on the money fraction a single batch may take.
const MAX_REALIZED_FRACTION: f64 = 0.95;
/// Lower bound on the per-thread weaken effect.
const MIN_WEAKEN_PER_THREAD: f64 = 1e-6;
/// Absorbs float noise in ratios that should be whole, e.g. 0.08 / 0.01.
const THREAD_EPSILON: f64 = 1e-9;

fn ceil_threads(x: f64) -> u32 {
    (x - THREAD_EPSILON).max(0.0).ceil() as u32
}

/// Weaken threads that cancel `security_increase`. Always at least one.
pub fn weaken_threads_for(oracle: &impl TargetOracle, security_increase: f64) -> u32 {
    let per_thread = oracle
        .security_delta_per_thread(ActionKind::Weaken)
        .max(MIN_WEAKEN_PER_THREAD);
    ceil_threads(security_increase / per_thread).max(1)
}

/// Grow threads that lift money from `start` to `goal`; zero if already there.
pub fn grow_threads_for(
    oracle: &impl TargetOracle,
    target: &str,
    start: f64,
    goal: f64,
) -> OracleResult<u32> {
    let start = start.max(1.0);
    let goal = goal.max(1.0);
    if goal <= start {
        return Ok(0);
    }
    Ok(oracle.growth_threads_needed(target, start, goal)?.max(1))
}

// ── Prep ────────────────────────────────────────────────────────────

/// What a prep-mode target needs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepStep {
    /// Within tolerance on both axes: switch to batching.
    Ready,
    /// Security too high: weaken only.
    Weaken { threads: u32 },
    /// Security fine, money short: grow plus the weaken that offsets it.
    GrowWeaken { grow: u32, weaken: u32 },
}

impl PrepStep {
    pub fn decide(
        snapshot: &TargetSnapshot,
        config: &BatchConfig,
        oracle: &impl TargetOracle,
    ) -> OracleResult<Self> {
        let need_security =
            snapshot.security > snapshot.min_security + config.strategy.prep_security_tolerance;
        let need_money =
            snapshot.money < snapshot.money_goal * config.strategy.prep_money_fraction;

        if need_security {
            return Ok(PrepStep::Weaken {
                threads: weaken_threads_for(oracle, snapshot.security_delta()),
            });
        }
        if !need_money {
            return Ok(PrepStep::Ready);
        }

        let grow = grow_threads_for(
            oracle,
            &snapshot.target,
            snapshot.money,
            snapshot.money_goal,
        )?;
        let grow_security = f64::from(grow) * oracle.security_delta_per_thread(ActionKind::Grow);
        let weaken = weaken_threads_for(oracle, snapshot.security_delta().max(0.0) + grow_security);
        Ok(PrepStep::GrowWeaken { grow, weaken })
    }

    /// Tasks to dispatch for this step, all starting immediately.
    pub fn tasks(&self, target: &str, config: &BatchConfig) -> Vec<Task> {
        let task = |kind, threads| Task::new(kind, threads, target, 0, config.cost_for(kind));
        match *self {
            PrepStep::Ready => Vec::new(),
            PrepStep::Weaken { threads } => vec![task(ActionKind::Weaken, threads)],
            PrepStep::GrowWeaken { grow, weaken } => vec![
                task(ActionKind::Grow, grow),
                task(ActionKind::Weaken, weaken),
            ],
        }
    }

    /// How long the dispatched step runs before the target can be re-read.
    pub fn run_time(&self, durations: &Durations) -> f64 {
        match self {
            PrepStep::Ready => 0.0,
            PrepStep::Weaken { .. } => durations.weaken,
            PrepStep::GrowWeaken { .. } => durations.grow.max(durations.weaken),
        }
    }
}

// ── Batch sizing ────────────────────────────────────────────────────

/// Thread counts for one pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSizing {
    pub hack: u32,
    pub grow: u32,
    /// Cancels the security added by `hack`.
    pub weaken_hack: u32,
    /// Cancels the security added by `grow`.
    pub weaken_grow: u32,
    /// Fraction the rounded hack thread count actually takes.
    pub realized_fraction: f64,
}

impl BatchSizing {
    pub fn compute(
        snapshot: &TargetSnapshot,
        config: &BatchConfig,
        oracle: &impl TargetOracle,
    ) -> OracleResult<Self> {
        let per_thread = snapshot.fraction_per_thread;
        let desired = config.desired_hack_fraction();
        let hack = ceil_threads(desired / per_thread).max(1);
        let realized_fraction = (f64::from(hack) * per_thread).min(MAX_REALIZED_FRACTION);

        let money_after_hack = (snapshot.money_goal * (1.0 - realized_fraction)).max(1.0);
        let grow = grow_threads_for(
            oracle,
            &snapshot.target,
            money_after_hack,
            snapshot.money_goal,
        )?;

        let hack_security = f64::from(hack) * oracle.security_delta_per_thread(ActionKind::Hack);
        let grow_security = f64::from(grow) * oracle.security_delta_per_thread(ActionKind::Grow);

        Ok(Self {
            hack,
            grow,
            weaken_hack: weaken_threads_for(oracle, hack_security),
            weaken_grow: weaken_threads_for(oracle, grow_security),
            realized_fraction,
        })
    }

    /// Capacity one pipeline occupies.
    pub fn demand(&self, config: &BatchConfig) -> f64 {
        f64::from(self.hack) * config.cost_for(ActionKind::Hack)
            + f64::from(self.grow) * config.cost_for(ActionKind::Grow)
            + f64::from(self.weaken_hack + self.weaken_grow) * config.cost_for(ActionKind::Weaken)
    }
}

// ── Batch timing ────────────────────────────────────────────────────

/// Minimum time from now until the hack step can complete such that every
/// step's start delay is non-negative.
pub fn lead_time(durations: &Durations, gap: Millis, margin: Millis) -> Millis {
    let gap = gap as f64;
    let needed = durations
        .hack
        .max(durations.weaken - gap)
        .max(durations.grow - 2.0 * gap)
        .max(durations.weaken - 3.0 * gap);
    needed.max(0.0).ceil() as Millis + margin
}

/// Completion targets and start delays for one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchTiming {
    pub hack_end: Millis,
    pub weaken_hack_end: Millis,
    pub grow_end: Millis,
    pub weaken_grow_end: Millis,
    pub hack_delay: Millis,
    pub weaken_hack_delay: Millis,
    pub grow_delay: Millis,
    pub weaken_grow_delay: Millis,
}

impl BatchTiming {
    /// Lay the four completions out after `anchor` and derive start delays.
    pub fn compute(now: Millis, anchor: Millis, durations: &Durations, gap: Millis) -> Self {
        let hack_end = anchor;
        let weaken_hack_end = anchor + gap;
        let grow_end = anchor + 2 * gap;
        let weaken_grow_end = anchor + 3 * gap;

        let delay = |end: Millis, duration: f64| -> Millis {
            (end as f64 - now as f64 - duration).max(0.0).floor() as Millis
        };

        Self {
            hack_end,
            weaken_hack_end,
            grow_end,
            weaken_grow_end,
            hack_delay: delay(hack_end, durations.hack),
            weaken_hack_delay: delay(weaken_hack_end, durations.weaken),
            grow_delay: delay(grow_end, durations.grow),
            weaken_grow_delay: delay(weaken_grow_end, durations.weaken),
        }
    }
}

/// The four tasks of one pipeline.
pub fn batch_tasks(
    target: &str,
    sizing: &BatchSizing,
    timing: &BatchTiming,
    config: &BatchConfig,
) -> Vec<Task> {
    let task = |kind, threads, delay| Task::new(kind, threads, target, delay, config.cost_for(kind));
    vec![
        task(ActionKind::Weaken, sizing.weaken_hack, timing.weaken_hack_delay),
        task(ActionKind::Hack, sizing.hack, timing.hack_delay),
        task(ActionKind::Grow, sizing.grow, timing.grow_delay),
        task(ActionKind::Weaken, sizing.weaken_grow, timing.weaken_grow_delay),
    ]
}
