//! Skip counters and status snapshots.
//!
//! Per-target failures never surface as errors. Each one lands in a
//! counter keyed by [`SkipReason`]; counters and cycle totals are cleared
//! at every refresh.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use batchgrid_core::{Millis, TargetId};
use batchgrid_state::{Mode, TargetState};

use crate::error::SchedulerError;

/// Why a target got no dispatch on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    PrepWait,
    Cooldown,
    TargetCap,
    /// Aggregate free capacity below one batch.
    Capacity,
    PlanFail,
    ExecBudget,
    ExecFail,
    DriftReset,
    Oracle,
    NoTargets,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::PrepWait => "prep_wait",
            SkipReason::Cooldown => "cooldown",
            SkipReason::TargetCap => "target_cap",
            SkipReason::Capacity => "capacity",
            SkipReason::PlanFail => "plan_fail",
            SkipReason::ExecBudget => "exec_budget",
            SkipReason::ExecFail => "exec_fail",
            SkipReason::DriftReset => "drift_reset",
            SkipReason::Oracle => "oracle",
            SkipReason::NoTargets => "no_targets",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&SchedulerError> for SkipReason {
    fn from(err: &SchedulerError) -> Self {
        match err {
            SchedulerError::Allocation(_) => SkipReason::PlanFail,
            SchedulerError::ExecBudget { .. } => SkipReason::ExecBudget,
            SchedulerError::RolledBack { .. } => SkipReason::ExecFail,
            SchedulerError::Oracle(_) => SkipReason::Oracle,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounters {
    counts: BTreeMap<SkipReason, u64>,
}

impl SkipCounters {
    pub fn record(&mut self, reason: SkipReason) {
        *self.counts.entry(reason).or_default() += 1;
    }

    pub fn get(&self, reason: SkipReason) -> u64 {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (SkipReason, u64)> + '_ {
        self.counts.iter().map(|(r, n)| (*r, *n))
    }

    /// Compact `reason=count` rendering for log lines.
    pub fn summary(&self) -> String {
        if self.counts.is_empty() {
            return "none".to_string();
        }
        self.iter()
            .map(|(r, n)| format!("{r}={n}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Totals for the current refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleTotals {
    pub exec_calls: u64,
    pub batches: u64,
    pub prep_launches: u64,
    pub drift_resets: u64,
}

/// Point-in-time view of one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub target: TargetId,
    pub mode: Mode,
    pub inflight: usize,
    pub total_batches: u64,
    pub drift_streak: u32,
    pub ema_money_ratio: f64,
    pub ema_security_delta: f64,
    /// Live money / goal, when the oracle answered.
    pub money_ratio: Option<f64>,
    /// Live security above the floor, when the oracle answered.
    pub security_delta: Option<f64>,
    /// Milliseconds until the next pipeline's hack lands.
    pub anchor_in_ms: Option<Millis>,
    pub prep_wait_ms: Millis,
    pub cooldown_ms: Millis,
}

impl TargetStatus {
    pub fn from_state(target: &str, state: &TargetState, now: Millis) -> Self {
        Self {
            target: target.to_string(),
            mode: state.mode,
            inflight: state.inflight(),
            total_batches: state.total_batches,
            drift_streak: state.drift_streak,
            ema_money_ratio: state.ema_money_ratio,
            ema_security_delta: state.ema_security_delta,
            money_ratio: None,
            security_delta: None,
            anchor_in_ms: state.anchor_end.map(|a| a.saturating_sub(now)),
            prep_wait_ms: state.prep_until.saturating_sub(now),
            cooldown_ms: state.cooldown_until.saturating_sub(now),
        }
    }
}

/// Whole-scheduler snapshot, as logged periodically and printed by `batchd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub now: Millis,
    pub nodes: usize,
    pub free_capacity: f64,
    pub cycle: CycleTotals,
    pub skips: SkipCounters,
    pub targets: Vec<TargetStatus>,
}
