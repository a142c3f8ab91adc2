//! Point-in-time view of a target.
//!
//! Durations and thresholds depend on the target's current money and
//! security, so they are re-read at every decision and never cached
//! across ticks.

use batchgrid_core::{ActionKind, BatchConfig};

use crate::error::OracleResult;
use crate::interface::TargetOracle;

/// Lower bound for any queried duration (ms).
const MIN_DURATION_MS: f64 = 1.0;
/// Lower bound for the per-thread extraction fraction.
const MIN_FRACTION_PER_THREAD: f64 = 1e-7;

/// Action durations in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Durations {
    pub hack: f64,
    pub grow: f64,
    pub weaken: f64,
}

impl Durations {
    pub fn read(oracle: &impl TargetOracle, target: &str) -> OracleResult<Self> {
        Ok(Self {
            hack: oracle
                .action_duration(ActionKind::Hack, target)?
                .max(MIN_DURATION_MS),
            grow: oracle
                .action_duration(ActionKind::Grow, target)?
                .max(MIN_DURATION_MS),
            weaken: oracle
                .action_duration(ActionKind::Weaken, target)?
                .max(MIN_DURATION_MS),
        })
    }

    pub fn of(&self, kind: ActionKind) -> f64 {
        match kind {
            ActionKind::Hack => self.hack,
            ActionKind::Grow => self.grow,
            ActionKind::Weaken => self.weaken,
        }
    }
}

/// Everything a single decision needs to know about one target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSnapshot {
    pub target: String,
    pub money: f64,
    pub max_money: f64,
    /// Money level prep drives towards (`max_money × money_prep`).
    pub money_goal: f64,
    pub security: f64,
    /// Minimum security plus the configured buffer.
    pub min_security: f64,
    pub fraction_per_thread: f64,
    pub durations: Durations,
}

impl TargetSnapshot {
    pub fn read(
        oracle: &impl TargetOracle,
        target: &str,
        config: &BatchConfig,
    ) -> OracleResult<Self> {
        let max_money = oracle.max_money(target)?;
        let min_security = oracle.min_security(target)? + config.strategy.security_buffer;
        Ok(Self {
            target: target.to_string(),
            money: oracle.current_money(target)?,
            max_money,
            money_goal: config.money_goal(max_money),
            security: oracle.current_security(target)?,
            min_security,
            fraction_per_thread: oracle
                .extraction_fraction_per_thread(target)?
                .max(MIN_FRACTION_PER_THREAD),
            durations: Durations::read(oracle, target)?,
        })
    }

    /// Current money relative to the goal.
    pub fn money_ratio(&self) -> f64 {
        if self.money_goal > 0.0 {
            self.money / self.money_goal
        } else {
            1.0
        }
    }

    /// How far security sits above its floor (may be negative).
    pub fn security_delta(&self) -> f64 {
        self.security - self.min_security
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCluster, SimTarget};
    use batchgrid_core::ManualClock;

    fn cluster() -> SimCluster {
        let sim = SimCluster::new(ManualClock::new(0), &BatchConfig::default());
        let mut target = SimTarget::new("joesguns", 1e9, 5.0);
        target.money = 5e8;
        target.security = 8.0;
        sim.add_target(target);
        sim
    }

    #[test]
    fn reads_ratio_and_delta() {
        let sim = cluster();
        let snap = TargetSnapshot::read(&sim, "joesguns", &BatchConfig::default()).unwrap();
        assert!((snap.money_ratio() - 0.5).abs() < 1e-9);
        assert!((snap.security_delta() - 3.0).abs() < 1e-9);
        assert!(snap.durations.weaken > snap.durations.hack);
    }

    #[test]
    fn security_buffer_raises_floor() {
        let sim = cluster();
        let mut config = BatchConfig::default();
        config.strategy.security_buffer = 1.0;
        let snap = TargetSnapshot::read(&sim, "joesguns", &config).unwrap();
        assert!((snap.min_security - 6.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_target_fails_the_whole_read() {
        let sim = cluster();
        assert!(TargetSnapshot::read(&sim, "nowhere", &BatchConfig::default()).is_err());
    }
}
