//! Drift detection.
//!
//! While a target is batching with work in flight, each tick folds the
//! observed money ratio and security delta into exponential moving
//! averages. If either average leaves its envelope for `confirm`
//! consecutive ticks the target is reset to prep. A single calm tick
//! clears the streak.

use tracing::{debug, warn};

use batchgrid_core::BatchConfig;
use batchgrid_state::{Mode, TargetState};

/// Outcome of one drift observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftVerdict {
    /// Not batching, nothing in flight, or inside the envelope.
    Stable,
    /// Outside the envelope for this many consecutive ticks.
    Suspect(u32),
    /// Confirmed: the caller must reset the target.
    Reset,
}

#[derive(Debug, Clone)]
pub struct DriftDetector {
    alpha: f64,
    security_threshold: f64,
    money_threshold: f64,
    confirm: u32,
}

impl DriftDetector {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            alpha: config.ema_alpha(),
            security_threshold: config.drift.security_delta,
            money_threshold: config.drift.money_ratio,
            confirm: config.drift.confirm.max(1),
        }
    }

    /// Fold one observation into `state` and decide whether to reset.
    ///
    /// On `Reset` the streak is already cleared; the caller performs the
    /// rest of the reset.
    pub fn observe(
        &self,
        state: &mut TargetState,
        money_ratio: f64,
        security_delta: f64,
    ) -> DriftVerdict {
        if state.mode != Mode::Batch || state.inflight() == 0 {
            state.drift_streak = 0;
            return DriftVerdict::Stable;
        }

        let a = self.alpha;
        state.ema_money_ratio = (1.0 - a) * state.ema_money_ratio + a * money_ratio;
        state.ema_security_delta = (1.0 - a) * state.ema_security_delta + a * security_delta;

        if !self.out_of_envelope(state) {
            state.drift_streak = 0;
            return DriftVerdict::Stable;
        }

        state.drift_streak += 1;
        if state.drift_streak >= self.confirm {
            warn!(
                streak = state.drift_streak,
                ema_money_ratio = state.ema_money_ratio,
                ema_security_delta = state.ema_security_delta,
                "drift confirmed"
            );
            state.drift_streak = 0;
            return DriftVerdict::Reset;
        }

        debug!(
            streak = state.drift_streak,
            confirm = self.confirm,
            "drift suspected"
        );
        DriftVerdict::Suspect(state.drift_streak)
    }

    fn out_of_envelope(&self, state: &TargetState) -> bool {
        let security_drift =
            self.security_threshold > 0.0 && state.ema_security_delta > self.security_threshold;
        let money_drift =
            self.money_threshold > 0.0 && state.ema_money_ratio < self.money_threshold;
        security_drift || money_drift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batching() -> TargetState {
        let mut state = TargetState::new();
        state.enter_batch(1.0, 0.0);
        state.inflight_ends.push_back(10_000);
        state
    }

    #[test]
    fn three_bad_ticks_trigger_reset_on_the_third() {
        let detector = DriftDetector::new(&BatchConfig::default());
        let mut state = batching();

        assert_eq!(detector.observe(&mut state, 1.0, 10.0), DriftVerdict::Suspect(1));
        assert!(state.ema_security_delta > 3.0);
        assert_eq!(detector.observe(&mut state, 1.0, 10.0), DriftVerdict::Suspect(2));
        assert_eq!(detector.observe(&mut state, 1.0, 10.0), DriftVerdict::Reset);
        assert_eq!(state.drift_streak, 0);
    }

    #[test]
    fn calm_tick_clears_streak() {
        let detector = DriftDetector::new(&BatchConfig::default());
        let mut state = batching();

        detector.observe(&mut state, 0.0, 0.0);
        detector.observe(&mut state, 0.0, 0.0);
        assert_eq!(state.drift_streak, 2);

        // Force the average back inside the envelope.
        state.ema_money_ratio = 1.0;
        assert_eq!(detector.observe(&mut state, 1.0, 0.0), DriftVerdict::Stable);
        assert_eq!(state.drift_streak, 0);
    }

    #[test]
    fn ema_smooths_single_spike() {
        let detector = DriftDetector::new(&BatchConfig::default());
        let mut state = batching();

        // 0.35 × 5.0 = 1.75, below the 3.0 threshold.
        assert_eq!(detector.observe(&mut state, 1.0, 5.0), DriftVerdict::Stable);
        assert!((state.ema_security_delta - 1.75).abs() < 1e-9);
    }

    #[test]
    fn prep_targets_are_never_suspect() {
        let detector = DriftDetector::new(&BatchConfig::default());
        let mut state = TargetState::new();
        state.inflight_ends.push_back(10_000);
        state.drift_streak = 2;

        assert_eq!(detector.observe(&mut state, 0.0, 50.0), DriftVerdict::Stable);
        assert_eq!(state.drift_streak, 0);
        assert_eq!(state.ema_security_delta, 0.0);
    }

    #[test]
    fn idle_batch_target_is_not_observed() {
        let detector = DriftDetector::new(&BatchConfig::default());
        let mut state = TargetState::new();
        state.enter_batch(1.0, 0.0);

        assert_eq!(detector.observe(&mut state, 0.1, 50.0), DriftVerdict::Stable);
        assert_eq!(state.ema_money_ratio, 1.0);
    }

    #[test]
    fn zero_thresholds_disable_conditions() {
        let mut config = BatchConfig::default();
        config.drift.security_delta = 0.0;
        config.drift.money_ratio = 0.0;
        let detector = DriftDetector::new(&config);
        let mut state = batching();

        for _ in 0..10 {
            assert_eq!(detector.observe(&mut state, 0.0, 99.0), DriftVerdict::Stable);
        }
    }
}
