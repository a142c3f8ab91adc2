//! Per-target control record.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use batchgrid_core::Millis;

/// Operating mode of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Driving the target towards min security and its money goal.
    #[default]
    Prep,
    /// Issuing overlapping hack/weaken/grow/weaken pipelines.
    Batch,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Prep => "prep",
            Mode::Batch => "batch",
        }
    }
}

/// Mutable scheduling state of one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub mode: Mode,
    /// Prep decisions are skipped until this timestamp.
    pub prep_until: Millis,
    /// Completion time of the next pipeline's final step; `None` when unset.
    pub anchor_end: Option<Millis>,
    /// Expected completion times of dispatched batches, oldest first.
    pub inflight_ends: VecDeque<Millis>,
    /// Consecutive ticks the drift condition held.
    pub drift_streak: u32,
    pub ema_money_ratio: f64,
    pub ema_security_delta: f64,
    /// No dispatch of any kind before this timestamp.
    pub cooldown_until: Millis,
    pub total_batches: u64,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            mode: Mode::Prep,
            prep_until: 0,
            anchor_end: None,
            inflight_ends: VecDeque::new(),
            drift_streak: 0,
            ema_money_ratio: 1.0,
            ema_security_delta: 0.0,
            cooldown_until: 0,
            total_batches: 0,
        }
    }
}

impl TargetState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget batches whose expected completion has passed.
    pub fn prune_inflight(&mut self, now: Millis) -> usize {
        let before = self.inflight_ends.len();
        while self.inflight_ends.front().is_some_and(|&end| end <= now) {
            self.inflight_ends.pop_front();
        }
        before - self.inflight_ends.len()
    }

    pub fn inflight(&self) -> usize {
        self.inflight_ends.len()
    }

    pub fn in_cooldown(&self, now: Millis) -> bool {
        now < self.cooldown_until
    }

    /// Prep → Batch. EMAs restart from the observation that justified it.
    pub fn enter_batch(&mut self, money_ratio: f64, security_delta: f64) {
        self.mode = Mode::Batch;
        self.anchor_end = None;
        self.prep_until = 0;
        self.ema_money_ratio = money_ratio;
        self.ema_security_delta = security_delta;
    }

    /// Make sure the anchor leaves at least `lead` ms from `now`.
    ///
    /// The anchor only ever moves forward here.
    pub fn ensure_anchor(&mut self, now: Millis, lead: Millis) -> Millis {
        let earliest = now + lead;
        let anchor = match self.anchor_end {
            Some(anchor) if anchor >= earliest => anchor,
            _ => earliest,
        };
        self.anchor_end = Some(anchor);
        anchor
    }

    /// Record a dispatched batch and move the anchor to the next slot.
    pub fn record_launch(&mut self, expected_end: Millis, interval: Millis) {
        self.inflight_ends.push_back(expected_end);
        if let Some(anchor) = self.anchor_end.as_mut() {
            *anchor += interval;
        }
        self.total_batches += 1;
    }

    /// Drop everything in flight and fall back to prep.
    pub fn reset_for_drift(&mut self, prep_until: Millis, cooldown_until: Millis) {
        self.inflight_ends.clear();
        self.anchor_end = None;
        self.mode = Mode::Prep;
        self.drift_streak = 0;
        self.prep_until = prep_until;
        self.cooldown_until = cooldown_until;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_starts_in_prep() {
        let state = TargetState::new();
        assert_eq!(state.mode, Mode::Prep);
        assert_eq!(state.anchor_end, None);
        assert_eq!(state.inflight(), 0);
        assert_eq!(state.ema_money_ratio, 1.0);
    }

    #[test]
    fn prune_drops_only_elapsed_ends() {
        let mut state = TargetState::new();
        state.inflight_ends.extend([100, 200, 300]);
        assert_eq!(state.prune_inflight(200), 2);
        assert_eq!(state.inflight_ends, VecDeque::from([300]));
    }

    #[test]
    fn enter_batch_reseeds_emas() {
        let mut state = TargetState::new();
        state.ema_money_ratio = 0.2;
        state.ema_security_delta = 9.0;
        state.prep_until = 5_000;
        state.enter_batch(0.99, 0.1);

        assert_eq!(state.mode, Mode::Batch);
        assert_eq!(state.prep_until, 0);
        assert_eq!(state.ema_money_ratio, 0.99);
        assert_eq!(state.ema_security_delta, 0.1);
    }

    #[test]
    fn anchor_never_moves_backward() {
        let mut state = TargetState::new();
        assert_eq!(state.ensure_anchor(1_000, 500), 1_500);

        state.record_launch(1_700, 450);
        assert_eq!(state.anchor_end, Some(1_950));

        // Plenty of lead left: keep the scheduled anchor.
        assert_eq!(state.ensure_anchor(1_100, 500), 1_950);
        // Lead fell short: push forward, never back.
        assert_eq!(state.ensure_anchor(1_600, 500), 2_100);
    }

    #[test]
    fn drift_reset_clears_pipeline() {
        let mut state = TargetState::new();
        state.enter_batch(1.0, 0.0);
        state.ensure_anchor(0, 100);
        state.record_launch(500, 100);
        state.drift_streak = 3;

        state.reset_for_drift(2_000, 4_000);

        assert_eq!(state.mode, Mode::Prep);
        assert_eq!(state.anchor_end, None);
        assert_eq!(state.inflight(), 0);
        assert_eq!(state.drift_streak, 0);
        assert!(state.in_cooldown(3_999));
        assert!(!state.in_cooldown(4_000));
        assert_eq!(state.total_batches, 1);
    }

    #[test]
    fn serializes_mode_snake_case() {
        let json = serde_json::to_string(&TargetState::new()).unwrap();
        assert!(json.contains("\"mode\":\"prep\""));
    }
}
