//! batchgrid.toml configuration parser.
//!
//! Every tunable of the scheduler lives here. All sections are optional
//! in the file; missing keys fall back to the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ActionKind, Millis};

/// Floor applied to the inter-step gap.
const MIN_GAP_MS: Millis = 50;
/// Floor applied to the tick interval.
const MIN_TICK_MS: Millis = 50;

/// Fatal configuration problems, detected before the loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("per-thread cost for {0} must be positive, got {1}")]
    MissingWorkerCost(ActionKind, f64),

    #[error("{name} must be within (0, 1], got {value}")]
    FractionOutOfRange { name: &'static str, value: f64 },

    #[error("{0} must be at least 1")]
    ZeroCount(&'static str),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub capacity: CapacityConfig,
    pub strategy: StrategyConfig,
    pub timing: TimingConfig,
    pub limits: LimitsConfig,
    pub drift: DriftConfig,
    pub targets: TargetsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    pub hack_cost: f64,
    pub grow_cost: f64,
    pub weaken_cost: f64,
    /// Name of the distinguished home node.
    pub home_node: String,
    /// Capacity held back on the home node.
    pub home_reserve: f64,
    /// Capacity held back on every node.
    pub reserve: f64,
    pub include_home: bool,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            hack_cost: 1.70,
            grow_cost: 1.75,
            weaken_cost: 1.75,
            home_node: "home".to_string(),
            home_reserve: 32.0,
            reserve: 0.0,
            include_home: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Fraction of the money goal each batch extracts.
    pub hack_fraction: f64,
    /// Fraction of money that must survive a batch; caps `hack_fraction`.
    pub money_keep: f64,
    /// Money goal as a fraction of max money.
    pub money_prep: f64,
    /// Added to the target's minimum security.
    pub security_buffer: f64,
    /// Absolute security slack accepted when leaving prep.
    pub prep_security_tolerance: f64,
    /// Fraction of the money goal required when leaving prep.
    pub prep_money_fraction: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            hack_fraction: 0.08,
            money_keep: 0.85,
            money_prep: 1.0,
            security_buffer: 0.0,
            prep_security_tolerance: 0.5,
            prep_money_fraction: 0.97,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub gap_ms: Millis,
    pub batch_interval_ms: Millis,
    pub tick_ms: Millis,
    pub refresh_ms: Millis,
    pub lead_margin_ms: Millis,
    pub prep_settle_ms: Millis,
    pub prep_retry_ms: Millis,
    pub inflight_slack_ms: Millis,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            gap_ms: 200,
            batch_interval_ms: 450,
            tick_ms: 200,
            refresh_ms: 15_000,
            lead_margin_ms: 200,
            prep_settle_ms: 250,
            prep_retry_ms: 500,
            inflight_slack_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub per_target_cap: u32,
    /// Batches launched per tick (0 = unlimited).
    pub max_launch_per_tick: u32,
    /// Individual dispatch calls per tick (0 = unlimited).
    pub max_exec_per_tick: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            per_target_cap: 60,
            max_launch_per_tick: 10,
            max_exec_per_tick: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Smoothed security delta above which drift is suspected (0 = off).
    pub security_delta: f64,
    /// Smoothed money ratio below which drift is suspected (0 = off).
    pub money_ratio: f64,
    /// Consecutive suspect ticks before a reset.
    pub confirm: u32,
    pub ema_alpha: f64,
    pub cooldown_cap_ms: Millis,
    pub cooldown_weaken_fraction: f64,
    pub prep_hold_cap_ms: Millis,
    pub prep_hold_weaken_fraction: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            security_delta: 3.0,
            money_ratio: 0.82,
            confirm: 3,
            ema_alpha: 0.35,
            cooldown_cap_ms: 5_000,
            cooldown_weaken_fraction: 0.35,
            prep_hold_cap_ms: 2_000,
            prep_hold_weaken_fraction: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetsConfig {
    pub max_targets: u32,
    pub min_chance: f64,
    pub min_max_money: f64,
    pub only_hackable: bool,
    pub only_rooted: bool,
    /// Schedule exactly this target and skip scoring.
    pub pinned: Option<String>,
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            max_targets: 3,
            min_chance: 0.65,
            min_max_money: 1e8,
            only_hackable: true,
            only_rooted: false,
            pinned: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_every_ms: Millis,
    pub quiet: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_every_ms: 3_000,
            quiet: false,
        }
    }
}

impl BatchConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: BatchConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in ActionKind::ALL {
            let cost = self.cost_for(kind);
            if !(cost > 0.0) {
                return Err(ConfigError::MissingWorkerCost(kind, cost));
            }
        }

        let fractions = [
            ("strategy.hack_fraction", self.strategy.hack_fraction),
            ("strategy.money_prep", self.strategy.money_prep),
            ("strategy.prep_money_fraction", self.strategy.prep_money_fraction),
        ];
        for (name, value) in fractions {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::FractionOutOfRange { name, value });
            }
        }
        if !(0.0..1.0).contains(&self.strategy.money_keep) {
            return Err(ConfigError::FractionOutOfRange {
                name: "strategy.money_keep",
                value: self.strategy.money_keep,
            });
        }

        if self.drift.confirm == 0 {
            return Err(ConfigError::ZeroCount("drift.confirm"));
        }
        if self.limits.per_target_cap == 0 {
            return Err(ConfigError::ZeroCount("limits.per_target_cap"));
        }
        Ok(())
    }

    /// Capacity units consumed by one thread of `kind`.
    pub fn cost_for(&self, kind: ActionKind) -> f64 {
        match kind {
            ActionKind::Hack => self.capacity.hack_cost,
            ActionKind::Grow => self.capacity.grow_cost,
            ActionKind::Weaken => self.capacity.weaken_cost,
        }
    }

    /// Capacity held back on `node`.
    pub fn reservation_for(&self, node: &str) -> f64 {
        let mut reserve = self.capacity.reserve;
        if node == self.capacity.home_node {
            reserve = reserve.max(self.capacity.home_reserve);
        }
        reserve.max(0.0)
    }

    /// Money level prep drives towards and batches restore to.
    pub fn money_goal(&self, max_money: f64) -> f64 {
        (max_money * self.strategy.money_prep).max(1.0)
    }

    /// Fraction each batch actually aims to extract.
    pub fn desired_hack_fraction(&self) -> f64 {
        self.strategy
            .hack_fraction
            .min(1.0 - self.strategy.money_keep)
    }

    pub fn gap_ms(&self) -> Millis {
        self.timing.gap_ms.max(MIN_GAP_MS)
    }

    pub fn interval_ms(&self) -> Millis {
        self.timing.batch_interval_ms.max(self.gap_ms())
    }

    pub fn tick_ms(&self) -> Millis {
        self.timing.tick_ms.max(MIN_TICK_MS)
    }

    pub fn ema_alpha(&self) -> f64 {
        self.drift.ema_alpha.clamp(0.0, 1.0)
    }

    /// Batch launches allowed per tick; `None` means unlimited.
    pub fn launch_budget(&self) -> Option<u32> {
        (self.limits.max_launch_per_tick > 0).then_some(self.limits.max_launch_per_tick)
    }

    /// Dispatch calls allowed per tick; `None` means unlimited.
    pub fn exec_budget(&self) -> Option<u32> {
        (self.limits.max_exec_per_tick > 0).then_some(self.limits.max_exec_per_tick)
    }
}
