//! batchgrid-scheduler: keeps targets oscillating around their ready
//! state with overlapping, correctly-timed batches.
//!
//! Each selected target is either in prep (being weakened and grown to
//! its goal) or batching (receiving a new hack → weaken → grow → weaken
//! pipeline every batch interval). The substrate never reports
//! completion, so every pipeline is timed by start delays computed
//! backward from a shared anchor.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (tick loop, budgets, refresh)
//!   ├── NodeRegistry + targets::select_targets   (refresh cadence)
//!   ├── TargetStateStore                         (one TargetState per target)
//!   ├── DriftDetector                            (EMA + confirmation)
//!   ├── machine                                  (prep step, batch sizing/timing)
//!   ├── batchgrid_placement::allocate            (Task → Plan)
//!   └── dispatcher::execute                      (Plan → all-or-nothing launch)
//! ```

pub mod dispatcher;
pub mod drift;
pub mod error;
pub mod machine;
pub mod scheduler;
pub mod stats;
pub mod targets;

pub use dispatcher::{cancel_target, execute};
pub use drift::{DriftDetector, DriftVerdict};
pub use error::{SchedulerError, SchedulerResult};
pub use machine::{BatchSizing, BatchTiming, PrepStep};
pub use scheduler::{Scheduler, TickReport};
pub use stats::{CycleTotals, SchedulerStatus, SkipCounters, SkipReason, TargetStatus};
pub use targets::{TargetScore, rank_targets, select_targets};
