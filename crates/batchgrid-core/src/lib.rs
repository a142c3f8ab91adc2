//! batchgrid-core: shared types and configuration.
//!
//! Everything here is substrate-agnostic: action kinds, task requests,
//! node capacity ledger entries, the clock abstraction used by the tick
//! loop, and the TOML configuration surface with all scheduler tunables.

pub mod clock;
pub mod config;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BatchConfig, ConfigError};
pub use types::{ActionKind, Millis, NodeCapacity, NodeId, TargetId, Task};
