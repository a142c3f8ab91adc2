//! batchgrid-state: per-target control state.
//!
//! Nothing here is persisted: the store is rebuilt from live target
//! queries after every restart. Entries are created the first time a
//! target is selected and dropped when a later refresh no longer selects it.

pub mod store;
pub mod types;

pub use store::TargetStateStore;
pub use types::{Mode, TargetState};
