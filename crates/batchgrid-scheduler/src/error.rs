//! Scheduler error types.
//!
//! None of these ever leave a tick: the loop turns each one into a skip
//! reason and retries the target on a later tick.

use thiserror::Error;

use batchgrid_oracle::{DispatchError, OracleError};
use batchgrid_placement::AllocationError;

/// Errors that can occur while deciding or dispatching for one target.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    #[error("plan needs {needed} dispatch calls, {remaining} left this tick")]
    ExecBudget { needed: usize, remaining: usize },

    #[error("dispatch of plan entry {entry} failed, {cancelled} launched actions cancelled: {source}")]
    RolledBack {
        entry: usize,
        cancelled: usize,
        #[source]
        source: DispatchError,
    },

    #[error("oracle query failed: {0}")]
    Oracle(#[from] OracleError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
