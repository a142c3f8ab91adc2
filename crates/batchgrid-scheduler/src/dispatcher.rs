//! Atomic dispatcher: applies a [`Plan`] to the substrate.
//!
//! Entries are launched in plan order. If any launch fails, every action
//! already launched from the same plan is cancelled before the failure is
//! reported, so a half-formed pipeline never keeps running.

use tracing::{debug, info, warn};

use batchgrid_oracle::{ActionHandle, Executor};
use batchgrid_placement::Plan;

use crate::error::{SchedulerError, SchedulerResult};

/// Launch every entry of `plan`, or none of them.
pub fn execute(executor: &impl Executor, plan: &Plan) -> SchedulerResult<Vec<ActionHandle>> {
    let mut launched: Vec<ActionHandle> = Vec::with_capacity(plan.len());

    for (idx, entry) in plan.entries.iter().enumerate() {
        match executor.dispatch(
            &entry.node,
            entry.kind,
            entry.threads,
            &entry.target,
            entry.delay_ms,
        ) {
            Ok(handle) => launched.push(handle),
            Err(source) => {
                let cancelled = rollback(executor, &launched);
                warn!(
                    node = %entry.node,
                    kind = %entry.kind,
                    threads = entry.threads,
                    target = %entry.target,
                    entry = idx,
                    cancelled,
                    error = %source,
                    "dispatch failed, plan rolled back"
                );
                return Err(SchedulerError::RolledBack {
                    entry: idx,
                    cancelled,
                    source,
                });
            }
        }
    }

    debug!(calls = launched.len(), "plan dispatched");
    Ok(launched)
}

fn rollback(executor: &impl Executor, launched: &[ActionHandle]) -> usize {
    launched
        .iter()
        .rev()
        .filter(|handle| executor.cancel(handle))
        .count()
}

/// Cancel every running action aimed at `target` on the given nodes.
pub fn cancel_target<'a>(
    executor: &impl Executor,
    nodes: impl IntoIterator<Item = &'a str>,
    target: &str,
) -> usize {
    let mut cancelled = 0;
    for node in nodes {
        for action in executor.running(node) {
            if action.target == target && executor.cancel(&action.handle) {
                cancelled += 1;
            }
        }
    }
    if cancelled > 0 {
        info!(%target, cancelled, "cancelled running actions");
    }
    cancelled
}
