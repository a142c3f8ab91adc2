//! Allocator: packs thread requests onto nodes.
//!
//! Tasks are packed independently from the largest total demand to the
//! smallest, so the biggest component of a pipeline gets first pick of
//! the roomiest hosts. For each task the node with the most free capacity
//! takes as many threads as fit, then the next-largest, and so on; a task
//! may be split across any number of nodes.
//!
//! The free-capacity ledger is local to one call. Nothing is reserved on
//! the nodes themselves, so a plan can still fail at dispatch time if
//! another consumer takes the capacity first.

use thiserror::Error;
use tracing::{debug, trace};

use batchgrid_core::{ActionKind, NodeCapacity, NodeId, Task};

use crate::plan::{Plan, PlanEntry};

/// Why no plan could be produced.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AllocationError {
    #[error("insufficient capacity for {kind} on {target}: placed {placed} of {requested} threads")]
    Infeasible {
        kind: ActionKind,
        target: String,
        requested: u32,
        placed: u32,
    },

    #[error("per-thread cost for {0} must be positive")]
    InvalidCost(ActionKind),
}

/// Pack every task onto `nodes`, or fail as a whole.
pub fn allocate(tasks: &[Task], nodes: &[NodeCapacity]) -> Result<Plan, AllocationError> {
    let mut ledger: Vec<(NodeId, f64)> = nodes
        .iter()
        .filter(|n| n.free > 0.0)
        .map(|n| (n.node_id.clone(), n.free))
        .collect();

    let mut sorted: Vec<&Task> = tasks.iter().filter(|t| t.threads > 0).collect();
    sorted.sort_by(|a, b| {
        b.demand()
            .partial_cmp(&a.demand())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut plan = Plan::default();

    for task in sorted {
        if !(task.cost_per_thread > 0.0) {
            return Err(AllocationError::InvalidCost(task.kind));
        }

        let mut left = task.threads;
        while left > 0 {
            let Some(idx) = roomiest(&ledger) else {
                debug!(
                    kind = %task.kind,
                    target = %task.target,
                    requested = task.threads,
                    remaining = left,
                    "allocation infeasible"
                );
                return Err(AllocationError::Infeasible {
                    kind: task.kind,
                    target: task.target.clone(),
                    requested: task.threads,
                    placed: task.threads - left,
                });
            };

            let (node, free) = &mut ledger[idx];
            let fits = (*free / task.cost_per_thread).floor();
            if fits < 1.0 {
                // Can't host a single thread of this task; stop offering it.
                ledger.swap_remove(idx);
                continue;
            }

            let used = left.min(fits.min(f64::from(u32::MAX)) as u32);
            let demand = f64::from(used) * task.cost_per_thread;
            *free -= demand;

            trace!(node = %node, kind = %task.kind, threads = used, "packed threads");
            plan.entries.push(PlanEntry {
                node: node.clone(),
                kind: task.kind,
                threads: used,
                target: task.target.clone(),
                delay_ms: task.delay_ms,
                demand,
            });
            left -= used;
        }
    }

    Ok(plan)
}

/// Index of the ledger entry with the most free capacity, ties to the first.
fn roomiest(ledger: &[(NodeId, f64)]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, (_, free)) in ledger.iter().enumerate() {
        if *free > best.map_or(0.0, |(_, f)| f) {
            best = Some((idx, *free));
        }
    }
    best.map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(caps: &[(&str, f64)]) -> Vec<NodeCapacity> {
        caps.iter().map(|(id, free)| NodeCapacity::new(id, *free)).collect()
    }

    fn task(kind: ActionKind, threads: u32, cost: f64) -> Task {
        Task::new(kind, threads, "joesguns", 0, cost)
    }

    #[test]
    fn single_task_fits_on_one_node() {
        let plan = allocate(
            &[task(ActionKind::Weaken, 10, 1.75)],
            &nodes(&[("home", 100.0)]),
        )
        .unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.entries[0].node, "home");
        assert_eq!(plan.entries[0].threads, 10);
    }

    #[test]
    fn infeasible_request_reports_what_was_placed() {
        // 100 threads at 2 units each against 50 + 30 + 25 free units:
        // floor(50/2) + floor(30/2) + floor(25/2) = 25 + 15 + 12 threads fit.
        let err = allocate(
            &[task(ActionKind::Grow, 100, 2.0)],
            &nodes(&[("a", 50.0), ("b", 30.0), ("c", 25.0)]),
        )
        .unwrap_err();

        assert_eq!(
            err,
            AllocationError::Infeasible {
                kind: ActionKind::Grow,
                target: "joesguns".to_string(),
                requested: 100,
                placed: 52,
            }
        );
    }

    #[test]
    fn splits_across_largest_nodes_first() {
        let plan = allocate(
            &[task(ActionKind::Grow, 50, 2.0)],
            &nodes(&[("a", 50.0), ("b", 30.0), ("c", 25.0)]),
        )
        .unwrap();

        assert_eq!(plan.threads_on("a", ActionKind::Grow), 25);
        assert_eq!(plan.threads_on("b", ActionKind::Grow), 15);
        assert_eq!(plan.threads_on("c", ActionKind::Grow), 10);
        assert_eq!(plan.threads_for(ActionKind::Grow, "joesguns"), 50);
    }

    #[test]
    fn largest_demand_gets_first_pick() {
        let tasks = [
            task(ActionKind::Weaken, 2, 1.75),
            task(ActionKind::Hack, 40, 1.70),
            task(ActionKind::Grow, 9, 1.75),
        ];
        let plan = allocate(&tasks, &nodes(&[("small", 20.0), ("big", 100.0)])).unwrap();

        assert_eq!(plan.entries[0].kind, ActionKind::Hack);
        assert_eq!(plan.entries[0].node, "big");
        assert_eq!(plan.entries[0].threads, 40);
    }

    #[test]
    fn every_task_gets_exact_thread_count() {
        let tasks = [
            task(ActionKind::Hack, 37, 1.70),
            task(ActionKind::Weaken, 3, 1.75),
            task(ActionKind::Grow, 21, 1.75),
        ];
        let caps = nodes(&[("a", 40.0), ("b", 33.3), ("c", 29.0), ("d", 8.0)]);
        let plan = allocate(&tasks, &caps).unwrap();

        for t in &tasks {
            assert_eq!(plan.threads_for(t.kind, "joesguns"), t.threads);
        }
        // No node is handed more capacity than it had free.
        for cap in &caps {
            let used: f64 = plan
                .entries
                .iter()
                .filter(|e| e.node == cap.node_id)
                .map(|e| e.demand)
                .sum();
            assert!(used <= cap.free + 1e-9, "{} overcommitted", cap.node_id);
        }
    }

    #[test]
    fn no_entry_exceeds_floor_of_free_over_cost() {
        let caps = nodes(&[("a", 9.9), ("b", 7.0)]);
        let plan = allocate(&[task(ActionKind::Weaken, 9, 1.75)], &caps).unwrap();

        assert_eq!(plan.threads_on("a", ActionKind::Weaken), 5);
        assert_eq!(plan.threads_on("b", ActionKind::Weaken), 4);
    }

    #[test]
    fn zero_thread_tasks_are_ignored() {
        let plan = allocate(
            &[task(ActionKind::Grow, 0, 1.75), task(ActionKind::Weaken, 1, 1.75)],
            &nodes(&[("home", 4.0)]),
        )
        .unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.entries[0].kind, ActionKind::Weaken);
    }

    #[test]
    fn no_nodes_is_infeasible() {
        let result = allocate(&[task(ActionKind::Hack, 1, 1.7)], &[]);
        assert!(matches!(result, Err(AllocationError::Infeasible { placed: 0, .. })));
    }

    #[test]
    fn empty_request_yields_empty_plan() {
        let plan = allocate(&[], &nodes(&[("home", 4.0)])).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn delays_are_carried_into_entries() {
        let t = Task::new(ActionKind::Grow, 4, "foodnstuff", 1_234, 1.75);
        let plan = allocate(&[t], &nodes(&[("a", 4.0), ("b", 4.0)])).unwrap();

        assert_eq!(plan.nodes_touched().len(), 2);
        assert!(plan.entries.iter().all(|e| e.delay_ms == 1_234));
        assert!(plan.entries.iter().all(|e| e.target == "foodnstuff"));
    }
}
