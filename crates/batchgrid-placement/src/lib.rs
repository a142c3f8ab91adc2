//! batchgrid-placement: turns abstract thread requests into a concrete
//! per-node plan.
//!
//! This crate does NOT launch anything (that's the dispatcher in
//! `batchgrid-scheduler`). It takes a set of [`Task`]s and a fresh
//! free-capacity ledger and either packs every requested thread onto
//! nodes or reports the request infeasible.
//!
//! # Components
//!
//! - **`plan`**: `Plan` / `PlanEntry`, the allocator's output
//! - **`allocator`**: the packing algorithm
//!
//! [`Task`]: batchgrid_core::Task

pub mod allocator;
pub mod plan;

pub use allocator::{AllocationError, allocate};
pub use plan::{Plan, PlanEntry};
