//! batchgrid-oracle: everything the scheduler learns from or does to
//! the outside world.
//!
//! The execution substrate is opaque: it answers live queries about nodes
//! and targets and accepts dispatch/cancel calls. It never reports action
//! completion, so the scheduler infers it from queried durations.
//!
//! # Components
//!
//! - **`interface`**: `ClusterOracle`, `TargetOracle`, `Executor` traits
//! - **`snapshot`**: one consistent read of a target per decision
//! - **`registry`**: usable nodes with their reservations
//! - **`sim`**: `SimCluster`, an in-memory substrate for tests and dry runs

pub mod error;
pub mod interface;
pub mod registry;
pub mod sim;
pub mod snapshot;

pub use error::{DispatchError, OracleError, OracleResult};
pub use interface::{ActionHandle, ClusterOracle, Environment, Executor, RunningAction, TargetOracle};
pub use registry::{NodeRegistry, RegisteredNode};
pub use sim::{SimCluster, SimNode, SimTarget};
pub use snapshot::{Durations, TargetSnapshot};
