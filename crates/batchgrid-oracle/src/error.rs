//! Substrate error types.

use thiserror::Error;

/// Result type alias for oracle queries.
pub type OracleResult<T> = Result<T, OracleError>;

/// A live query against the substrate failed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OracleError {
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("query failed: {0}")]
    Query(String),
}

/// A single dispatch call was refused.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    #[error("insufficient capacity on {node}: need {needed:.2}, free {free:.2}")]
    InsufficientCapacity { node: String, needed: f64, free: f64 },

    #[error("node unavailable: {0}")]
    NodeUnavailable(String),

    #[error("dispatch rejected: {0}")]
    Rejected(String),
}
