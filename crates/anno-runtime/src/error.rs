//! Workflow error types.

use anno_core::{CoreError, RunId};
use anno_query::QueryError;
use thiserror::Error;

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors raised while validating, scheduling, or executing workflow
/// graphs.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The graph definition is structurally unusable.
    #[error("invalid graph definition: {0}")]
    InvalidDefinition(String),

    /// A node pairs a type with an operation it does not support, or
    /// carries unusable parameters.
    #[error("invalid node {index}: {reason}")]
    InvalidNode {
        /// Arena index of the offending node.
        index: usize,
        /// Why the node was rejected.
        reason: String,
    },

    /// The graph contains a dependency cycle.
    #[error("graph contains a cycle through nodes {nodes:?}")]
    Cycle {
        /// Arena indices that could not be topologically resolved.
        nodes: Vec<usize>,
    },

    /// The sorted order violates a structural invariant.
    #[error("invalid node ordering: {0}")]
    Ordering(String),

    /// A node handler failed during execution.
    #[error("node {index} failed: {message}")]
    NodeFailed {
        /// Arena index of the failed node.
        index: usize,
        /// Error message.
        message: String,
    },

    /// A run id is not known to this executor.
    #[error("unknown run: {0}")]
    UnknownRun(RunId),

    /// A run status transition is not allowed.
    #[error("run cannot transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: crate::run::RunStatus,
        /// Requested status.
        to: crate::run::RunStatus,
    },

    /// A query embedded in a retrieval node was rejected.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A collaborator call failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
