//! Query engine error types.

use anno_core::{CoreError, Shape};
use thiserror::Error;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while compiling or executing query pipelines.
///
/// Compile-time errors (unsupported operator, invalid stage, unknown
/// label or attribute) are surfaced synchronously and never partially
/// applied.
#[derive(Debug, Error)]
pub enum QueryError {
    /// An expression referenced an operator outside the closed catalogue.
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// An operator application had the wrong number of arguments.
    #[error("operator {op} expects {expected} argument(s), found {found}")]
    Arity {
        /// Operator name.
        op: &'static str,
        /// Expected argument count.
        expected: usize,
        /// Actual argument count.
        found: usize,
    },

    /// An operator argument had an unusable form.
    #[error("operator {op}: {reason}")]
    InvalidArgument {
        /// Operator name.
        op: &'static str,
        /// What was wrong with the argument.
        reason: String,
    },

    /// A stage failed validation; the whole pipeline is rejected.
    #[error("invalid stage {stage}: {reason}")]
    InvalidStage {
        /// Stage id as registered.
        stage: &'static str,
        /// Reason the stage was rejected.
        reason: String,
    },

    /// A stage referenced a label missing from the project vocabulary.
    #[error("unknown label ({name}, {shape}) in project vocabulary")]
    UnknownLabel {
        /// Label name.
        name: String,
        /// Shape the label was expected on.
        shape: Shape,
    },

    /// A stage referenced an attribute key missing from the vocabulary.
    #[error("unknown attribute key: {0}")]
    UnknownAttribute(String),

    /// A collaborator call failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueryError {
    /// Wraps any stage-local error into [`QueryError::InvalidStage`],
    /// naming the offending stage.
    pub fn for_stage(stage: &'static str, source: QueryError) -> Self {
        match source {
            err @ QueryError::InvalidStage { .. } => err,
            other => QueryError::InvalidStage {
                stage,
                reason: other.to_string(),
            },
        }
    }
}
