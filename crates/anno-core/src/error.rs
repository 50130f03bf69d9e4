//! Core error types.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations and collaborator calls.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A geometric coordinate fell outside the relative `0.0..=1.0` range.
    #[error("coordinate {value} out of relative range (expected 0.0..=1.0)")]
    CoordinateOutOfRange {
        /// The offending coordinate value.
        value: f64,
    },

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity that was looked up.
        entity: &'static str,
        /// Identifier that failed to resolve.
        id: String,
    },

    /// The document store rejected or failed a query.
    #[error("store error: {0}")]
    Store(String),

    /// An external collaborator call failed.
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
