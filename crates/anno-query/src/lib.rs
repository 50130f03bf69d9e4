#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod error;
mod executor;
mod pipeline;
mod vocabulary;

pub mod expr;
pub mod stage;

pub use error::{QueryError, QueryResult};
pub use executor::{EnrichedRecord, QueryExecutor, QueryOutcome};
pub use pipeline::{compile_pipeline, facet_op, project_scope_op};
pub use vocabulary::{attribute_vocabulary_pipeline, label_vocabulary_pipeline};

/// Tracing target for query operations.
pub const TRACING_TARGET: &str = "anno_query";
