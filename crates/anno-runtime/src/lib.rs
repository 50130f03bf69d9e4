#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod error;
mod executor;
mod merge;
mod run;

pub mod graph;

pub use error::{WorkflowError, WorkflowResult};
pub use executor::WorkflowExecutor;
pub use run::{PipelineRun, RunStatus};

/// Tracing target for workflow operations.
pub const TRACING_TARGET: &str = "anno_runtime";
