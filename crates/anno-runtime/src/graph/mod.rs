//! Workflow graph model: nodes, graphs, and structural validation.

mod graph;
mod node;

pub use graph::{PipelineGraph, ValidatedGraph};
pub use node::{
    DatasetSnapshotParams, DocumentQueryParams, ExternalCallbackParams, MergeParams, MergePolicy,
    Node, NodePayload, NodeType, OperationKind, RevisionParams,
};
