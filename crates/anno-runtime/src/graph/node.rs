//! Workflow node model: types, operations, and per-operation
//! parameters.
//!
//! A node is a `(type, operation)` pair plus the operation's
//! parameters. The pair is checked against a closed compatibility
//! table before the node is accepted into a graph; execution handlers
//! are keyed by the same pair.

use anno_core::DatasetId;
use anno_query::stage::Stage;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::error::{WorkflowError, WorkflowResult};

/// Structural role of a node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumIter, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeType {
    /// Brings records into the pipeline.
    Input,
    /// Transforms or combines records.
    Processing,
    /// Persists or forwards records; never feeds another node.
    Output,
}

/// Operation a node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumIter, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    /// Retrieval through the declarative query engine.
    DocumentQuery,
    /// Dataset snapshot read (input) or write (output).
    DatasetSnapshot,
    /// Round trip through an external webhook.
    ExternalCallback,
    /// Combine two record streams keyed by event id.
    Merge,
    /// Revision working-set read (input) or write (output).
    Revision,
    /// Forward records unchanged.
    PassThrough,
}

impl NodeType {
    /// The closed compatibility table between node types and
    /// operations.
    pub fn supports(&self, operation: OperationKind) -> bool {
        use OperationKind::*;
        match self {
            NodeType::Input => matches!(operation, DocumentQuery | DatasetSnapshot | Revision),
            NodeType::Processing => {
                matches!(operation, DocumentQuery | ExternalCallback | Merge | PassThrough)
            }
            NodeType::Output => matches!(operation, DatasetSnapshot | Revision | PassThrough),
        }
    }
}

/// Parameters of a retrieval node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentQueryParams {
    /// Query stages, compiled and run through the query engine.
    pub steps: Vec<Stage>,
}

/// Parameters of a dataset snapshot node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSnapshotParams {
    /// Snapshot to read from or write into.
    pub dataset_id: DatasetId,
}

/// Parameters of an external callback node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalCallbackParams {
    /// Webhook URL receiving the records.
    pub url: String,
}

/// How a merge node resolves records present on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumIter, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MergePolicy {
    /// The left stream's record wins.
    Left,
    /// The right stream's record wins.
    Right,
    /// Prediction collections are concatenated; attributes fill in
    /// left-first.
    Outer,
    /// Both records are posted to an external resolver.
    Callback,
}

/// Parameters of a merge node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeParams {
    /// Conflict policy.
    pub policy: MergePolicy,
    /// Resolver URL, required by [`MergePolicy::Callback`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

/// Parameters of a revision node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionParams {
    /// Revision whose working set is read or written.
    pub revision_id: Uuid,
}

/// Operation-specific node parameters, tagged by operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum NodePayload {
    /// Retrieval parameters.
    DocumentQuery(DocumentQueryParams),
    /// Snapshot parameters.
    DatasetSnapshot(DatasetSnapshotParams),
    /// Callback parameters.
    ExternalCallback(ExternalCallbackParams),
    /// Merge parameters.
    Merge(MergeParams),
    /// Revision parameters.
    Revision(RevisionParams),
    /// No parameters.
    PassThrough,
}

impl NodePayload {
    /// The operation this payload parameterizes.
    pub fn kind(&self) -> OperationKind {
        match self {
            NodePayload::DocumentQuery(_) => OperationKind::DocumentQuery,
            NodePayload::DatasetSnapshot(_) => OperationKind::DatasetSnapshot,
            NodePayload::ExternalCallback(_) => OperationKind::ExternalCallback,
            NodePayload::Merge(_) => OperationKind::Merge,
            NodePayload::Revision(_) => OperationKind::Revision,
            NodePayload::PassThrough => OperationKind::PassThrough,
        }
    }
}

/// One node in a workflow graph, stored in the graph's arena and
/// referenced by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Structural role.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Operation and its parameters.
    #[serde(flatten)]
    pub payload: NodePayload,
    /// Arena indices of predecessor nodes, in input order.
    #[serde(default)]
    pub input_nodes: Vec<usize>,
}

impl Node {
    /// Creates a node with no predecessors.
    pub fn new(node_type: NodeType, payload: NodePayload) -> Self {
        Self {
            name: None,
            node_type,
            payload,
            input_nodes: Vec::new(),
        }
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the predecessor indices.
    pub fn with_inputs(mut self, input_nodes: Vec<usize>) -> Self {
        self.input_nodes = input_nodes;
        self
    }

    /// Whether this node is a retrieval node eligible for fusion.
    pub fn is_retrieval(&self) -> bool {
        self.payload.kind() == OperationKind::DocumentQuery
    }

    /// Checks the `(type, operation)` pair and the payload parameters.
    pub fn check(&self, index: usize) -> WorkflowResult<()> {
        let operation = self.payload.kind();
        if !self.node_type.supports(operation) {
            return Err(WorkflowError::InvalidNode {
                index,
                reason: format!("{} node cannot perform {operation}", self.node_type),
            });
        }
        match &self.payload {
            NodePayload::Merge(params) => {
                if params.policy == MergePolicy::Callback && params.callback_url.is_none() {
                    return Err(WorkflowError::InvalidNode {
                        index,
                        reason: "callback merge policy requires a callback_url".into(),
                    });
                }
                Ok(())
            }
            NodePayload::ExternalCallback(params) if params.url.is_empty() => {
                Err(WorkflowError::InvalidNode {
                    index,
                    reason: "callback url must not be empty".into(),
                })
            }
            _ => Ok(()),
        }
    }
}
