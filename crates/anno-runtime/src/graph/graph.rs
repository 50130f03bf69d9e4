//! Pipeline graphs and their validation.
//!
//! A [`PipelineGraph`] is the stored form: an arena of nodes with
//! index-based predecessor lists. [`PipelineGraph::check`] turns it
//! into a [`ValidatedGraph`] whose nodes are rebuilt in execution
//! order, with consecutive retrieval nodes fused into one. Validation
//! enforces three structural rules: the graph is acyclic, no node
//! depends on an output node, and retrieval nodes only ever depend on
//! other retrieval nodes (so they can be front-loaded and fused).

use std::collections::VecDeque;

use anno_core::{GraphId, ProjectId};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::TRACING_TARGET;
use crate::error::{WorkflowError, WorkflowResult};

use super::node::{DocumentQueryParams, Node, NodePayload, NodeType};

/// A stored workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineGraph {
    /// Graph identifier.
    #[serde(default)]
    pub id: GraphId,
    /// Project whose records the graph operates on.
    pub project_id: ProjectId,
    /// Display name.
    pub name: String,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Soft-deletion marker; deleted graphs cannot be scheduled.
    #[serde(default)]
    pub deleted: bool,
    /// Node arena; predecessor lists reference indices into it.
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl PipelineGraph {
    /// Creates an empty graph for a project.
    pub fn new(project_id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id: GraphId::new(),
            project_id,
            name: name.into(),
            tags: Vec::new(),
            deleted: false,
            nodes: Vec::new(),
        }
    }

    /// Appends a node and returns its arena index.
    pub fn push_node(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Validates the graph and produces its executable form.
    pub fn check(&self) -> WorkflowResult<ValidatedGraph> {
        if self.deleted {
            return Err(WorkflowError::InvalidDefinition(
                "graph is deleted".into(),
            ));
        }
        if self.nodes.is_empty() {
            return Err(WorkflowError::InvalidDefinition(
                "graph has no nodes".into(),
            ));
        }

        for (index, node) in self.nodes.iter().enumerate() {
            node.check(index)?;
            for &pred in &node.input_nodes {
                if pred >= self.nodes.len() {
                    return Err(WorkflowError::InvalidDefinition(format!(
                        "node {index} references missing node {pred}"
                    )));
                }
                if self.nodes[pred].node_type == NodeType::Output {
                    return Err(WorkflowError::Ordering(format!(
                        "node {index} depends on output node {pred}"
                    )));
                }
            }
            if node.is_retrieval() {
                for &pred in &node.input_nodes {
                    if !self.nodes[pred].is_retrieval() {
                        return Err(WorkflowError::Ordering(format!(
                            "retrieval node {index} depends on non-retrieval node {pred}"
                        )));
                    }
                }
            }
        }

        let order = self.sorted_order()?;
        let validated = self.fuse(order);
        debug!(
            target: TRACING_TARGET,
            graph_id = %self.id,
            node_count = self.nodes.len(),
            executable_count = validated.nodes.len(),
            "graph validated"
        );
        Ok(validated)
    }

    /// Topological order with retrieval nodes front-loaded.
    ///
    /// Front-loading is always possible here: retrieval nodes only
    /// depend on retrieval nodes, which validation has already
    /// checked.
    fn sorted_order(&self) -> WorkflowResult<Vec<usize>> {
        let mut graph = DiGraph::<usize, ()>::new();
        let indices: Vec<_> = (0..self.nodes.len()).map(|i| graph.add_node(i)).collect();
        for (index, node) in self.nodes.iter().enumerate() {
            for &pred in &node.input_nodes {
                graph.add_edge(indices[pred], indices[index], ());
            }
        }

        let sorted = toposort(&graph, None).map_err(|_| WorkflowError::Cycle {
            nodes: self.unresolved_nodes(),
        })?;
        let topo: Vec<usize> = sorted.into_iter().map(|ix| graph[ix]).collect();

        let (retrieval, rest): (Vec<usize>, Vec<usize>) = topo
            .into_iter()
            .partition(|&index| self.nodes[index].is_retrieval());
        Ok(retrieval.into_iter().chain(rest).collect())
    }

    /// Kahn's algorithm leftover: the subset of nodes that cannot be
    /// topologically resolved.
    fn unresolved_nodes(&self) -> Vec<usize> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut successors = vec![Vec::new(); self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            in_degree[index] = node.input_nodes.len();
            for &pred in &node.input_nodes {
                successors[pred].push(index);
            }
        }

        let mut queue: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        while let Some(index) = queue.pop_front() {
            for &next in &successors[index] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        (0..self.nodes.len())
            .filter(|&i| in_degree[i] > 0)
            .collect()
    }

    /// Rebuilds the arena in execution order, fusing the leading run
    /// of retrieval nodes into a single node whose step list is the
    /// concatenation in encountered order.
    ///
    /// Fusion is observationally equivalent to compiling the members
    /// one after another; dependents' predecessor lists are remapped
    /// onto the fused index and de-duplicated.
    fn fuse(&self, order: Vec<usize>) -> ValidatedGraph {
        let retrieval_run: Vec<usize> = order
            .iter()
            .copied()
            .take_while(|&index| self.nodes[index].is_retrieval())
            .collect();

        let mut mapping = vec![usize::MAX; self.nodes.len()];
        let mut nodes = Vec::new();

        if retrieval_run.len() > 1 {
            let steps = retrieval_run
                .iter()
                .flat_map(|&index| match &self.nodes[index].payload {
                    NodePayload::DocumentQuery(params) => params.steps.clone(),
                    _ => Vec::new(),
                })
                .collect();
            for &index in &retrieval_run {
                mapping[index] = 0;
            }
            nodes.push(Node::new(
                NodeType::Input,
                NodePayload::DocumentQuery(DocumentQueryParams { steps }),
            ));
        }

        for &index in &order {
            if mapping[index] != usize::MAX {
                continue;
            }
            mapping[index] = nodes.len();
            nodes.push(self.nodes[index].clone());
        }

        for node in &mut nodes {
            let mut inputs = Vec::with_capacity(node.input_nodes.len());
            for &pred in &node.input_nodes {
                let mapped = mapping[pred];
                if !inputs.contains(&mapped) {
                    inputs.push(mapped);
                }
            }
            node.input_nodes = inputs;
        }
        // The fused node absorbed its members' internal edges.
        if retrieval_run.len() > 1 {
            nodes[0].input_nodes.clear();
        }

        ValidatedGraph {
            graph_id: self.id,
            project_id: self.project_id,
            nodes,
        }
    }
}

/// The executable form of a graph: nodes in execution order, every
/// predecessor index pointing at an earlier node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedGraph {
    /// Source graph.
    pub graph_id: GraphId,
    /// Project the graph operates on.
    pub project_id: ProjectId,
    /// Nodes in execution order.
    pub nodes: Vec<Node>,
}

#[cfg(test)]
mod tests {
    use anno_query::stage::{LimitStage, SkipStage, Stage};
    use uuid::Uuid;

    use crate::graph::{DatasetSnapshotParams, MergeParams, MergePolicy};

    use super::*;

    fn project() -> ProjectId {
        ProjectId::from_uuid(Uuid::from_u128(5))
    }

    fn retrieval(steps: Vec<Stage>) -> Node {
        Node::new(
            NodeType::Input,
            NodePayload::DocumentQuery(DocumentQueryParams { steps }),
        )
    }

    fn merge() -> Node {
        Node::new(
            NodeType::Processing,
            NodePayload::Merge(MergeParams {
                policy: MergePolicy::Outer,
                callback_url: None,
            }),
        )
    }

    fn snapshot_output() -> Node {
        Node::new(
            NodeType::Output,
            NodePayload::DatasetSnapshot(DatasetSnapshotParams {
                dataset_id: anno_core::DatasetId::from_uuid(Uuid::from_u128(77)),
            }),
        )
    }

    #[test]
    fn test_execution_order_respects_predecessors() {
        let mut graph = PipelineGraph::new(project(), "ordered");
        let a = graph.push_node(retrieval(vec![Stage::Limit(LimitStage::new(10))]));
        let b = graph.push_node(
            Node::new(NodeType::Processing, NodePayload::PassThrough).with_inputs(vec![a]),
        );
        graph.push_node(snapshot_output().with_inputs(vec![b]));

        let validated = graph.check().unwrap();
        for (index, node) in validated.nodes.iter().enumerate() {
            for &pred in &node.input_nodes {
                assert!(pred < index);
            }
        }
    }

    #[test]
    fn test_cycle_is_named() {
        let mut graph = PipelineGraph::new(project(), "cyclic");
        graph.push_node(retrieval(Vec::new()));
        graph.push_node(
            Node::new(NodeType::Processing, NodePayload::PassThrough).with_inputs(vec![2]),
        );
        graph.push_node(
            Node::new(NodeType::Processing, NodePayload::PassThrough).with_inputs(vec![1]),
        );

        let err = graph.check().unwrap_err();
        match err {
            WorkflowError::Cycle { nodes } => assert_eq!(nodes, vec![1, 2]),
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_depending_on_an_output_node_is_rejected() {
        let mut graph = PipelineGraph::new(project(), "bad-output");
        let a = graph.push_node(retrieval(Vec::new()));
        let out = graph.push_node(snapshot_output().with_inputs(vec![a]));
        graph.push_node(
            Node::new(NodeType::Processing, NodePayload::PassThrough).with_inputs(vec![out]),
        );

        assert!(matches!(
            graph.check().unwrap_err(),
            WorkflowError::Ordering(_)
        ));
    }

    #[test]
    fn test_retrieval_after_processing_is_rejected() {
        let mut graph = PipelineGraph::new(project(), "late-retrieval");
        let a = graph.push_node(retrieval(Vec::new()));
        let b = graph.push_node(
            Node::new(NodeType::Processing, NodePayload::PassThrough).with_inputs(vec![a]),
        );
        graph.push_node(
            Node::new(
                NodeType::Processing,
                NodePayload::DocumentQuery(DocumentQueryParams { steps: Vec::new() }),
            )
            .with_inputs(vec![b]),
        );

        assert!(matches!(
            graph.check().unwrap_err(),
            WorkflowError::Ordering(_)
        ));
    }

    #[test]
    fn test_parallel_retrieval_nodes_fuse_in_order() {
        let steps_a = vec![Stage::Skip(SkipStage::new(5))];
        let steps_b = vec![Stage::Limit(LimitStage::new(10))];

        let mut graph = PipelineGraph::new(project(), "fused");
        let a = graph.push_node(retrieval(steps_a.clone()));
        let b = graph.push_node(retrieval(steps_b.clone()));
        let m = graph.push_node(merge().with_inputs(vec![a, b]));
        graph.push_node(snapshot_output().with_inputs(vec![m]));

        let validated = graph.check().unwrap();
        assert_eq!(validated.nodes.len(), 3);

        let NodePayload::DocumentQuery(params) = &validated.nodes[0].payload else {
            panic!("fused node must be a retrieval node");
        };
        let expected: Vec<Stage> = steps_a.into_iter().chain(steps_b).collect();
        assert_eq!(params.steps, expected);

        // Both merge inputs collapse onto the fused node.
        assert_eq!(validated.nodes[1].input_nodes, vec![0]);
        assert_eq!(validated.nodes[2].input_nodes, vec![1]);
    }

    #[test]
    fn test_single_retrieval_node_is_not_rewritten() {
        let mut graph = PipelineGraph::new(project(), "single");
        let a = graph.push_node(retrieval(vec![Stage::Limit(LimitStage::new(1))]));
        graph.push_node(snapshot_output().with_inputs(vec![a]));

        let validated = graph.check().unwrap();
        assert_eq!(validated.nodes.len(), 2);
        assert_eq!(validated.nodes[0], graph.nodes[0]);
    }

    #[test]
    fn test_deleted_graph_cannot_be_validated() {
        let mut graph = PipelineGraph::new(project(), "gone");
        graph.push_node(retrieval(Vec::new()));
        graph.deleted = true;
        assert!(matches!(
            graph.check().unwrap_err(),
            WorkflowError::InvalidDefinition(_)
        ));
    }
}
