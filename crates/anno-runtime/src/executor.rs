//! Asynchronous execution of validated workflow graphs.
//!
//! Scheduling and execution are decoupled: `schedule` re-validates the
//! graph, creates the run, and submits the job handle to the queue,
//! returning immediately. A worker later calls `execute` with the
//! validated graph; node failures land on the run as a `failed` status
//! with the error message, never as an error thrown to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use anno_core::{
    AnnotationRecord, CallbackClient, JobQueue, JobSpec, ProjectId, RunId, SnapshotStore,
};
use anno_query::QueryExecutor;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::TRACING_TARGET;
use crate::error::{WorkflowError, WorkflowResult};
use crate::graph::{Node, NodePayload, NodeType, PipelineGraph, ValidatedGraph};
use crate::merge::merge_records;
use crate::run::{PipelineRun, RunStatus};

/// Queue-visible name of workflow run jobs.
const RUN_JOB_NAME: &str = "pipeline_run";

/// Schedules and executes workflow runs.
pub struct WorkflowExecutor {
    query: QueryExecutor,
    snapshots: Arc<dyn SnapshotStore>,
    callbacks: Arc<dyn CallbackClient>,
    queue: Arc<dyn JobQueue>,
    runs: RwLock<HashMap<RunId, PipelineRun>>,
}

impl WorkflowExecutor {
    /// Creates an executor over the given collaborators.
    pub fn new(
        query: QueryExecutor,
        snapshots: Arc<dyn SnapshotStore>,
        callbacks: Arc<dyn CallbackClient>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            query,
            snapshots,
            callbacks,
            queue,
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Re-validates the graph, creates a run, and submits it to the
    /// job queue. Fire and forget: the run is returned immediately in
    /// its `scheduled` state.
    pub async fn schedule(
        &self,
        graph: &PipelineGraph,
        scheduled_by: Option<String>,
    ) -> WorkflowResult<PipelineRun> {
        let validated = graph.check()?;
        let payload = serde_json::to_value(&validated)?;

        // Workers resolve the run id from the job payload, possibly
        // before `submit` returns, so the run must already be
        // registered when the job goes out.
        let mut run = PipelineRun::new(graph.id, scheduled_by);
        self.runs.write().await.insert(run.id, run.clone());

        let submitted = self
            .queue
            .submit(JobSpec {
                name: RUN_JOB_NAME.to_string(),
                run_id: Some(run.id),
                payload,
            })
            .await;
        let job = match submitted {
            Ok(job) => job,
            Err(err) => {
                self.runs.write().await.remove(&run.id);
                return Err(err.into());
            }
        };

        run.job = Some(job.clone());
        self.with_run(run.id, |stored| {
            stored.job = Some(job);
            Ok(())
        })
        .await?;

        info!(
            target: TRACING_TARGET,
            graph_id = %graph.id,
            run_id = %run.id,
            node_count = validated.nodes.len(),
            "run scheduled"
        );

        Ok(run)
    }

    /// Snapshot of a run's current state.
    pub async fn run(&self, id: RunId) -> Option<PipelineRun> {
        self.runs.read().await.get(&id).cloned()
    }

    /// Current status of a run.
    pub async fn run_status(&self, id: RunId) -> WorkflowResult<RunStatus> {
        self.run(id)
            .await
            .map(|run| run.status)
            .ok_or(WorkflowError::UnknownRun(id))
    }

    /// Executes a validated graph under a scheduled run.
    ///
    /// The outcome is recorded on the run: any node failure moves it
    /// to `failed` with the error message, success sets `finished_at`.
    /// The returned status mirrors what the run was left in.
    pub async fn execute(
        &self,
        validated: &ValidatedGraph,
        run_id: RunId,
    ) -> WorkflowResult<RunStatus> {
        self.with_run(run_id, |run| run.start()).await?;
        info!(
            target: TRACING_TARGET,
            run_id = %run_id,
            graph_id = %validated.graph_id,
            "run started"
        );

        match self.run_nodes(validated).await {
            Ok(()) => {
                self.with_run(run_id, |run| run.succeed()).await?;
                info!(target: TRACING_TARGET, run_id = %run_id, "run succeeded");
                Ok(RunStatus::Success)
            }
            Err(err) => {
                warn!(target: TRACING_TARGET, run_id = %run_id, error = %err, "run failed");
                self.with_run(run_id, |run| run.fail(err.to_string())).await?;
                Ok(RunStatus::Failed)
            }
        }
    }

    async fn with_run(
        &self,
        id: RunId,
        apply: impl FnOnce(&mut PipelineRun) -> WorkflowResult<()>,
    ) -> WorkflowResult<()> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&id).ok_or(WorkflowError::UnknownRun(id))?;
        apply(run)
    }

    /// Walks the nodes in order, feeding each handler its
    /// predecessors' outputs from the accumulating arena.
    async fn run_nodes(&self, validated: &ValidatedGraph) -> WorkflowResult<()> {
        let mut outputs: Vec<Option<Vec<AnnotationRecord>>> = vec![None; validated.nodes.len()];

        for (index, node) in validated.nodes.iter().enumerate() {
            let inputs = gather_inputs(&outputs, node, index)?;
            outputs[index] = self
                .handle_node(validated.project_id, index, node, inputs)
                .await?;
        }
        Ok(())
    }

    /// Handlers keyed by the `(type, operation)` pair. Output nodes
    /// produce no consumable output.
    async fn handle_node(
        &self,
        project: ProjectId,
        index: usize,
        node: &Node,
        inputs: Vec<Vec<AnnotationRecord>>,
    ) -> WorkflowResult<Option<Vec<AnnotationRecord>>> {
        let failed = |message: String| WorkflowError::NodeFailed { index, message };

        match (&node.node_type, &node.payload) {
            (NodeType::Input | NodeType::Processing, NodePayload::DocumentQuery(params)) => {
                let outcome = self
                    .query
                    .run(project, &params.steps, None)
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                let records = outcome
                    .page
                    .data
                    .into_iter()
                    .map(|enriched| enriched.record)
                    .collect();
                Ok(Some(records))
            }
            (NodeType::Input, NodePayload::DatasetSnapshot(params)) => {
                let records = self
                    .snapshots
                    .read(params.dataset_id)
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                Ok(Some(records))
            }
            (NodeType::Input, NodePayload::Revision(params)) => {
                let records = self
                    .snapshots
                    .read_revision(params.revision_id)
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                Ok(Some(records))
            }
            (NodeType::Processing, NodePayload::ExternalCallback(params)) => {
                let records = concat(inputs);
                let answered = self
                    .callbacks
                    .call(&params.url, records)
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                Ok(Some(answered))
            }
            (NodeType::Processing, NodePayload::Merge(params)) => {
                let mut inputs = inputs.into_iter();
                match (inputs.next(), inputs.next(), inputs.next()) {
                    // Retrieval fusion can collapse both sides onto one
                    // predecessor; nothing is left to merge then.
                    (Some(only), None, None) => Ok(Some(only)),
                    (Some(left), Some(right), None) => {
                        let merged = merge_records(params, left, right, &self.callbacks)
                            .await
                            .map_err(|e| failed(e.to_string()))?;
                        Ok(Some(merged))
                    }
                    _ => Err(failed("merge expects one or two inputs".into())),
                }
            }
            (NodeType::Processing, NodePayload::PassThrough) => Ok(Some(concat(inputs))),
            (NodeType::Output, NodePayload::DatasetSnapshot(params)) => {
                self.snapshots
                    .write(params.dataset_id, concat(inputs))
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                Ok(None)
            }
            (NodeType::Output, NodePayload::Revision(params)) => {
                self.snapshots
                    .write_revision(params.revision_id, concat(inputs))
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                Ok(None)
            }
            (NodeType::Output, NodePayload::PassThrough) => Ok(None),
            _ => Err(failed(format!(
                "{} node cannot perform {}",
                node.node_type,
                node.payload.kind()
            ))),
        }
    }
}

fn gather_inputs(
    outputs: &[Option<Vec<AnnotationRecord>>],
    node: &Node,
    index: usize,
) -> WorkflowResult<Vec<Vec<AnnotationRecord>>> {
    node.input_nodes
        .iter()
        .map(|&pred| {
            outputs
                .get(pred)
                .and_then(Clone::clone)
                .ok_or_else(|| WorkflowError::NodeFailed {
                    index,
                    message: format!("predecessor {pred} produced no output"),
                })
        })
        .collect()
}

fn concat(inputs: Vec<Vec<AnnotationRecord>>) -> Vec<AnnotationRecord> {
    inputs.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use anno_core::mock::{MockCallback, MockMedia, MockQueue, MockSnapshots, MockStore};
    use anno_core::{CoreResult, DatasetId, Detection, JobHandle, JobStatus, ProjectVocabulary};
    use async_trait::async_trait;
    use tokio::sync::{Mutex, mpsc};
    use anno_query::stage::{LimitStage, SkipStage, Stage};
    use uuid::Uuid;

    use crate::graph::{
        DatasetSnapshotParams, DocumentQueryParams, MergeParams, MergePolicy,
    };

    use super::*;

    fn project() -> ProjectId {
        ProjectId::from_uuid(Uuid::from_u128(11))
    }

    fn records() -> Vec<AnnotationRecord> {
        let mut record = AnnotationRecord::new("evt-1", project());
        record
            .detections
            .push(Detection::new("cat", [0.1, 0.1, 0.2, 0.2]).unwrap());
        vec![record, AnnotationRecord::new("evt-2", project())]
    }

    struct Harness {
        executor: WorkflowExecutor,
        store: Arc<MockStore>,
        snapshots: Arc<MockSnapshots>,
        queue: Arc<MockQueue>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MockStore::new(records(), ProjectVocabulary::default()));
        let snapshots = Arc::new(MockSnapshots::default());
        let queue = Arc::new(MockQueue::default());
        let query = QueryExecutor::new(store.clone(), Arc::new(MockMedia::default()));
        let executor = WorkflowExecutor::new(
            query,
            snapshots.clone(),
            Arc::new(MockCallback::default()),
            queue.clone(),
        );
        Harness {
            executor,
            store,
            snapshots,
            queue,
        }
    }

    fn retrieval(steps: Vec<Stage>) -> Node {
        Node::new(
            NodeType::Input,
            NodePayload::DocumentQuery(DocumentQueryParams { steps }),
        )
    }

    /// Two parallel retrieval nodes feed a merge, which feeds a
    /// snapshot output.
    fn scenario_graph(dataset: DatasetId) -> PipelineGraph {
        let mut graph = PipelineGraph::new(project(), "scenario");
        let a = graph.push_node(retrieval(vec![Stage::Skip(SkipStage::new(0))]));
        let b = graph.push_node(retrieval(vec![Stage::Limit(LimitStage::new(100))]));
        let m = graph.push_node(
            Node::new(
                NodeType::Processing,
                NodePayload::Merge(MergeParams {
                    policy: MergePolicy::Outer,
                    callback_url: None,
                }),
            )
            .with_inputs(vec![a, b]),
        );
        graph.push_node(
            Node::new(
                NodeType::Output,
                NodePayload::DatasetSnapshot(DatasetSnapshotParams { dataset_id: dataset }),
            )
            .with_inputs(vec![m]),
        );
        graph
    }

    /// Hands the run id to an in-test worker and waits for its
    /// acknowledgement before `submit` returns, the way an eager
    /// out-of-process worker can pick a job up mid-submission.
    struct HandoffQueue {
        handoff: mpsc::Sender<RunId>,
        ack: Mutex<mpsc::Receiver<()>>,
    }

    #[async_trait]
    impl JobQueue for HandoffQueue {
        async fn submit(&self, job: JobSpec) -> CoreResult<JobHandle> {
            if let Some(run_id) = job.run_id {
                let _ = self.handoff.send(run_id).await;
                self.ack.lock().await.recv().await;
            }
            Ok(JobHandle("handoff-1".into()))
        }

        async fn status(&self, _handle: &JobHandle) -> CoreResult<JobStatus> {
            Ok(JobStatus::Queued)
        }
    }

    #[tokio::test]
    async fn test_run_is_visible_while_submit_is_in_flight() {
        let (handoff_tx, mut handoff_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = mpsc::channel(1);
        let queue = Arc::new(HandoffQueue {
            handoff: handoff_tx,
            ack: Mutex::new(ack_rx),
        });

        let store = Arc::new(MockStore::new(records(), ProjectVocabulary::default()));
        let query = QueryExecutor::new(store, Arc::new(MockMedia::default()));
        let executor = Arc::new(WorkflowExecutor::new(
            query,
            Arc::new(MockSnapshots::default()),
            Arc::new(MockCallback::default()),
            queue,
        ));

        let worker = {
            let executor = executor.clone();
            tokio::spawn(async move {
                let run_id = handoff_rx.recv().await.unwrap();
                let status = executor.run_status(run_id).await;
                ack_tx.send(()).await.unwrap();
                status
            })
        };

        let graph = scenario_graph(DatasetId::new());
        let run = executor.schedule(&graph, None).await.unwrap();

        // The worker's lookup happened while `submit` was blocked.
        let seen_mid_submit = worker.await.unwrap().unwrap();
        assert_eq!(seen_mid_submit, RunStatus::Scheduled);

        assert!(run.job.is_some());
        assert_eq!(executor.run(run.id).await.unwrap().job, run.job);
    }

    #[tokio::test]
    async fn test_schedule_submits_one_job() {
        let harness = harness();
        let graph = scenario_graph(DatasetId::new());

        let run = harness
            .executor
            .schedule(&graph, Some("tester".into()))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Scheduled);
        assert!(run.job.is_some());
        assert_eq!(
            harness.executor.run_status(run.id).await.unwrap(),
            RunStatus::Scheduled
        );

        let submitted = harness.queue.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].name, "pipeline_run");
        assert_eq!(submitted[0].run_id, Some(run.id));
    }

    #[tokio::test]
    async fn test_scenario_executes_fused_and_persists() {
        let harness = harness();
        let dataset = DatasetId::new();
        let graph = scenario_graph(dataset);

        let run = harness.executor.schedule(&graph, None).await.unwrap();
        let validated = graph.check().unwrap();
        assert_eq!(validated.nodes.len(), 3);

        let status = harness.executor.execute(&validated, run.id).await.unwrap();
        assert_eq!(status, RunStatus::Success);

        // Both retrieval nodes collapsed into one store round trip.
        assert_eq!(harness.store.executed_count(), 1);

        let written = harness.snapshots.read(dataset).await.unwrap();
        assert_eq!(written.len(), 2);

        let run = harness.executor.run(run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.finished_at.is_some());
        assert!(run.error.is_none());
    }

    #[tokio::test]
    async fn test_node_failure_lands_on_the_run() {
        let harness = harness();
        let mut graph = PipelineGraph::new(project(), "missing-dataset");
        // Reads a dataset nobody seeded.
        let a = graph.push_node(Node::new(
            NodeType::Input,
            NodePayload::DatasetSnapshot(DatasetSnapshotParams {
                dataset_id: DatasetId::new(),
            }),
        ));
        graph.push_node(
            Node::new(NodeType::Output, NodePayload::PassThrough).with_inputs(vec![a]),
        );

        let run = harness.executor.schedule(&graph, None).await.unwrap();
        let validated = graph.check().unwrap();

        let status = harness.executor.execute(&validated, run.id).await.unwrap();
        assert_eq!(status, RunStatus::Failed);

        let run = harness.executor.run(run.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.as_deref().unwrap_or("").contains("node 0"));
    }

    #[tokio::test]
    async fn test_invalid_graph_is_never_scheduled() {
        let harness = harness();
        let mut graph = PipelineGraph::new(project(), "edge-out-of-output");
        let a = graph.push_node(retrieval(Vec::new()));
        let out = graph.push_node(
            Node::new(NodeType::Output, NodePayload::PassThrough).with_inputs(vec![a]),
        );
        graph.push_node(
            Node::new(NodeType::Processing, NodePayload::PassThrough).with_inputs(vec![out]),
        );

        let err = harness.executor.schedule(&graph, None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Ordering(_)));
        assert!(harness.queue.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_runs_reject_re_execution() {
        let harness = harness();
        let graph = scenario_graph(DatasetId::new());
        let run = harness.executor.schedule(&graph, None).await.unwrap();
        let validated = graph.check().unwrap();

        harness.executor.execute(&validated, run.id).await.unwrap();
        let err = harness.executor.execute(&validated, run.id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }
}
