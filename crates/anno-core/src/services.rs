//! Collaborator interfaces consumed by the query and runtime crates.
//!
//! These traits are the narrow seams to the outer platform: the document
//! store's aggregation engine, object-storage URL issuance, background
//! job submission, dataset snapshot IO, and external webhook calls. The
//! core crates depend only on these contracts; concrete implementations
//! live with the server, and [`crate::mock`] provides in-memory versions
//! for tests.

use async_trait::async_trait;
use serde_json::Value;

use crate::annotation::AnnotationRecord;
use crate::error::CoreResult;
use crate::id::{DatasetId, ProjectId, QueryPipelineId, RunId};
use crate::page::RawQueryResult;
use crate::vocabulary::ProjectVocabulary;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Presentation metadata for the image behind a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Presigned URL for the full image.
    pub url: String,
    /// Presigned URL for the thumbnail.
    pub thumbnail_url: String,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
}

/// Document-store aggregation engine.
///
/// Compiled pipelines are ordered lists of open operation documents
/// (match/set/sort/facet/unset style); the store owns their execution.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Runs a compiled operation list against a project's annotations.
    async fn run_pipeline(&self, project: ProjectId, ops: Vec<Value>) -> CoreResult<RawQueryResult>;

    /// Resolves the project's current label/attribute vocabulary.
    async fn vocabulary(&self, project: ProjectId) -> CoreResult<ProjectVocabulary>;

    /// Persists an accepted step list as an immutable audit pipeline.
    async fn save_query_pipeline(
        &self,
        project: ProjectId,
        steps: Vec<Value>,
    ) -> CoreResult<QueryPipelineId>;
}

/// Object-storage URL issuance for images and thumbnails.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Returns presentation info for an event's image, if one exists.
    async fn image_info(&self, project: ProjectId, event_id: &str) -> CoreResult<Option<ImageInfo>>;
}

/// Handle to a submitted background job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub String);

/// Observed state of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted but not yet picked up.
    Queued,
    /// Currently running.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

/// A background job submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Queue-visible job name.
    pub name: String,
    /// Run this job executes, when it is a workflow run.
    pub run_id: Option<RunId>,
    /// Opaque job payload.
    pub payload: Value,
}

/// Background job submission and status polling.
///
/// Submission is fire-and-forget: the caller receives a handle
/// immediately and observes completion separately.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submits a job and returns its handle.
    async fn submit(&self, job: JobSpec) -> CoreResult<JobHandle>;

    /// Polls the status of a previously submitted job.
    async fn status(&self, handle: &JobHandle) -> CoreResult<JobStatus>;
}

/// Dataset snapshot and revision working-set IO.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Reads all records captured by a dataset snapshot.
    async fn read(&self, dataset: DatasetId) -> CoreResult<Vec<AnnotationRecord>>;

    /// Writes records into a dataset snapshot.
    async fn write(&self, dataset: DatasetId, records: Vec<AnnotationRecord>) -> CoreResult<()>;

    /// Reads the working set of a revision.
    async fn read_revision(&self, revision: Uuid) -> CoreResult<Vec<AnnotationRecord>>;

    /// Writes records into a revision's working set.
    async fn write_revision(&self, revision: Uuid, records: Vec<AnnotationRecord>)
    -> CoreResult<()>;
}

/// Outbound webhook client for external-callback nodes and the
/// delegate merge policy.
#[async_trait]
pub trait CallbackClient: Send + Sync {
    /// Posts records to an external URL and returns the records it
    /// answered with.
    async fn call(&self, url: &str, records: Vec<AnnotationRecord>)
    -> CoreResult<Vec<AnnotationRecord>>;
}
