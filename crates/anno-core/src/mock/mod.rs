//! In-memory mock collaborators for testing.
//!
//! These mocks implement the [`crate::services`] traits with canned
//! data and invocation recording, so the query executor and workflow
//! executor can be exercised without a store, queue, or network.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::annotation::AnnotationRecord;
use crate::error::{CoreError, CoreResult};
use crate::id::{DatasetId, ProjectId, QueryPipelineId};
use crate::page::{RawMetadata, RawQueryResult};
use crate::services::{
    CallbackClient, DocumentStore, ImageInfo, JobHandle, JobQueue, JobSpec, JobStatus, MediaStore,
    SnapshotStore,
};
use crate::vocabulary::ProjectVocabulary;

/// Mock document store answering every pipeline with a canned record set.
#[derive(Debug, Default)]
pub struct MockStore {
    records: Vec<AnnotationRecord>,
    vocabulary: ProjectVocabulary,
    /// Operation lists executed through [`DocumentStore::run_pipeline`].
    pub executed: Mutex<Vec<Vec<Value>>>,
    /// Step lists persisted through `save_query_pipeline`.
    pub saved: Mutex<Vec<Vec<Value>>>,
}

impl MockStore {
    /// Creates a store that serves the given records and vocabulary.
    pub fn new(records: Vec<AnnotationRecord>, vocabulary: ProjectVocabulary) -> Self {
        Self {
            records,
            vocabulary,
            executed: Mutex::new(Vec::new()),
            saved: Mutex::new(Vec::new()),
        }
    }

    /// Number of pipelines executed so far.
    pub fn executed_count(&self) -> usize {
        self.executed.lock().map(|e| e.len()).unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MockStore {
    async fn run_pipeline(&self, _project: ProjectId, ops: Vec<Value>) -> CoreResult<RawQueryResult> {
        let data = self
            .records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let metadata = vec![RawMetadata {
            total: data.len() as u64,
            page: None,
        }];

        if let Ok(mut executed) = self.executed.lock() {
            executed.push(ops);
        }

        Ok(RawQueryResult { data, metadata })
    }

    async fn vocabulary(&self, _project: ProjectId) -> CoreResult<ProjectVocabulary> {
        Ok(self.vocabulary.clone())
    }

    async fn save_query_pipeline(
        &self,
        _project: ProjectId,
        steps: Vec<Value>,
    ) -> CoreResult<QueryPipelineId> {
        if let Ok(mut saved) = self.saved.lock() {
            saved.push(steps);
        }
        Ok(QueryPipelineId::new())
    }
}

/// Mock media store issuing URLs for a fixed set of event ids.
#[derive(Debug, Default)]
pub struct MockMedia {
    /// Event ids that have an image.
    pub events: Vec<String>,
}

impl MockMedia {
    /// Creates a media store knowing the given event ids.
    pub fn new(events: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            events: events.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl MediaStore for MockMedia {
    async fn image_info(&self, _project: ProjectId, event_id: &str) -> CoreResult<Option<ImageInfo>> {
        if !self.events.iter().any(|e| e == event_id) {
            return Ok(None);
        }

        Ok(Some(ImageInfo {
            url: format!("https://media.test/{event_id}"),
            thumbnail_url: format!("https://media.test/{event_id}/thumb"),
            width: 1920,
            height: 1080,
        }))
    }
}

/// Mock job queue recording submissions and completing them immediately.
#[derive(Debug, Default)]
pub struct MockQueue {
    counter: AtomicU64,
    /// Jobs submitted so far.
    pub submitted: Mutex<Vec<JobSpec>>,
}

#[async_trait]
impl JobQueue for MockQueue {
    async fn submit(&self, job: JobSpec) -> CoreResult<JobHandle> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.push(job);
        }
        Ok(JobHandle(format!("job-{n}")))
    }

    async fn status(&self, _handle: &JobHandle) -> CoreResult<JobStatus> {
        Ok(JobStatus::Completed)
    }
}

/// Mock snapshot store keeping datasets and revisions in memory.
#[derive(Debug, Default)]
pub struct MockSnapshots {
    datasets: Mutex<HashMap<DatasetId, Vec<AnnotationRecord>>>,
    revisions: Mutex<HashMap<Uuid, Vec<AnnotationRecord>>>,
}

impl MockSnapshots {
    /// Seeds a dataset with records.
    pub fn seed(&self, dataset: DatasetId, records: Vec<AnnotationRecord>) {
        if let Ok(mut datasets) = self.datasets.lock() {
            datasets.insert(dataset, records);
        }
    }

    /// Seeds a revision working set with records.
    pub fn seed_revision(&self, revision: Uuid, records: Vec<AnnotationRecord>) {
        if let Ok(mut revisions) = self.revisions.lock() {
            revisions.insert(revision, records);
        }
    }
}

#[async_trait]
impl SnapshotStore for MockSnapshots {
    async fn read(&self, dataset: DatasetId) -> CoreResult<Vec<AnnotationRecord>> {
        let datasets = self
            .datasets
            .lock()
            .map_err(|_| CoreError::Collaborator("snapshot lock poisoned".into()))?;
        datasets.get(&dataset).cloned().ok_or(CoreError::NotFound {
            entity: "dataset",
            id: dataset.to_string(),
        })
    }

    async fn write(&self, dataset: DatasetId, records: Vec<AnnotationRecord>) -> CoreResult<()> {
        let mut datasets = self
            .datasets
            .lock()
            .map_err(|_| CoreError::Collaborator("snapshot lock poisoned".into()))?;
        datasets.insert(dataset, records);
        Ok(())
    }

    async fn read_revision(&self, revision: Uuid) -> CoreResult<Vec<AnnotationRecord>> {
        let revisions = self
            .revisions
            .lock()
            .map_err(|_| CoreError::Collaborator("snapshot lock poisoned".into()))?;
        revisions.get(&revision).cloned().ok_or(CoreError::NotFound {
            entity: "revision",
            id: revision.to_string(),
        })
    }

    async fn write_revision(&self, revision: Uuid, records: Vec<AnnotationRecord>) -> CoreResult<()> {
        let mut revisions = self
            .revisions
            .lock()
            .map_err(|_| CoreError::Collaborator("snapshot lock poisoned".into()))?;
        revisions.insert(revision, records);
        Ok(())
    }
}

/// Mock callback client echoing the records it receives.
#[derive(Debug, Default)]
pub struct MockCallback {
    /// URLs called so far.
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl CallbackClient for MockCallback {
    async fn call(
        &self,
        url: &str,
        records: Vec<AnnotationRecord>,
    ) -> CoreResult<Vec<AnnotationRecord>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(url.to_string());
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_store_facet_shape() {
        let project = ProjectId::new();
        let record = AnnotationRecord::new("evt-1", project);
        let store = MockStore::new(vec![record], ProjectVocabulary::default());

        let raw = store.run_pipeline(project, vec![]).await.unwrap();
        assert_eq!(raw.data.len(), 1);
        assert_eq!(raw.metadata[0].total, 1);
        assert_eq!(store.executed_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_snapshots_roundtrip() {
        let snapshots = MockSnapshots::default();
        let dataset = DatasetId::new();
        let record = AnnotationRecord::new("evt-1", ProjectId::new());

        snapshots.write(dataset, vec![record.clone()]).await.unwrap();
        let read = snapshots.read(dataset).await.unwrap();
        assert_eq!(read, vec![record]);

        assert!(snapshots.read(DatasetId::new()).await.is_err());
    }
}
