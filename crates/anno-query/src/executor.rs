//! Query execution against the document store.
//!
//! The executor owns the validate, compile, run, enrich, persist
//! sequence. Validation is all-or-nothing: the first failing stage
//! aborts the request before anything reaches the store, so a rejected
//! pipeline is never partially applied.

use std::sync::Arc;

use anno_core::{
    AnnotationRecord, DocumentStore, ImageInfo, MediaStore, Page, PageRequest, ProjectId,
    ProjectVocabulary, QueryPipelineId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::TRACING_TARGET;
use crate::error::{QueryError, QueryResult};
use crate::pipeline::compile_pipeline;
use crate::stage::{Stage, describe_stages};

/// A record joined with the presentation info of its image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    /// The annotation record.
    #[serde(flatten)]
    pub record: AnnotationRecord,
    /// Presentation URLs and dimensions, when the record has an image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageInfo>,
}

/// Result of one accepted query: the page plus the id of the persisted
/// audit pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    /// Id of the immutable audit copy of the accepted step list.
    pub pipeline_id: QueryPipelineId,
    /// The requested result window.
    pub page: Page<EnrichedRecord>,
}

/// Validates, compiles, and runs stage lists against a project.
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn DocumentStore>,
    media: Arc<dyn MediaStore>,
}

impl QueryExecutor {
    /// Creates an executor over the given collaborators.
    pub fn new(store: Arc<dyn DocumentStore>, media: Arc<dyn MediaStore>) -> Self {
        Self { store, media }
    }

    /// Describes every registered stage under the project's current
    /// vocabulary.
    pub async fn describe(&self, project: ProjectId) -> QueryResult<Value> {
        let vocab = self.store.vocabulary(project).await?;
        Ok(describe_stages(&vocab))
    }

    /// Validates every stage against the project vocabulary; the first
    /// failure aborts with the offending stage named.
    pub fn validate(&self, stages: &[Stage], vocab: &ProjectVocabulary) -> QueryResult<()> {
        for stage in stages {
            stage
                .validate(vocab)
                .map_err(|err| QueryError::for_stage(stage.kind().into(), err))?;
        }
        Ok(())
    }

    /// Runs an accepted stage list and returns the enriched page along
    /// with the persisted audit pipeline id.
    pub async fn run(
        &self,
        project: ProjectId,
        stages: &[Stage],
        page: Option<PageRequest>,
    ) -> QueryResult<QueryOutcome> {
        let vocab = self.store.vocabulary(project).await?;
        self.validate(stages, &vocab)?;

        let ops = compile_pipeline(project, stages, page)?;
        debug!(
            target: TRACING_TARGET,
            project_id = %project,
            stage_count = stages.len(),
            op_count = ops.len(),
            "compiled query pipeline"
        );

        let raw = self.store.run_pipeline(project, ops).await?;
        let records: Page<AnnotationRecord> = raw.normalize()?;

        let mut data = Vec::with_capacity(records.data.len());
        for record in records.data {
            let image = if record.has_image {
                self.media.image_info(project, &record.event_id).await?
            } else {
                None
            };
            data.push(EnrichedRecord { record, image });
        }

        let steps = stages
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let pipeline_id = self.store.save_query_pipeline(project, steps).await?;

        info!(
            target: TRACING_TARGET,
            project_id = %project,
            pipeline_id = %pipeline_id,
            total = records.pagination.total,
            returned = data.len(),
            "query executed"
        );

        Ok(QueryOutcome {
            pipeline_id,
            page: Page {
                data,
                pagination: records.pagination,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use anno_core::mock::{MockMedia, MockStore};
    use anno_core::{Detection, LabelDescriptor, Shape};
    use serde_json::json;
    use uuid::Uuid;

    use crate::expr::Expr;
    use crate::stage::{LabelSelector, LimitStage, MatchStage, SelectLabelsStage};

    use super::*;

    fn project() -> ProjectId {
        ProjectId::from_uuid(Uuid::from_u128(9))
    }

    fn vocab() -> ProjectVocabulary {
        ProjectVocabulary::new(
            vec![LabelDescriptor {
                name: "cat".into(),
                shape: Shape::Box,
                group: "ground_truth".into(),
                attributes: vec![],
            }],
            vec![],
        )
    }

    fn records() -> Vec<AnnotationRecord> {
        let mut with_image = AnnotationRecord::new("evt-1", project());
        with_image.has_image = true;
        with_image
            .detections
            .push(Detection::new("cat", [0.1, 0.1, 0.2, 0.2]).unwrap());
        let without_image = AnnotationRecord::new("evt-2", project());
        vec![with_image, without_image]
    }

    fn executor(store: Arc<MockStore>) -> QueryExecutor {
        let media = Arc::new(MockMedia::new(["evt-1"]));
        QueryExecutor::new(store, media)
    }

    #[tokio::test]
    async fn test_run_enriches_and_persists() {
        let store = Arc::new(MockStore::new(records(), vocab()));
        let executor = executor(store.clone());

        let stages = vec![Stage::Limit(LimitStage::new(10))];
        let outcome = executor.run(project(), &stages, None).await.unwrap();

        assert_eq!(outcome.page.data.len(), 2);
        assert_eq!(outcome.page.pagination.total, 2);
        assert!(outcome.page.data[0].image.is_some());
        assert!(outcome.page.data[1].image.is_none());

        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0], vec![json!({ "stage": "limit", "limit": 10 })]);
    }

    #[tokio::test]
    async fn test_invalid_stage_aborts_before_the_store() {
        let store = Arc::new(MockStore::new(records(), vocab()));
        let executor = executor(store.clone());

        let stages = vec![
            Stage::Limit(LimitStage::new(10)),
            Stage::SelectLabels(SelectLabelsStage::new(vec![LabelSelector::new(
                "bird",
                Shape::Box,
            )])),
        ];
        let err = executor.run(project(), &stages, None).await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::InvalidStage { stage: "select_labels", .. }
        ));
        assert_eq!(store.executed_count(), 0);
        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_executed_pipeline_is_scoped_and_faceted() {
        let store = Arc::new(MockStore::new(records(), vocab()));
        let executor = executor(store.clone());

        let stages = vec![Stage::Match(MatchStage::new(
            Expr::field("has_image").eq(Expr::literal(true)),
        ))];
        executor
            .run(project(), &stages, Some(PageRequest::new(0, 25)))
            .await
            .unwrap();

        let executed = store.executed.lock().unwrap();
        let ops = &executed[0];
        assert!(ops.first().unwrap()["$match"]["project_id"].is_string());
        assert!(ops.last().unwrap().get("$facet").is_some());
    }

    #[tokio::test]
    async fn test_describe_reflects_the_vocabulary() {
        let store = Arc::new(MockStore::new(Vec::new(), vocab()));
        let executor = executor(store);

        let described = executor.describe(project()).await.unwrap();
        let names = described["select_labels"]["properties"]["labels"]["items"]["properties"]
            ["name"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(names, &vec![json!("cat")]);
    }
}
