//! Whole-pipeline compilation: project scoping, stage concatenation,
//! and the pagination facet.

use anno_core::{PageRequest, ProjectId};
use serde_json::{Value, json};

use crate::error::QueryResult;
use crate::stage::Stage;

/// Leading operation restricting a pipeline to one project's records.
pub fn project_scope_op(project: ProjectId) -> Value {
    json!({ "$match": { "project_id": project.to_string() } })
}

/// Trailing facet producing the data window and its metadata in one
/// store round trip.
///
/// Without a page request the data branch passes every record through
/// and the metadata carries only the total.
pub fn facet_op(page: Option<PageRequest>) -> Value {
    match page {
        Some(page) => json!({
            "$facet": {
                "metadata": [
                    { "$count": "total" },
                    { "$addFields": { "page": page.page } },
                ],
                "data": [
                    { "$skip": page.offset() },
                    { "$limit": page.page_size },
                ],
            }
        }),
        None => json!({
            "$facet": {
                "metadata": [{ "$count": "total" }],
                "data": [{ "$match": {} }],
            }
        }),
    }
}

/// Compiles an accepted stage list into the full operation list:
/// project scope, stage operations in order, then the facet.
pub fn compile_pipeline(
    project: ProjectId,
    stages: &[Stage],
    page: Option<PageRequest>,
) -> QueryResult<Vec<Value>> {
    let mut ops = vec![project_scope_op(project)];
    for stage in stages {
        ops.extend(stage.compile()?);
    }
    ops.push(facet_op(page));
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::stage::{LimitStage, SkipStage};

    use super::*;

    fn project() -> ProjectId {
        ProjectId::from_uuid(Uuid::from_u128(1))
    }

    #[test]
    fn test_pipeline_is_scope_stages_facet() {
        let stages = vec![
            Stage::Skip(SkipStage::new(10)),
            Stage::Limit(LimitStage::new(5)),
        ];
        let ops = compile_pipeline(project(), &stages, None).unwrap();
        assert_eq!(ops.len(), 4);
        assert_eq!(
            ops[0]["$match"]["project_id"],
            json!(project().to_string())
        );
        assert_eq!(ops[1], json!({ "$skip": 10 }));
        assert_eq!(ops[2], json!({ "$limit": 5 }));
        assert!(ops[3].get("$facet").is_some());
    }

    #[test]
    fn test_facet_windows_the_data_branch() {
        let facet = facet_op(Some(PageRequest::new(2, 25)));
        assert_eq!(
            facet["$facet"]["data"],
            json!([{ "$skip": 50 }, { "$limit": 25 }])
        );
        assert_eq!(
            facet["$facet"]["metadata"],
            json!([{ "$count": "total" }, { "$addFields": { "page": 2 } }])
        );
    }

    #[test]
    fn test_facet_without_a_page_passes_everything() {
        let facet = facet_op(None);
        assert_eq!(facet["$facet"]["data"], json!([{ "$match": {} }]));
        assert_eq!(facet["$facet"]["metadata"], json!([{ "$count": "total" }]));
    }

    #[test]
    fn test_empty_stage_list_still_compiles() {
        let ops = compile_pipeline(project(), &[], Some(PageRequest::new(0, 10))).unwrap();
        assert_eq!(ops.len(), 2);
    }
}
