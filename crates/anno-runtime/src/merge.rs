//! Merging two record streams keyed by event id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anno_core::{AnnotationRecord, CallbackClient};

use crate::error::{WorkflowError, WorkflowResult};
use crate::graph::{MergeParams, MergePolicy};

/// Merges `left` and `right` under the given policy.
///
/// Output order is the left stream's order followed by right-only
/// events in the right stream's order.
pub(crate) async fn merge_records(
    params: &MergeParams,
    left: Vec<AnnotationRecord>,
    right: Vec<AnnotationRecord>,
    callbacks: &Arc<dyn CallbackClient>,
) -> WorkflowResult<Vec<AnnotationRecord>> {
    match params.policy {
        MergePolicy::Left => Ok(biased(left, right)),
        MergePolicy::Right => Ok(biased(right, left)),
        MergePolicy::Outer => Ok(outer(left, right)),
        MergePolicy::Callback => {
            let url = params.callback_url.as_deref().ok_or_else(|| {
                WorkflowError::InvalidDefinition(
                    "callback merge policy requires a callback_url".into(),
                )
            })?;
            let combined = left.into_iter().chain(right).collect();
            Ok(callbacks.call(url, combined).await?)
        }
    }
}

/// Union of events where the preferred stream's record wins whole.
fn biased(
    preferred: Vec<AnnotationRecord>,
    other: Vec<AnnotationRecord>,
) -> Vec<AnnotationRecord> {
    let mut merged = preferred;
    let seen: HashSet<String> = merged
        .iter()
        .map(|record| record.event_id.clone())
        .collect();
    merged.extend(
        other
            .into_iter()
            .filter(|record| !seen.contains(&record.event_id)),
    );
    merged
}

/// Union of events; records present on both sides are combined:
/// prediction collections concatenate and attributes fill in
/// left-first.
fn outer(left: Vec<AnnotationRecord>, right: Vec<AnnotationRecord>) -> Vec<AnnotationRecord> {
    let mut by_event: HashMap<String, AnnotationRecord> = right
        .into_iter()
        .map(|record| (record.event_id.clone(), record))
        .collect();

    let mut merged = Vec::new();
    for mut record in left {
        if let Some(counterpart) = by_event.remove(&record.event_id) {
            record.detections.extend(counterpart.detections);
            record.polygons.extend(counterpart.polygons);
            record.polylines.extend(counterpart.polylines);
            record.points.extend(counterpart.points);
            record.tags.extend(counterpart.tags);
            record.captions.extend(counterpart.captions);
            for (key, value) in counterpart.attributes {
                record.attributes.entry(key).or_insert(value);
            }
            record.has_image = record.has_image || counterpart.has_image;
        }
        merged.push(record);
    }

    // Right-only events, ordered by event id for determinism.
    let mut rest: Vec<AnnotationRecord> = by_event.into_values().collect();
    rest.sort_by(|a, b| a.event_id.cmp(&b.event_id));
    merged.extend(rest);
    merged
}

#[cfg(test)]
mod tests {
    use anno_core::mock::MockCallback;
    use anno_core::{Detection, ProjectId, Tag};
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn project() -> ProjectId {
        ProjectId::from_uuid(Uuid::from_u128(3))
    }

    fn record(event: &str) -> AnnotationRecord {
        AnnotationRecord::new(event, project())
    }

    fn params(policy: MergePolicy) -> MergeParams {
        MergeParams {
            policy,
            callback_url: None,
        }
    }

    fn callbacks() -> Arc<dyn CallbackClient> {
        Arc::new(MockCallback::default())
    }

    #[tokio::test]
    async fn test_left_policy_prefers_left_records() {
        let mut left = record("evt-1");
        left.attributes.insert("side".into(), json!("left"));
        let mut right = record("evt-1");
        right.attributes.insert("side".into(), json!("right"));
        let right_only = record("evt-2");

        let merged = merge_records(
            &params(MergePolicy::Left),
            vec![left],
            vec![right, right_only],
            &callbacks(),
        )
        .await
        .unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].attributes["side"], json!("left"));
        assert_eq!(merged[1].event_id, "evt-2");
    }

    #[tokio::test]
    async fn test_outer_policy_concatenates_predictions() {
        let mut left = record("evt-1");
        left.detections
            .push(Detection::new("cat", [0.1, 0.1, 0.2, 0.2]).unwrap());
        left.attributes.insert("camera".into(), json!("front"));

        let mut right = record("evt-1");
        right
            .detections
            .push(Detection::new("dog", [0.4, 0.4, 0.2, 0.2]).unwrap());
        right.tags.push(Tag::new("indoor"));
        right.attributes.insert("camera".into(), json!("rear"));
        right.attributes.insert("weather".into(), json!("sunny"));

        let merged = merge_records(
            &params(MergePolicy::Outer),
            vec![left],
            vec![right],
            &callbacks(),
        )
        .await
        .unwrap();

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].detections.len(), 2);
        assert_eq!(merged[0].tags.len(), 1);
        // Attributes fill in left-first.
        assert_eq!(merged[0].attributes["camera"], json!("front"));
        assert_eq!(merged[0].attributes["weather"], json!("sunny"));
    }

    #[tokio::test]
    async fn test_callback_policy_round_trips_through_the_resolver() {
        let client = Arc::new(MockCallback::default());
        let params = MergeParams {
            policy: MergePolicy::Callback,
            callback_url: Some("https://resolver.test/merge".into()),
        };

        let merged = merge_records(
            &params,
            vec![record("evt-1")],
            vec![record("evt-2")],
            &(client.clone() as Arc<dyn CallbackClient>),
        )
        .await
        .unwrap();

        assert_eq!(merged.len(), 2);
        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], "https://resolver.test/merge");
    }
}
