//! Aggregation pipelines the document store runs to derive a project's
//! vocabulary from its stored annotations.
//!
//! Labels are not stored as rows anywhere; the label vocabulary is the
//! distinct `(name, shape, group)` triples across all prediction
//! collections, each with the union of attribute keys observed on its
//! annotations.

use anno_core::{DEFAULT_GROUP, Shape};
use serde_json::{Value, json};

/// Keys of an attribute map as an array of strings.
fn attribute_keys(path: &str) -> Value {
    json!({
        "$map": {
            "input": { "$objectToArray": { "$ifNull": [path, {}] } },
            "as": "entry",
            "in": "$$entry.k",
        }
    })
}

/// One shape collection flattened into `{ name, shape, group,
/// attributes }` entries.
fn shape_entries(shape: Shape) -> Value {
    json!({
        "$map": {
            "input": { "$ifNull": [format!("${}", shape.collection()), []] },
            "as": "this",
            "in": {
                "name": "$$this.label",
                "shape": shape.to_string(),
                "group": { "$ifNull": ["$$this.group", DEFAULT_GROUP] },
                "attributes": attribute_keys("$$this.attributes"),
            },
        }
    })
}

/// Pipeline deriving the distinct-label vocabulary of a project.
pub fn label_vocabulary_pipeline() -> Vec<Value> {
    let collections: Vec<Value> = Shape::ALL.iter().map(|s| shape_entries(*s)).collect();
    vec![
        json!({ "$project": { "labels": { "$concatArrays": collections } } }),
        json!({ "$unwind": "$labels" }),
        json!({ "$replaceRoot": { "newRoot": "$labels" } }),
        json!({
            "$group": {
                "_id": { "name": "$name", "shape": "$shape", "group": "$group" },
                "attributes": { "$push": "$attributes" },
            }
        }),
        json!({
            "$project": {
                "_id": 0,
                "name": "$_id.name",
                "shape": "$_id.shape",
                "group": "$_id.group",
                "attributes": {
                    "$reduce": {
                        "input": "$attributes",
                        "initialValue": [],
                        "in": { "$setUnion": ["$$value", "$$this"] },
                    }
                },
            }
        }),
        json!({ "$sort": { "name": 1, "shape": 1, "group": 1 } }),
    ]
}

/// Pipeline deriving the distinct record-level attribute keys of a
/// project.
pub fn attribute_vocabulary_pipeline() -> Vec<Value> {
    vec![
        json!({ "$project": { "keys": attribute_keys("$attributes") } }),
        json!({ "$unwind": "$keys" }),
        json!({ "$group": { "_id": null, "attributes": { "$addToSet": "$keys" } } }),
        json!({ "$project": { "_id": 0, "attributes": 1 } }),
    ]
}
