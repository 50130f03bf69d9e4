//! JSON-schema parameter documents for the stage registry.
//!
//! Schemas are rebuilt per request so enum members (label names,
//! attribute keys) always reflect the live project vocabulary.

use std::collections::BTreeSet;

use anno_core::{ProjectVocabulary, Shape};
use serde_json::{Map, Value, json};

use super::StageKind;

fn object(properties: Vec<(&str, Value)>, required: &[&str]) -> Value {
    let mut props = Map::new();
    for (name, schema) in properties {
        props.insert(name.to_string(), schema);
    }
    json!({
        "type": "object",
        "properties": props,
        "required": required,
        "additionalProperties": false,
    })
}

fn integer(description: &str) -> Value {
    json!({ "type": "integer", "description": description })
}

fn boolean(description: &str) -> Value {
    json!({ "type": "boolean", "description": description })
}

fn string(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn string_array(description: &str) -> Value {
    json!({
        "type": "array",
        "items": { "type": "string" },
        "description": description,
    })
}

fn string_enum_array(description: &str, members: Vec<&str>) -> Value {
    json!({
        "type": "array",
        "items": { "type": "string", "enum": members },
        "description": description,
    })
}

/// Recursive expression parameter; the expression grammar is described
/// once here rather than inlined into every stage.
fn expression(description: &str) -> Value {
    json!({
        "type": "object",
        "description": description,
        "properties": {
            "literal": {},
            "field": { "type": "string" },
            "apply": {
                "type": "object",
                "properties": {
                    "op": { "type": "string" },
                    "args": { "type": "array" },
                },
                "required": ["op", "args"],
            },
        },
        "minProperties": 1,
        "maxProperties": 1,
    })
}

fn shape(description: &str) -> Value {
    let members: Vec<String> = Shape::ALL.iter().map(|s| s.to_string()).collect();
    json!({ "type": "string", "enum": members, "description": description })
}

fn label_selector(vocab: &ProjectVocabulary) -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "enum": vocab.all_label_names() },
            "shape": shape("shape the label lives on"),
        },
        "required": ["name", "shape"],
    })
}

fn label_attribute_keys(vocab: &ProjectVocabulary) -> Vec<&str> {
    let keys: BTreeSet<&str> = vocab
        .labels
        .iter()
        .flat_map(|label| label.attributes.iter().map(String::as_str))
        .collect();
    keys.into_iter().collect()
}

pub(crate) fn stage_schema(kind: StageKind, vocab: &ProjectVocabulary) -> Value {
    let attribute_keys: Vec<&str> = vocab.attributes.iter().map(String::as_str).collect();
    match kind {
        StageKind::Limit => object(
            vec![("limit", integer("maximum records to keep"))],
            &["limit"],
        ),
        StageKind::Skip => object(vec![("skip", integer("records to drop"))], &["skip"]),
        StageKind::Take => object(
            vec![
                ("size", integer("records to sample")),
                ("seed", integer("sampling seed")),
            ],
            &["size"],
        ),
        StageKind::Shuffle => object(vec![("seed", integer("shuffle seed"))], &[]),
        StageKind::Match => object(
            vec![("expr", expression("per-record predicate"))],
            &["expr"],
        ),
        StageKind::Exists => object(
            vec![
                ("field", string("dotted field path")),
                ("exists", boolean("keep records where the field exists")),
            ],
            &["field"],
        ),
        StageKind::Select => object(
            vec![("event_ids", string_array("event ids to keep"))],
            &["event_ids"],
        ),
        StageKind::Exclude => object(
            vec![("event_ids", string_array("event ids to drop"))],
            &["event_ids"],
        ),
        StageKind::SortBy => object(
            vec![
                (
                    "key",
                    json!({
                        "description": "field path or expression to order by",
                        "oneOf": [{ "type": "string" }, expression("computed sort key")],
                    }),
                ),
                ("reverse", boolean("descending order")),
            ],
            &["key"],
        ),
        StageKind::MapLabels => object(
            vec![
                ("shape", shape("shape collection to rewrite")),
                (
                    "mapping",
                    json!({
                        "type": "object",
                        "description": "old label name to new label name",
                        "propertyNames": { "enum": vocab.all_label_names() },
                        "additionalProperties": { "type": "string" },
                    }),
                ),
            ],
            &["shape", "mapping"],
        ),
        StageKind::SelectLabels | StageKind::ExcludeLabels => object(
            vec![
                (
                    "labels",
                    json!({
                        "type": "array",
                        "items": label_selector(vocab),
                        "description": "labels to keep or drop",
                    }),
                ),
                ("filter_empty", boolean("drop records left without annotations")),
            ],
            &["labels"],
        ),
        StageKind::FilterLabels => object(
            vec![
                ("shape", shape("shape collection to filter")),
                ("expr", expression("per-annotation predicate")),
                ("filter_empty", boolean("drop records left without annotations")),
            ],
            &["shape", "expr"],
        ),
        StageKind::LimitLabels => object(
            vec![
                ("shape", shape("shape collection to cap")),
                ("limit", integer("maximum matching annotations to keep")),
                (
                    "labels",
                    string_enum_array(
                        "restrict matching to these label names",
                        vocab.all_label_names(),
                    ),
                ),
            ],
            &["shape", "limit"],
        ),
        StageKind::SkipLabels => object(
            vec![
                ("shape", shape("shape collection to window")),
                ("skip", integer("matching annotations to drop")),
                (
                    "labels",
                    string_enum_array(
                        "restrict matching to these label names",
                        vocab.all_label_names(),
                    ),
                ),
            ],
            &["shape", "skip"],
        ),
        StageKind::SelectAttributes => object(
            vec![(
                "keys",
                string_enum_array("attribute keys to keep", attribute_keys),
            )],
            &["keys"],
        ),
        StageKind::ExcludeAttributes => object(
            vec![(
                "keys",
                string_enum_array("attribute keys to drop", attribute_keys),
            )],
            &["keys"],
        ),
        StageKind::FilterAttributes => object(
            vec![("expr", expression("predicate over { k, v } entries"))],
            &["expr"],
        ),
        StageKind::SelectLabelAttributes => object(
            vec![
                ("shape", shape("shape collection to rewrite")),
                (
                    "keys",
                    string_enum_array(
                        "annotation attribute keys to keep",
                        label_attribute_keys(vocab),
                    ),
                ),
            ],
            &["shape", "keys"],
        ),
        StageKind::ExcludeLabelAttributes => object(
            vec![
                ("shape", shape("shape collection to rewrite")),
                (
                    "keys",
                    string_enum_array(
                        "annotation attribute keys to drop",
                        label_attribute_keys(vocab),
                    ),
                ),
            ],
            &["shape", "keys"],
        ),
        StageKind::FilterLabelAttributes => object(
            vec![
                ("shape", shape("shape collection to rewrite")),
                ("expr", expression("predicate over { k, v } entries")),
            ],
            &["shape", "expr"],
        ),
        StageKind::SetAttribute => object(
            vec![
                ("key", string("attribute key to set")),
                ("value", expression("value expression")),
            ],
            &["key", "value"],
        ),
        StageKind::SetLabelAttribute => object(
            vec![
                ("shape", shape("shape collection to rewrite")),
                ("key", string("annotation attribute key to set")),
                ("value", expression("value expression")),
            ],
            &["shape", "key", "value"],
        ),
    }
}
