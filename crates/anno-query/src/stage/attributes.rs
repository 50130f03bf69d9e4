//! Attribute stages: key selection and filtering over the free-form
//! attribute maps, at record level and per annotation.
//!
//! Maps are rewritten through the `$objectToArray` / `$filter` /
//! `$arrayToObject` route, so every stage here reduces to one gate
//! expression over `{ k, v }` entries. Select and Exclude are the
//! Filter policy with a constant membership gate.

use anno_core::{ProjectVocabulary, Shape};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{QueryError, QueryResult};
use crate::expr::Expr;

use super::{map_collection, set_collection};

/// Filters the entries of an attribute map at `path` with `gate`,
/// a predicate over `$$this.k` / `$$this.v`.
fn filtered_attribute_map(path: Value, gate: Value) -> Value {
    json!({
        "$arrayToObject": {
            "$filter": {
                "input": { "$objectToArray": { "$ifNull": [path, {}] } },
                "as": "this",
                "cond": gate,
            }
        }
    })
}

/// Record-level `attributes` rewritten through a gate.
fn set_record_attributes(gate: Value) -> Value {
    json!({ "$set": { "attributes": filtered_attribute_map(json!("$attributes"), gate) } })
}

/// Per-annotation `attributes` rewritten through a gate, for one
/// shape collection.
fn set_label_attributes(shape: Shape, gate: Value) -> Value {
    let body = json!({
        "$mergeObjects": [
            "$$this",
            { "attributes": filtered_attribute_map(json!("$$this.attributes"), gate) },
        ]
    });
    set_collection(shape, map_collection(shape, body))
}

/// Gate keeping entries whose key is in `keys`.
fn key_in(keys: &[String]) -> Value {
    json!({ "$in": ["$$this.k", keys] })
}

fn check_record_keys(keys: &[String], vocab: &ProjectVocabulary) -> QueryResult<()> {
    for key in keys {
        if !vocab.contains_attribute(key) {
            return Err(QueryError::UnknownAttribute(key.clone()));
        }
    }
    Ok(())
}

fn check_label_keys(keys: &[String], shape: Shape, vocab: &ProjectVocabulary) -> QueryResult<()> {
    for key in keys {
        if !vocab.contains_label_attribute(shape, key) {
            return Err(QueryError::UnknownAttribute(key.clone()));
        }
    }
    Ok(())
}

/// Keeps only the named record-level attribute keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectAttributesStage {
    /// Attribute keys to keep.
    pub keys: Vec<String>,
}

impl SelectAttributesStage {
    /// Creates a new select-attributes stage.
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }

    pub(crate) fn validate(&self, vocab: &ProjectVocabulary) -> QueryResult<()> {
        check_record_keys(&self.keys, vocab)
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        Ok(vec![set_record_attributes(key_in(&self.keys))])
    }
}

/// Drops the named record-level attribute keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludeAttributesStage {
    /// Attribute keys to drop.
    pub keys: Vec<String>,
}

impl ExcludeAttributesStage {
    /// Creates a new exclude-attributes stage.
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }

    pub(crate) fn validate(&self, vocab: &ProjectVocabulary) -> QueryResult<()> {
        check_record_keys(&self.keys, vocab)
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        let gate = json!({ "$not": [key_in(&self.keys)] });
        Ok(vec![set_record_attributes(gate)])
    }
}

/// Keeps record-level attribute entries satisfying an expression over
/// `{ k, v }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterAttributesStage {
    /// Per-entry predicate; `k` is the key, `v` the value.
    pub expr: Expr,
}

impl FilterAttributesStage {
    /// Creates a new filter-attributes stage.
    pub fn new(expr: Expr) -> Self {
        Self { expr }
    }

    pub(crate) fn validate(&self) -> QueryResult<()> {
        self.expr.compile("$$this").map(drop)
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        let gate = self.expr.compile("$$this")?;
        Ok(vec![set_record_attributes(gate)])
    }
}

/// Keeps only the named attribute keys on annotations of one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectLabelAttributesStage {
    /// Shape collection to rewrite.
    pub shape: Shape,
    /// Attribute keys to keep.
    pub keys: Vec<String>,
}

impl SelectLabelAttributesStage {
    /// Creates a new select-label-attributes stage.
    pub fn new(shape: Shape, keys: Vec<String>) -> Self {
        Self { shape, keys }
    }

    pub(crate) fn validate(&self, vocab: &ProjectVocabulary) -> QueryResult<()> {
        check_label_keys(&self.keys, self.shape, vocab)
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        Ok(vec![set_label_attributes(self.shape, key_in(&self.keys))])
    }
}

/// Drops the named attribute keys on annotations of one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludeLabelAttributesStage {
    /// Shape collection to rewrite.
    pub shape: Shape,
    /// Attribute keys to drop.
    pub keys: Vec<String>,
}

impl ExcludeLabelAttributesStage {
    /// Creates a new exclude-label-attributes stage.
    pub fn new(shape: Shape, keys: Vec<String>) -> Self {
        Self { shape, keys }
    }

    pub(crate) fn validate(&self, vocab: &ProjectVocabulary) -> QueryResult<()> {
        check_label_keys(&self.keys, self.shape, vocab)
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        let gate = json!({ "$not": [key_in(&self.keys)] });
        Ok(vec![set_label_attributes(self.shape, gate)])
    }
}

/// Keeps annotation attribute entries satisfying an expression over
/// `{ k, v }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterLabelAttributesStage {
    /// Shape collection to rewrite.
    pub shape: Shape,
    /// Per-entry predicate; `k` is the key, `v` the value.
    pub expr: Expr,
}

impl FilterLabelAttributesStage {
    /// Creates a new filter-label-attributes stage.
    pub fn new(shape: Shape, expr: Expr) -> Self {
        Self { shape, expr }
    }

    pub(crate) fn validate(&self) -> QueryResult<()> {
        self.expr.compile("$$this").map(drop)
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        let gate = self.expr.compile("$$this")?;
        Ok(vec![set_label_attributes(self.shape, gate)])
    }
}

/// Sets a record-level attribute to a computed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetAttributeStage {
    /// Attribute key to set.
    pub key: String,
    /// Value expression, evaluated against the record.
    pub value: Expr,
}

impl SetAttributeStage {
    /// Creates a new set-attribute stage.
    pub fn new(key: impl Into<String>, value: Expr) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub(crate) fn validate(&self) -> QueryResult<()> {
        if self.key.is_empty() || self.key.contains('.') {
            return Err(QueryError::InvalidStage {
                stage: "set_attribute",
                reason: "key must be a non-empty, undotted name".into(),
            });
        }
        self.value.compile("").map(drop)
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        let path = format!("attributes.{}", self.key);
        Ok(vec![json!({ "$set": { path: self.value.compile("")? } })])
    }
}

/// Sets an attribute on every annotation of one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetLabelAttributeStage {
    /// Shape collection to rewrite.
    pub shape: Shape,
    /// Attribute key to set.
    pub key: String,
    /// Value expression, evaluated against the annotation.
    pub value: Expr,
}

impl SetLabelAttributeStage {
    /// Creates a new set-label-attribute stage.
    pub fn new(shape: Shape, key: impl Into<String>, value: Expr) -> Self {
        Self {
            shape,
            key: key.into(),
            value,
        }
    }

    pub(crate) fn validate(&self) -> QueryResult<()> {
        if self.key.is_empty() || self.key.contains('.') {
            return Err(QueryError::InvalidStage {
                stage: "set_label_attribute",
                reason: "key must be a non-empty, undotted name".into(),
            });
        }
        self.value.compile("$$this").map(drop)
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        let value = self.value.compile("$$this")?;
        let body = json!({
            "$mergeObjects": [
                "$$this",
                {
                    "attributes": {
                        "$mergeObjects": [
                            { "$ifNull": ["$$this.attributes", {}] },
                            { self.key.clone(): value },
                        ]
                    }
                },
            ]
        });
        Ok(vec![set_collection(
            self.shape,
            map_collection(self.shape, body),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> ProjectVocabulary {
        ProjectVocabulary {
            labels: vec![anno_core::LabelDescriptor {
                name: "cat".into(),
                shape: Shape::Box,
                group: "ground_truth".into(),
                attributes: vec!["occluded".into()],
            }],
            attributes: vec!["camera".into(), "weather".into()],
        }
    }

    #[test]
    fn test_select_attributes_gates_on_key_membership() {
        let ops = SelectAttributesStage::new(vec!["camera".into()]).compile().unwrap();
        let filter = &ops[0]["$set"]["attributes"]["$arrayToObject"]["$filter"];
        assert_eq!(filter["cond"], json!({ "$in": ["$$this.k", ["camera"]] }));
        assert_eq!(
            filter["input"],
            json!({ "$objectToArray": { "$ifNull": ["$attributes", {}] } })
        );
    }

    #[test]
    fn test_exclude_attributes_negates_the_gate() {
        let ops = ExcludeAttributesStage::new(vec!["camera".into()]).compile().unwrap();
        let cond = &ops[0]["$set"]["attributes"]["$arrayToObject"]["$filter"]["cond"];
        assert_eq!(cond, &json!({ "$not": [{ "$in": ["$$this.k", ["camera"]] }] }));
    }

    #[test]
    fn test_unknown_attribute_key_is_rejected() {
        let vocab = vocab();
        let err = SelectAttributesStage::new(vec!["nope".into()])
            .validate(&vocab)
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownAttribute(key) if key == "nope"));

        // Label attributes check the per-shape key set.
        assert!(
            SelectLabelAttributesStage::new(Shape::Box, vec!["occluded".into()])
                .validate(&vocab)
                .is_ok()
        );
        assert!(
            SelectLabelAttributesStage::new(Shape::Box, vec!["camera".into()])
                .validate(&vocab)
                .is_err()
        );
    }

    #[test]
    fn test_filter_attributes_compiles_the_entry_predicate() {
        let expr = Expr::field("k").ne(Expr::literal("internal"));
        let ops = FilterAttributesStage::new(expr).compile().unwrap();
        let cond = &ops[0]["$set"]["attributes"]["$arrayToObject"]["$filter"]["cond"];
        assert_eq!(cond, &json!({ "$ne": ["$$this.k", "internal"] }));
    }

    #[test]
    fn test_label_attribute_rewrite_merges_per_annotation() {
        let ops = SelectLabelAttributesStage::new(Shape::Box, vec!["occluded".into()])
            .compile()
            .unwrap();
        let body = &ops[0]["$set"]["detections"]["$map"]["in"];
        assert_eq!(body["$mergeObjects"][0], json!("$$this"));
        let filter = &body["$mergeObjects"][1]["attributes"]["$arrayToObject"]["$filter"];
        assert_eq!(
            filter["input"],
            json!({ "$objectToArray": { "$ifNull": ["$$this.attributes", {}] } })
        );
    }

    #[test]
    fn test_set_attribute_writes_a_dotted_path() {
        let stage = SetAttributeStage::new("reviewed", Expr::literal(true));
        assert!(stage.validate().is_ok());
        assert_eq!(
            stage.compile().unwrap(),
            vec![json!({ "$set": { "attributes.reviewed": true } })]
        );

        let bad = SetAttributeStage::new("a.b", Expr::literal(1));
        assert!(matches!(
            bad.validate().unwrap_err(),
            QueryError::InvalidStage { stage: "set_attribute", .. }
        ));
    }

    #[test]
    fn test_set_label_attribute_preserves_existing_entries() {
        let stage =
            SetLabelAttributeStage::new(Shape::Box, "verified", Expr::literal(true));
        let ops = stage.compile().unwrap();
        let attrs = &ops[0]["$set"]["detections"]["$map"]["in"]["$mergeObjects"][1]["attributes"];
        assert_eq!(
            attrs["$mergeObjects"][0],
            json!({ "$ifNull": ["$$this.attributes", {}] })
        );
        assert_eq!(attrs["$mergeObjects"][1], json!({ "verified": true }));
    }
}
