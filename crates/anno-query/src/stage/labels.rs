//! Label-level stages: selection, filtering, renaming, and windowing
//! of annotations inside each record.
//!
//! These stages rewrite the shape collections in place with
//! `$set`/`$filter`/`$map` operations; records are only dropped when a
//! stage's `filter_empty` flag asks for it.

use std::collections::BTreeMap;

use anno_core::{ProjectVocabulary, Shape};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{QueryError, QueryResult};
use crate::expr::Expr;

use super::{filter_collection, ifnull_collection, map_collection, match_non_empty, set_collection};

/// A `(label, shape)` reference into the project vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    /// Label name.
    pub name: String,
    /// Shape the label lives on.
    pub shape: Shape,
}

impl LabelSelector {
    /// Creates a new label selector.
    pub fn new(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }
}

fn default_true() -> bool {
    true
}

fn check_labels(labels: &[LabelSelector], vocab: &ProjectVocabulary) -> QueryResult<()> {
    for selector in labels {
        if !vocab.contains_label(&selector.name, selector.shape) {
            return Err(QueryError::UnknownLabel {
                name: selector.name.clone(),
                shape: selector.shape,
            });
        }
    }
    Ok(())
}

fn check_names(names: &[String], shape: Shape, vocab: &ProjectVocabulary) -> QueryResult<()> {
    for name in names {
        if !vocab.contains_label(name, shape) {
            return Err(QueryError::UnknownLabel {
                name: name.clone(),
                shape,
            });
        }
    }
    Ok(())
}

fn label_in(names: &[String]) -> Value {
    json!({ "$in": ["$$this.label", names] })
}

/// Keeps only the named labels; unselected shapes are emptied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectLabelsStage {
    /// Labels to keep.
    pub labels: Vec<LabelSelector>,
    /// Drop records left without any annotation.
    #[serde(default = "default_true")]
    pub filter_empty: bool,
}

impl SelectLabelsStage {
    /// Creates a new select-labels stage.
    pub fn new(labels: Vec<LabelSelector>) -> Self {
        Self {
            labels,
            filter_empty: true,
        }
    }

    pub(crate) fn validate(&self, vocab: &ProjectVocabulary) -> QueryResult<()> {
        check_labels(&self.labels, vocab)
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        let mut ops = Vec::new();
        for shape in Shape::ALL {
            let names: Vec<String> = self
                .labels
                .iter()
                .filter(|sel| sel.shape == shape)
                .map(|sel| sel.name.clone())
                .collect();
            let body = if names.is_empty() {
                json!([])
            } else {
                filter_collection(shape, label_in(&names))
            };
            ops.push(set_collection(shape, body));
        }
        if self.filter_empty {
            ops.push(match_non_empty());
        }
        Ok(ops)
    }
}

/// Drops the named labels; untouched shapes keep their annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludeLabelsStage {
    /// Labels to drop.
    pub labels: Vec<LabelSelector>,
    /// Drop records left without any annotation.
    #[serde(default)]
    pub filter_empty: bool,
}

impl ExcludeLabelsStage {
    /// Creates a new exclude-labels stage.
    pub fn new(labels: Vec<LabelSelector>) -> Self {
        Self {
            labels,
            filter_empty: false,
        }
    }

    pub(crate) fn validate(&self, vocab: &ProjectVocabulary) -> QueryResult<()> {
        check_labels(&self.labels, vocab)
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        let mut ops = Vec::new();
        for shape in Shape::ALL {
            let names: Vec<String> = self
                .labels
                .iter()
                .filter(|sel| sel.shape == shape)
                .map(|sel| sel.name.clone())
                .collect();
            if names.is_empty() {
                continue;
            }
            let cond = json!({ "$not": [label_in(&names)] });
            ops.push(set_collection(shape, filter_collection(shape, cond)));
        }
        if self.filter_empty {
            ops.push(match_non_empty());
        }
        Ok(ops)
    }
}

/// Keeps annotations of one shape satisfying a per-annotation
/// expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterLabelsStage {
    /// Shape collection to filter.
    pub shape: Shape,
    /// Per-annotation predicate; field paths resolve inside the
    /// annotation.
    pub expr: Expr,
    /// Drop records left without any annotation.
    #[serde(default = "default_true")]
    pub filter_empty: bool,
}

impl FilterLabelsStage {
    /// Creates a new filter-labels stage.
    pub fn new(shape: Shape, expr: Expr) -> Self {
        Self {
            shape,
            expr,
            filter_empty: true,
        }
    }

    pub(crate) fn validate(&self) -> QueryResult<()> {
        self.expr.compile("$$this").map(drop)
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        let cond = self.expr.compile("$$this")?;
        let mut ops = vec![set_collection(
            self.shape,
            filter_collection(self.shape, cond),
        )];
        if self.filter_empty {
            ops.push(match_non_empty());
        }
        Ok(ops)
    }
}

/// Rewrites label names within one shape collection.
///
/// Annotations whose label is not a mapping key keep their name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapLabelsStage {
    /// Shape collection to rewrite.
    pub shape: Shape,
    /// Old name to new name.
    pub mapping: BTreeMap<String, String>,
}

impl MapLabelsStage {
    /// Creates a new map-labels stage.
    pub fn new(shape: Shape, mapping: BTreeMap<String, String>) -> Self {
        Self { shape, mapping }
    }

    pub(crate) fn validate(&self, vocab: &ProjectVocabulary) -> QueryResult<()> {
        for name in self.mapping.keys() {
            if !vocab.contains_label(name, self.shape) {
                return Err(QueryError::UnknownLabel {
                    name: name.clone(),
                    shape: self.shape,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        let branches: Vec<Value> = self
            .mapping
            .iter()
            .map(|(from, to)| {
                json!({ "case": { "$eq": ["$$this.label", from] }, "then": to })
            })
            .collect();
        let body = json!({
            "$mergeObjects": [
                "$$this",
                { "label": { "$switch": { "branches": branches, "default": "$$this.label" } } },
            ]
        });
        Ok(vec![set_collection(
            self.shape,
            map_collection(self.shape, body),
        )])
    }
}

/// The matching subset of one shape collection, with its complement.
///
/// With no label names the whole collection matches and the
/// complement is empty.
fn matching_split(shape: Shape, labels: Option<&[String]>) -> (Value, Value) {
    match labels {
        Some(names) => (
            filter_collection(shape, label_in(names)),
            filter_collection(shape, json!({ "$not": [label_in(names)] })),
        ),
        None => (ifnull_collection(shape), json!([])),
    }
}

/// Caps the number of matching annotations per record; non-matching
/// annotations are kept untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitLabelsStage {
    /// Shape collection to cap.
    pub shape: Shape,
    /// Maximum matching annotations to keep; zero or negative keeps
    /// none of them.
    pub limit: i64,
    /// Restrict matching to these label names; omitted matches all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

impl LimitLabelsStage {
    /// Creates a new limit-labels stage.
    pub fn new(shape: Shape, limit: i64) -> Self {
        Self {
            shape,
            limit,
            labels: None,
        }
    }

    /// Restricts matching to the given label names.
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub(crate) fn validate(&self, vocab: &ProjectVocabulary) -> QueryResult<()> {
        match &self.labels {
            Some(names) => check_names(names, self.shape, vocab),
            None => Ok(()),
        }
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        let (matching, rest) = matching_split(self.shape, self.labels.as_deref());
        let kept = if self.limit <= 0 {
            json!([])
        } else {
            json!({ "$slice": [matching, self.limit] })
        };
        let body = json!({ "$concatArrays": [kept, rest] });
        Ok(vec![set_collection(self.shape, body)])
    }
}

/// Drops the first matching annotations per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipLabelsStage {
    /// Shape collection to window.
    pub shape: Shape,
    /// Matching annotations to drop; zero or negative drops none.
    pub skip: i64,
    /// Restrict matching to these label names; omitted matches all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

impl SkipLabelsStage {
    /// Creates a new skip-labels stage.
    pub fn new(shape: Shape, skip: i64) -> Self {
        Self {
            shape,
            skip,
            labels: None,
        }
    }

    /// Restricts matching to the given label names.
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub(crate) fn validate(&self, vocab: &ProjectVocabulary) -> QueryResult<()> {
        match &self.labels {
            Some(names) => check_names(names, self.shape, vocab),
            None => Ok(()),
        }
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        if self.skip <= 0 {
            return Ok(Vec::new());
        }
        let (matching, rest) = matching_split(self.shape, self.labels.as_deref());
        // $slice needs a positive count; past-the-end positions yield
        // an empty array regardless of it.
        let count = json!({
            "$max": [{ "$subtract": [{ "$size": matching }, self.skip] }, 1]
        });
        let kept = json!({ "$slice": [matching, self.skip, count] });
        let body = json!({ "$concatArrays": [kept, rest] });
        Ok(vec![set_collection(self.shape, body)])
    }
}
