//! The closed registry of named, parameterized pipeline stages.
//!
//! Each stage declares its parameters as a struct, compiles to zero or
//! more store operations, validates itself against the project
//! vocabulary, and describes its parameters as a JSON-schema document
//! for interactive clients.

mod attributes;
mod labels;
mod sample;
pub(crate) mod schema;

pub use attributes::{
    ExcludeAttributesStage, ExcludeLabelAttributesStage, FilterAttributesStage,
    FilterLabelAttributesStage, SelectAttributesStage, SelectLabelAttributesStage,
    SetAttributeStage, SetLabelAttributeStage,
};
pub use labels::{
    ExcludeLabelsStage, FilterLabelsStage, LabelSelector, LimitLabelsStage, MapLabelsStage,
    SelectLabelsStage, SkipLabelsStage,
};
pub use sample::{
    ExcludeStage, ExistsStage, LimitStage, MatchStage, SelectStage, ShuffleStage, SkipStage,
    SortByStage, SortKey, TakeStage,
};

use anno_core::{ProjectVocabulary, Shape};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::error::QueryResult;

/// A single named, parameterized pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    /// Keep at most the first `limit` records.
    Limit(LimitStage),
    /// Drop the first `skip` records.
    Skip(SkipStage),
    /// Seeded deterministic random sample.
    Take(TakeStage),
    /// Seeded deterministic reordering.
    Shuffle(ShuffleStage),
    /// Keep records satisfying a boolean expression.
    Match(MatchStage),
    /// Keep records where a field is (or is not) present.
    Exists(ExistsStage),
    /// Keep records with the given event ids.
    Select(SelectStage),
    /// Drop records with the given event ids.
    Exclude(ExcludeStage),
    /// Order records by a field path or computed expression.
    SortBy(SortByStage),
    /// Rewrite label names within one shape collection.
    MapLabels(MapLabelsStage),
    /// Keep only the named labels.
    SelectLabels(SelectLabelsStage),
    /// Drop the named labels.
    ExcludeLabels(ExcludeLabelsStage),
    /// Keep annotations of one shape satisfying a per-annotation
    /// expression.
    FilterLabels(FilterLabelsStage),
    /// Cap the number of matching annotations per record.
    LimitLabels(LimitLabelsStage),
    /// Drop the first matching annotations per record.
    SkipLabels(SkipLabelsStage),
    /// Keep only the named record-level attribute keys.
    SelectAttributes(SelectAttributesStage),
    /// Drop the named record-level attribute keys.
    ExcludeAttributes(ExcludeAttributesStage),
    /// Keep record-level attribute entries satisfying an expression.
    FilterAttributes(FilterAttributesStage),
    /// Keep only the named attribute keys on annotations of one shape.
    SelectLabelAttributes(SelectLabelAttributesStage),
    /// Drop the named attribute keys on annotations of one shape.
    ExcludeLabelAttributes(ExcludeLabelAttributesStage),
    /// Keep annotation attribute entries satisfying an expression.
    FilterLabelAttributes(FilterLabelAttributesStage),
    /// Set a record-level attribute to a computed value.
    SetAttribute(SetAttributeStage),
    /// Set an annotation attribute to a computed value.
    SetLabelAttribute(SetLabelAttributeStage),
}

/// Stage ids, used by the registry description endpoint and for
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumIter, EnumString, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StageKind {
    Limit,
    Skip,
    Take,
    Shuffle,
    Match,
    Exists,
    Select,
    Exclude,
    SortBy,
    MapLabels,
    SelectLabels,
    ExcludeLabels,
    FilterLabels,
    LimitLabels,
    SkipLabels,
    SelectAttributes,
    ExcludeAttributes,
    FilterAttributes,
    SelectLabelAttributes,
    ExcludeLabelAttributes,
    FilterLabelAttributes,
    SetAttribute,
    SetLabelAttribute,
}

impl Stage {
    /// The stage's registry id.
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Limit(_) => StageKind::Limit,
            Stage::Skip(_) => StageKind::Skip,
            Stage::Take(_) => StageKind::Take,
            Stage::Shuffle(_) => StageKind::Shuffle,
            Stage::Match(_) => StageKind::Match,
            Stage::Exists(_) => StageKind::Exists,
            Stage::Select(_) => StageKind::Select,
            Stage::Exclude(_) => StageKind::Exclude,
            Stage::SortBy(_) => StageKind::SortBy,
            Stage::MapLabels(_) => StageKind::MapLabels,
            Stage::SelectLabels(_) => StageKind::SelectLabels,
            Stage::ExcludeLabels(_) => StageKind::ExcludeLabels,
            Stage::FilterLabels(_) => StageKind::FilterLabels,
            Stage::LimitLabels(_) => StageKind::LimitLabels,
            Stage::SkipLabels(_) => StageKind::SkipLabels,
            Stage::SelectAttributes(_) => StageKind::SelectAttributes,
            Stage::ExcludeAttributes(_) => StageKind::ExcludeAttributes,
            Stage::FilterAttributes(_) => StageKind::FilterAttributes,
            Stage::SelectLabelAttributes(_) => StageKind::SelectLabelAttributes,
            Stage::ExcludeLabelAttributes(_) => StageKind::ExcludeLabelAttributes,
            Stage::FilterLabelAttributes(_) => StageKind::FilterLabelAttributes,
            Stage::SetAttribute(_) => StageKind::SetAttribute,
            Stage::SetLabelAttribute(_) => StageKind::SetLabelAttribute,
        }
    }

    /// Compiles the stage to an ordered list of store operations.
    pub fn compile(&self) -> QueryResult<Vec<Value>> {
        match self {
            Stage::Limit(stage) => stage.compile(),
            Stage::Skip(stage) => stage.compile(),
            Stage::Take(stage) => stage.compile(),
            Stage::Shuffle(stage) => stage.compile(),
            Stage::Match(stage) => stage.compile(),
            Stage::Exists(stage) => stage.compile(),
            Stage::Select(stage) => stage.compile(),
            Stage::Exclude(stage) => stage.compile(),
            Stage::SortBy(stage) => stage.compile(),
            Stage::MapLabels(stage) => stage.compile(),
            Stage::SelectLabels(stage) => stage.compile(),
            Stage::ExcludeLabels(stage) => stage.compile(),
            Stage::FilterLabels(stage) => stage.compile(),
            Stage::LimitLabels(stage) => stage.compile(),
            Stage::SkipLabels(stage) => stage.compile(),
            Stage::SelectAttributes(stage) => stage.compile(),
            Stage::ExcludeAttributes(stage) => stage.compile(),
            Stage::FilterAttributes(stage) => stage.compile(),
            Stage::SelectLabelAttributes(stage) => stage.compile(),
            Stage::ExcludeLabelAttributes(stage) => stage.compile(),
            Stage::FilterLabelAttributes(stage) => stage.compile(),
            Stage::SetAttribute(stage) => stage.compile(),
            Stage::SetLabelAttribute(stage) => stage.compile(),
        }
    }

    /// Validates the stage parameters against the project vocabulary.
    ///
    /// Label references must name known `(label, shape)` pairs,
    /// attribute references known keys, and embedded expressions must
    /// compile.
    pub fn validate(&self, vocab: &ProjectVocabulary) -> QueryResult<()> {
        match self {
            Stage::Limit(_) | Stage::Skip(_) | Stage::Take(_) | Stage::Shuffle(_) => Ok(()),
            Stage::Match(stage) => stage.validate(),
            Stage::Exists(stage) => stage.validate(),
            Stage::Select(stage) => stage.validate(),
            Stage::Exclude(stage) => stage.validate(),
            Stage::SortBy(stage) => stage.validate(),
            Stage::MapLabels(stage) => stage.validate(vocab),
            Stage::SelectLabels(stage) => stage.validate(vocab),
            Stage::ExcludeLabels(stage) => stage.validate(vocab),
            Stage::FilterLabels(stage) => stage.validate(),
            Stage::LimitLabels(stage) => stage.validate(vocab),
            Stage::SkipLabels(stage) => stage.validate(vocab),
            Stage::SelectAttributes(stage) => stage.validate(vocab),
            Stage::ExcludeAttributes(stage) => stage.validate(vocab),
            Stage::FilterAttributes(stage) => stage.validate(),
            Stage::SelectLabelAttributes(stage) => stage.validate(vocab),
            Stage::ExcludeLabelAttributes(stage) => stage.validate(vocab),
            Stage::FilterLabelAttributes(stage) => stage.validate(),
            Stage::SetAttribute(stage) => stage.validate(),
            Stage::SetLabelAttribute(stage) => stage.validate(),
        }
    }
}

impl StageKind {
    /// JSON-schema document for the stage's parameters, with enum
    /// members populated from the live project vocabulary.
    pub fn schema(&self, vocab: &ProjectVocabulary) -> Value {
        schema::stage_schema(*self, vocab)
    }
}

/// Registry description: maps every stage id to its parameter schema
/// under the given vocabulary.
pub fn describe_stages(vocab: &ProjectVocabulary) -> Value {
    let mut stages = Map::new();
    for kind in StageKind::iter() {
        stages.insert(kind.to_string(), kind.schema(vocab));
    }
    Value::Object(stages)
}

/// An operation matching no records at all.
pub(crate) fn match_nothing() -> Value {
    json!({ "$match": { "_id": null } })
}

/// A collection path guarded against missing fields.
pub(crate) fn ifnull_collection(shape: Shape) -> Value {
    json!({ "$ifNull": [format!("${}", shape.collection()), []] })
}

/// `$set` of one shape collection to a computed value.
pub(crate) fn set_collection(shape: Shape, body: Value) -> Value {
    json!({ "$set": { shape.collection(): body } })
}

/// `$filter` over one shape collection, binding `$$this`.
pub(crate) fn filter_collection(shape: Shape, cond: Value) -> Value {
    json!({
        "$filter": {
            "input": ifnull_collection(shape),
            "as": "this",
            "cond": cond,
        }
    })
}

/// `$map` over one shape collection, binding `$$this`.
pub(crate) fn map_collection(shape: Shape, body: Value) -> Value {
    json!({
        "$map": {
            "input": ifnull_collection(shape),
            "as": "this",
            "in": body,
        }
    })
}

/// Drops records left without any annotation after per-label filtering.
pub(crate) fn match_non_empty() -> Value {
    let sizes: Vec<Value> = Shape::ALL
        .iter()
        .map(|shape| json!({ "$size": ifnull_collection(*shape) }))
        .collect();
    json!({ "$match": { "$expr": { "$gt": [{ "$add": sizes }, 0] } } })
}
