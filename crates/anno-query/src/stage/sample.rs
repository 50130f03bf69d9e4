//! Record-level stages: windowing, sampling, matching, and ordering.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::QueryResult;
use crate::expr::Expr;

use super::match_nothing;

/// Sort keys used while sampling and sorting; unset before the stage
/// finishes so they never leak into results.
const RAND_TAKE_FIELD: &str = "_rand_take";
const RAND_SHUFFLE_FIELD: &str = "_rand_shuffle";
const SORT_FIELD: &str = "_sort_field";

/// Per-record random salt the store maintains on every document.
const RAND_FIELD: &str = "$_rand";

/// Keeps at most the first `limit` records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitStage {
    /// Maximum number of records to keep; zero or negative keeps none.
    pub limit: i64,
}

impl LimitStage {
    /// Creates a new limit stage.
    pub fn new(limit: i64) -> Self {
        Self { limit }
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        if self.limit <= 0 {
            return Ok(vec![match_nothing()]);
        }
        Ok(vec![json!({ "$limit": self.limit })])
    }
}

/// Drops the first `skip` records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipStage {
    /// Number of records to drop; zero or negative drops none.
    pub skip: i64,
}

impl SkipStage {
    /// Creates a new skip stage.
    pub fn new(skip: i64) -> Self {
        Self { skip }
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        if self.skip <= 0 {
            return Ok(Vec::new());
        }
        Ok(vec![json!({ "$skip": self.skip })])
    }
}

/// Pseudo-random sample of `size` records.
///
/// Sampling is deterministic for a given seed: records are ranked by
/// a salted modulus of their stored random value, so the same seed
/// selects the same records on every execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeStage {
    /// Number of records to sample; zero or negative keeps none.
    pub size: i64,
    /// Sampling seed; omitted means a fresh random draw per compile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl TakeStage {
    /// Creates a new take stage.
    pub fn new(size: i64) -> Self {
        Self { size, seed: None }
    }

    /// Sets the sampling seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        if self.size <= 0 {
            return Ok(vec![match_nothing()]);
        }
        let salt = random_salt(self.seed);
        Ok(vec![
            json!({ "$set": { RAND_TAKE_FIELD: { "$mod": [salt, RAND_FIELD] } } }),
            json!({ "$sort": { RAND_TAKE_FIELD: 1 } }),
            json!({ "$limit": self.size }),
            json!({ "$unset": RAND_TAKE_FIELD }),
        ])
    }
}

/// Pseudo-random reordering of all records; deterministic per seed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShuffleStage {
    /// Shuffle seed; omitted means a fresh random order per compile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl ShuffleStage {
    /// Creates a new shuffle stage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the shuffle seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        let salt = random_salt(self.seed);
        Ok(vec![
            json!({ "$set": { RAND_SHUFFLE_FIELD: { "$mod": [salt, RAND_FIELD] } } }),
            json!({ "$sort": { RAND_SHUFFLE_FIELD: 1 } }),
            json!({ "$unset": RAND_SHUFFLE_FIELD }),
        ])
    }
}

/// Salt in a range wide enough that moduli spread across records.
fn random_salt(seed: Option<u64>) -> u64 {
    let range = 10_000_000..=10_000_000_000u64;
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed).random_range(range),
        None => rand::rng().random_range(range),
    }
}

/// Keeps records satisfying a boolean expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchStage {
    /// Per-record predicate.
    pub expr: Expr,
}

impl MatchStage {
    /// Creates a new match stage.
    pub fn new(expr: Expr) -> Self {
        Self { expr }
    }

    pub(crate) fn validate(&self) -> QueryResult<()> {
        self.expr.compile("").map(drop)
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        Ok(vec![json!({ "$match": { "$expr": self.expr.compile("")? } })])
    }
}

/// Keeps records where a field is present (or absent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistsStage {
    /// Dotted field path.
    pub field: String,
    /// Keep records where the field exists; `false` inverts.
    #[serde(default = "default_true")]
    pub exists: bool,
}

fn default_true() -> bool {
    true
}

impl ExistsStage {
    /// Creates a new exists stage.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            exists: true,
        }
    }

    /// Inverts the check to keep records missing the field.
    pub fn missing(mut self) -> Self {
        self.exists = false;
        self
    }

    pub(crate) fn validate(&self) -> QueryResult<()> {
        self.predicate().compile("").map(drop)
    }

    fn predicate(&self) -> Expr {
        let check = Expr::apply(
            crate::expr::Operator::Exists,
            vec![Expr::field(self.field.clone())],
        );
        if self.exists { check } else { check.not() }
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        Ok(vec![
            json!({ "$match": { "$expr": self.predicate().compile("")? } }),
        ])
    }
}

/// Keeps records with the given event ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectStage {
    /// Event ids to keep.
    pub event_ids: Vec<String>,
}

impl SelectStage {
    /// Creates a new select stage.
    pub fn new(event_ids: Vec<String>) -> Self {
        Self { event_ids }
    }

    pub(crate) fn validate(&self) -> QueryResult<()> {
        Ok(())
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        Ok(vec![
            json!({ "$match": { "event_id": { "$in": self.event_ids } } }),
        ])
    }
}

/// Drops records with the given event ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludeStage {
    /// Event ids to drop.
    pub event_ids: Vec<String>,
}

impl ExcludeStage {
    /// Creates a new exclude stage.
    pub fn new(event_ids: Vec<String>) -> Self {
        Self { event_ids }
    }

    pub(crate) fn validate(&self) -> QueryResult<()> {
        Ok(())
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        Ok(vec![
            json!({ "$match": { "event_id": { "$nin": self.event_ids } } }),
        ])
    }
}

/// What a sort stage orders by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortKey {
    /// A stored field path.
    Field(String),
    /// A computed expression, evaluated into a temporary sort key.
    Expr(Expr),
}

/// Orders records by a field path or computed expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortByStage {
    /// Sort key.
    pub key: SortKey,
    /// Descending order when set.
    #[serde(default)]
    pub reverse: bool,
}

impl SortByStage {
    /// Creates a new ascending sort stage.
    pub fn new(key: SortKey) -> Self {
        Self {
            key,
            reverse: false,
        }
    }

    /// Sorts in descending order.
    pub fn descending(mut self) -> Self {
        self.reverse = true;
        self
    }

    fn direction(&self) -> i64 {
        if self.reverse { -1 } else { 1 }
    }

    pub(crate) fn validate(&self) -> QueryResult<()> {
        match &self.key {
            SortKey::Field(_) => Ok(()),
            SortKey::Expr(expr) => expr.compile("").map(drop),
        }
    }

    pub(crate) fn compile(&self) -> QueryResult<Vec<Value>> {
        match &self.key {
            SortKey::Field(path) => Ok(vec![json!({ "$sort": { path: self.direction() } })]),
            SortKey::Expr(expr) => Ok(vec![
                json!({ "$set": { SORT_FIELD: expr.compile("")? } }),
                json!({ "$sort": { SORT_FIELD: self.direction() } }),
                json!({ "$unset": SORT_FIELD }),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Operator;

    #[test]
    fn test_limit_of_zero_matches_nothing() {
        let ops = LimitStage::new(0).compile().unwrap();
        assert_eq!(ops, vec![json!({ "$match": { "_id": null } })]);
        let ops = LimitStage::new(3).compile().unwrap();
        assert_eq!(ops, vec![json!({ "$limit": 3 })]);
    }

    #[test]
    fn test_skip_of_zero_is_a_no_op() {
        assert!(SkipStage::new(0).compile().unwrap().is_empty());
        assert!(SkipStage::new(-2).compile().unwrap().is_empty());
        assert_eq!(
            SkipStage::new(4).compile().unwrap(),
            vec![json!({ "$skip": 4 })]
        );
    }

    #[test]
    fn test_take_is_deterministic_per_seed() {
        let stage = TakeStage::new(10).with_seed(7);
        let first = stage.compile().unwrap();
        let second = stage.compile().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert_eq!(first[1], json!({ "$sort": { "_rand_take": 1 } }));
        assert_eq!(first[2], json!({ "$limit": 10 }));
        assert_eq!(first[3], json!({ "$unset": "_rand_take" }));

        let other = TakeStage::new(10).with_seed(8).compile().unwrap();
        assert_ne!(first[0], other[0]);
    }

    #[test]
    fn test_shuffle_sorts_and_unsets_its_key() {
        let ops = ShuffleStage::new().with_seed(1).compile().unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[1], json!({ "$sort": { "_rand_shuffle": 1 } }));
        assert_eq!(ops[2], json!({ "$unset": "_rand_shuffle" }));
    }

    #[test]
    fn test_match_wraps_the_expression() {
        let stage = MatchStage::new(Expr::field("has_image").eq(Expr::literal(true)));
        assert_eq!(
            stage.compile().unwrap(),
            vec![json!({ "$match": { "$expr": { "$eq": ["$has_image", true] } } })]
        );
    }

    #[test]
    fn test_exists_and_missing() {
        let ops = ExistsStage::new("attributes.camera").compile().unwrap();
        assert_eq!(
            ops,
            vec![json!({ "$match": { "$expr": { "$gt": ["$attributes.camera", null] } } })]
        );
        let ops = ExistsStage::new("attributes.camera").missing().compile().unwrap();
        assert_eq!(
            ops,
            vec![json!({ "$match": {
                "$expr": { "$not": [{ "$gt": ["$attributes.camera", null] }] }
            } })]
        );
    }

    #[test]
    fn test_select_and_exclude_by_event_id() {
        let ops = SelectStage::new(vec!["a".into(), "b".into()]).compile().unwrap();
        assert_eq!(
            ops,
            vec![json!({ "$match": { "event_id": { "$in": ["a", "b"] } } })]
        );
        let ops = ExcludeStage::new(vec!["a".into()]).compile().unwrap();
        assert_eq!(
            ops,
            vec![json!({ "$match": { "event_id": { "$nin": ["a"] } } })]
        );
    }

    #[test]
    fn test_sort_by_field_path() {
        let ops = SortByStage::new(SortKey::Field("event_id".into()))
            .descending()
            .compile()
            .unwrap();
        assert_eq!(ops, vec![json!({ "$sort": { "event_id": -1 } })]);
    }

    #[test]
    fn test_sort_by_expression_uses_a_temporary_key() {
        let expr = Expr::apply(Operator::Length, vec![Expr::field("detections")]);
        let ops = SortByStage::new(SortKey::Expr(expr)).compile().unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(
            ops[0],
            json!({ "$set": {
                "_sort_field": { "$size": { "$ifNull": ["$detections", []] } }
            } })
        );
        assert_eq!(ops[1], json!({ "$sort": { "_sort_field": 1 } }));
        assert_eq!(ops[2], json!({ "$unset": "_sort_field" }));
    }

    #[test]
    fn test_sort_key_serde_is_untagged() {
        let field: SortKey = serde_json::from_value(json!("event_id")).unwrap();
        assert_eq!(field, SortKey::Field("event_id".into()));
        let expr: SortKey = serde_json::from_value(json!({ "field": "event_id" })).unwrap();
        assert_eq!(expr, SortKey::Expr(Expr::field("event_id")));
    }
}
