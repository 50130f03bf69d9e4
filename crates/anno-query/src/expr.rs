//! Typed expression algebra compiled to document-store operator
//! documents.
//!
//! An [`Expr`] is a recursive tagged union of literals, field
//! references, and operator applications over a closed catalogue.
//! Compilation is a pure structural recursion: no state is retained
//! between compilations, and unknown operator ids fail with
//! [`QueryError::UnsupportedOperator`] at compile time, never at
//! execution time.
//!
//! Method-style operators take their receiver as the first argument;
//! arguments that must be constants (field names for `set_field`, the
//! mapping for `map_values`, patterns for the string predicates) are
//! supplied as literal sub-expressions.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum::{Display, EnumIter, EnumString};

use crate::error::{QueryError, QueryResult};

/// Variable bound by `filter`/`map` contexts in the target language.
const CURRENT_ELEMENT: &str = "$$this";

/// The closed operator catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumIter, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operator {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    // Comparison
    Eq,
    Ne,
    Gte,
    Gt,
    Lte,
    Lt,
    // Boolean
    And,
    Or,
    Not,
    // Membership
    IsIn,
    // Collection methods
    Length,
    Filter,
    Map,
    Sort,
    Slice,
    SetField,
    MapValues,
    // String methods
    Substr,
    Lower,
    Upper,
    StartsWith,
    EndsWith,
    ContainsStr,
    Join,
    Split,
    // Reductions
    Sum,
    Mean,
    Std,
    // Presence
    Exists,
    /// Any operator id outside the catalogue. Kept deserializable so
    /// stored expressions with stale operator names fail at compile
    /// time with a user-facing error instead of a parse error.
    #[serde(untagged)]
    #[strum(default, to_string = "{0}")]
    Other(String),
}

/// A recursive, typed query expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// A constant scalar (or constant document).
    Literal(Value),
    /// A named field path; the empty path means "the value currently
    /// being evaluated" inside `filter`/`map` contexts.
    Field(String),
    /// An operator applied to ordered sub-expressions.
    Apply {
        /// Operator id.
        op: Operator,
        /// Ordered sub-expressions; method operators take their
        /// receiver first.
        args: Vec<Expr>,
    },
}

impl Expr {
    /// A literal expression.
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// A field reference.
    pub fn field(path: impl Into<String>) -> Self {
        Expr::Field(path.into())
    }

    /// The value currently being evaluated (empty field path).
    pub fn current() -> Self {
        Expr::Field(String::new())
    }

    /// An operator application.
    pub fn apply(op: Operator, args: Vec<Expr>) -> Self {
        Expr::Apply { op, args }
    }

    /// `self == other`.
    pub fn eq(self, other: Expr) -> Self {
        Expr::apply(Operator::Eq, vec![self, other])
    }

    /// `self != other`.
    pub fn ne(self, other: Expr) -> Self {
        Expr::apply(Operator::Ne, vec![self, other])
    }

    /// `self && other`.
    pub fn and(self, other: Expr) -> Self {
        Expr::apply(Operator::And, vec![self, other])
    }

    /// `!self`.
    pub fn not(self) -> Self {
        Expr::apply(Operator::Not, vec![self])
    }

    /// Membership of `self` in a constant list of values.
    pub fn is_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Self {
        let haystack: Vec<Value> = values.into_iter().map(Into::into).collect();
        Expr::apply(Operator::IsIn, vec![self, Expr::Literal(Value::Array(haystack))])
    }

    /// Compiles the expression to a target operator document.
    ///
    /// `prefix` is the path context field references resolve under:
    /// empty at the pipeline root, `$$this` inside `filter`/`map`
    /// contexts.
    pub fn compile(&self, prefix: &str) -> QueryResult<Value> {
        match self {
            Expr::Literal(value) => Ok(compile_literal(value)),
            Expr::Field(path) => Ok(Value::String(compile_field(path, prefix))),
            Expr::Apply { op, args } => compile_apply(op, args, prefix),
        }
    }

    /// Expects this expression to be a literal string, for operator
    /// arguments that must be constants.
    fn expect_str(&self, op: &'static str) -> QueryResult<&str> {
        match self {
            Expr::Literal(Value::String(s)) => Ok(s),
            _ => Err(QueryError::InvalidArgument {
                op,
                reason: "argument must be a literal string".into(),
            }),
        }
    }
}

/// Literal strings starting with `$` would be read as field paths by
/// the store; wrap them so they stay constants.
fn compile_literal(value: &Value) -> Value {
    match value {
        Value::String(s) if s.starts_with('$') => json!({ "$literal": s }),
        other => other.clone(),
    }
}

fn compile_field(path: &str, prefix: &str) -> String {
    match (path.is_empty(), prefix.is_empty()) {
        (true, true) => "$$CURRENT".to_string(),
        (true, false) => prefix.to_string(),
        (false, true) => format!("${path}"),
        (false, false) => format!("{prefix}.{path}"),
    }
}

fn compile_apply(op: &Operator, args: &[Expr], prefix: &str) -> QueryResult<Value> {
    use Operator::*;

    match op {
        Add => Ok(json!({ "$add": variadic(op, args, prefix)? })),
        Sub => binary(args, prefix, "$subtract", op),
        Mul => Ok(json!({ "$multiply": variadic(op, args, prefix)? })),
        Div => binary(args, prefix, "$divide", op),
        Mod => binary(args, prefix, "$mod", op),
        Eq => binary(args, prefix, "$eq", op),
        Ne => binary(args, prefix, "$ne", op),
        Gte => binary(args, prefix, "$gte", op),
        Gt => binary(args, prefix, "$gt", op),
        Lte => binary(args, prefix, "$lte", op),
        Lt => binary(args, prefix, "$lt", op),
        And => Ok(json!({ "$and": variadic(op, args, prefix)? })),
        Or => Ok(json!({ "$or": variadic(op, args, prefix)? })),
        Not => {
            let [value] = unary(args, op)?;
            Ok(json!({ "$not": [value.compile(prefix)?] }))
        }
        IsIn => binary(args, prefix, "$in", op),
        Length => {
            let [value] = unary(args, op)?;
            Ok(json!({ "$size": { "$ifNull": [value.compile(prefix)?, []] } }))
        }
        Filter => {
            let [input, cond] = exactly::<2>(args, op)?;
            Ok(json!({
                "$filter": {
                    "input": input.compile(prefix)?,
                    "as": "this",
                    "cond": cond.compile(CURRENT_ELEMENT)?,
                }
            }))
        }
        Map => {
            let [input, body] = exactly::<2>(args, op)?;
            Ok(json!({
                "$map": {
                    "input": input.compile(prefix)?,
                    "as": "this",
                    "in": body.compile(CURRENT_ELEMENT)?,
                }
            }))
        }
        Sort => {
            let [input] = unary(args, op)?;
            Ok(json!({ "$sortArray": { "input": input.compile(prefix)?, "sortBy": 1 } }))
        }
        Slice => match args {
            [input, limit] => Ok(json!({
                "$slice": [input.compile(prefix)?, limit.compile(prefix)?]
            })),
            [input, skip, limit] => Ok(json!({
                "$slice": [input.compile(prefix)?, skip.compile(prefix)?, limit.compile(prefix)?]
            })),
            _ => Err(QueryError::Arity {
                op: op_name(op),
                expected: 2,
                found: args.len(),
            }),
        },
        SetField => {
            let [input, field, value] = exactly::<3>(args, op)?;
            let field = field.expect_str(op_name(op))?;
            Ok(json!({
                "$setField": {
                    "field": field,
                    "input": input.compile(prefix)?,
                    "value": value.compile(prefix)?,
                }
            }))
        }
        MapValues => {
            let [input, mapping] = exactly::<2>(args, op)?;
            let Expr::Literal(Value::Object(mapping)) = mapping else {
                return Err(QueryError::InvalidArgument {
                    op: op_name(op),
                    reason: "mapping must be a literal object".into(),
                });
            };
            let input = input.compile(prefix)?;
            let branches: Vec<Value> = mapping
                .iter()
                .map(|(from, to)| json!({ "case": { "$eq": [input, from] }, "then": to }))
                .collect();
            Ok(json!({ "$switch": { "branches": branches, "default": input } }))
        }
        Substr => {
            let [input, start, len] = exactly::<3>(args, op)?;
            Ok(json!({
                "$substrCP": [input.compile(prefix)?, start.compile(prefix)?, len.compile(prefix)?]
            }))
        }
        Lower => {
            let [input] = unary(args, op)?;
            Ok(json!({ "$toLower": input.compile(prefix)? }))
        }
        Upper => {
            let [input] = unary(args, op)?;
            Ok(json!({ "$toUpper": input.compile(prefix)? }))
        }
        StartsWith => regex_predicate(args, prefix, op, |pat| format!("^{pat}")),
        EndsWith => regex_predicate(args, prefix, op, |pat| format!("{pat}$")),
        ContainsStr => regex_predicate(args, prefix, op, |pat| pat.to_string()),
        Join => {
            let [input, sep] = exactly::<2>(args, op)?;
            let sep = sep.compile(prefix)?;
            Ok(json!({
                "$reduce": {
                    "input": input.compile(prefix)?,
                    "initialValue": "",
                    "in": {
                        "$cond": [
                            { "$eq": ["$$value", ""] },
                            "$$this",
                            { "$concat": ["$$value", sep, "$$this"] },
                        ]
                    }
                }
            }))
        }
        Split => binary(args, prefix, "$split", op),
        Sum => {
            let [input] = unary(args, op)?;
            Ok(json!({ "$sum": input.compile(prefix)? }))
        }
        Mean => {
            let [input] = unary(args, op)?;
            Ok(json!({ "$avg": input.compile(prefix)? }))
        }
        Std => {
            let [input] = unary(args, op)?;
            Ok(json!({ "$stdDevPop": input.compile(prefix)? }))
        }
        Exists => {
            let [input] = unary(args, op)?;
            Ok(json!({ "$gt": [input.compile(prefix)?, Value::Null] }))
        }
        Other(name) => Err(QueryError::UnsupportedOperator(name.clone())),
    }
}

fn op_name(op: &Operator) -> &'static str {
    use Operator::*;
    match op {
        Add => "add",
        Sub => "sub",
        Mul => "mul",
        Div => "div",
        Mod => "mod",
        Eq => "eq",
        Ne => "ne",
        Gte => "gte",
        Gt => "gt",
        Lte => "lte",
        Lt => "lt",
        And => "and",
        Or => "or",
        Not => "not",
        IsIn => "is_in",
        Length => "length",
        Filter => "filter",
        Map => "map",
        Sort => "sort",
        Slice => "slice",
        SetField => "set_field",
        MapValues => "map_values",
        Substr => "substr",
        Lower => "lower",
        Upper => "upper",
        StartsWith => "starts_with",
        EndsWith => "ends_with",
        ContainsStr => "contains_str",
        Join => "join",
        Split => "split",
        Sum => "sum",
        Mean => "mean",
        Std => "std",
        Exists => "exists",
        Other(_) => "other",
    }
}

fn unary<'a>(args: &'a [Expr], op: &Operator) -> QueryResult<[&'a Expr; 1]> {
    exactly::<1>(args, op)
}

fn exactly<'a, const N: usize>(args: &'a [Expr], op: &Operator) -> QueryResult<[&'a Expr; N]> {
    let refs: Vec<&Expr> = args.iter().collect();
    <[&Expr; N]>::try_from(refs).map_err(|_| QueryError::Arity {
        op: op_name(op),
        expected: N,
        found: args.len(),
    })
}

fn binary(args: &[Expr], prefix: &str, target: &str, op: &Operator) -> QueryResult<Value> {
    let [left, right] = exactly::<2>(args, op)?;
    Ok(json!({ target: [left.compile(prefix)?, right.compile(prefix)?] }))
}

fn variadic(op: &Operator, args: &[Expr], prefix: &str) -> QueryResult<Vec<Value>> {
    if args.len() < 2 {
        return Err(QueryError::Arity {
            op: op_name(op),
            expected: 2,
            found: args.len(),
        });
    }
    args.iter().map(|a| a.compile(prefix)).collect()
}

fn regex_predicate(
    args: &[Expr],
    prefix: &str,
    op: &Operator,
    build: impl FnOnce(&str) -> String,
) -> QueryResult<Value> {
    let [input, pattern] = exactly::<2>(args, op)?;
    let pattern = pattern.expect_str(op_name(op))?;
    Ok(json!({
        "$regexMatch": {
            "input": input.compile(prefix)?,
            // Patterns match literally, so metacharacters are escaped.
            "regex": build(&regex::escape(pattern)),
        }
    }))
}
