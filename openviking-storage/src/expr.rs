//! Filter expression AST for vector store queries.
//!
//! The AST is backend-neutral; adapters compile it to the wire DSL
//! (`{op: "must"|"and"|"or"|"range"|"contains", ...}`) before sending it to a
//! backend. [`FilterExpr::RawDsl`] passes a pre-built payload through
//! unchanged.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

/// Backend-neutral filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Eq {
        field: String,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    Range {
        field: String,
        gte: Option<Value>,
        gt: Option<Value>,
        lte: Option<Value>,
        lt: Option<Value>,
    },
    Contains {
        field: String,
        substring: String,
    },
    TimeRange {
        field: String,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    /// Pre-compiled wire DSL, passed through verbatim.
    RawDsl(Value),
}

impl FilterExpr {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        FilterExpr::In {
            field: field.into(),
            values,
        }
    }

    pub fn contains(field: impl Into<String>, substring: impl Into<String>) -> Self {
        FilterExpr::Contains {
            field: field.into(),
            substring: substring.into(),
        }
    }

    /// Compile to the wire DSL. Degenerate expressions collapse: an empty
    /// `And`/`Or` compiles to an empty object, a single-condition one to the
    /// condition itself.
    pub fn compile(&self) -> Value {
        match self {
            FilterExpr::RawDsl(payload) => payload.clone(),
            FilterExpr::And(conds) => compile_group("and", conds),
            FilterExpr::Or(conds) => compile_group("or", conds),
            FilterExpr::Eq { field, value } => json!({
                "op": "must",
                "field": field,
                "conds": [value],
            }),
            FilterExpr::In { field, values } => json!({
                "op": "must",
                "field": field,
                "conds": values,
            }),
            FilterExpr::Range {
                field,
                gte,
                gt,
                lte,
                lt,
            } => {
                let mut payload = Map::new();
                payload.insert("op".into(), json!("range"));
                payload.insert("field".into(), json!(field));
                for (key, bound) in [("gte", gte), ("gt", gt), ("lte", lte), ("lt", lt)] {
                    if let Some(value) = bound {
                        payload.insert(key.into(), value.clone());
                    }
                }
                Value::Object(payload)
            }
            FilterExpr::Contains { field, substring } => json!({
                "op": "contains",
                "field": field,
                "substring": substring,
            }),
            FilterExpr::TimeRange { field, start, end } => {
                let mut payload = Map::new();
                payload.insert("op".into(), json!("range"));
                payload.insert("field".into(), json!(field));
                if let Some(start) = start {
                    payload.insert("gte".into(), json!(start.to_rfc3339()));
                }
                if let Some(end) = end {
                    payload.insert("lt".into(), json!(end.to_rfc3339()));
                }
                Value::Object(payload)
            }
        }
    }

    /// Combine filters under `And`, dropping absent ones. `None` when nothing
    /// remains.
    pub fn merge(filters: impl IntoIterator<Item = Option<FilterExpr>>) -> Option<FilterExpr> {
        let mut non_empty: Vec<FilterExpr> = filters.into_iter().flatten().collect();
        match non_empty.len() {
            0 => None,
            1 => Some(non_empty.remove(0)),
            _ => Some(FilterExpr::And(non_empty)),
        }
    }
}

fn compile_group(op: &str, conds: &[FilterExpr]) -> Value {
    let mut compiled: Vec<Value> = conds
        .iter()
        .map(FilterExpr::compile)
        .filter(|c| !is_empty_dsl(c))
        .collect();
    match compiled.len() {
        0 => json!({}),
        1 => compiled.remove(0),
        _ => json!({ "op": op, "conds": compiled }),
    }
}

/// Whether a compiled payload carries no constraint.
pub fn is_empty_dsl(dsl: &Value) -> bool {
    match dsl {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Compile an optional filter; absent or empty filters become `{}`.
pub fn compile_filter(filter: Option<&FilterExpr>) -> Value {
    filter.map(FilterExpr::compile).unwrap_or_else(|| json!({}))
}
