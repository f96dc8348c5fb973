//! Wire-DSL filter evaluation for the embedded local backend.
//!
//! Remote backends evaluate the DSL server-side; the local collection
//! evaluates it here against stored records. The `uri` field honors
//! segment-prefix membership: a condition ending in `/` (or a value extending
//! the condition past a `/` boundary) matches the whole subtree, which is
//! what subtree deletes and directory scoping rely on. `parent_uri`
//! conditions stay exact so child listings return direct children only.

use serde_json::Value;

/// Fields with subtree-membership semantics in the context collection.
const PATH_FIELDS: &[&str] = &["uri"];

/// Evaluate a compiled filter payload against one record.
///
/// An empty payload matches everything. Unknown ops match nothing, so a
/// malformed filter fails closed.
pub fn matches_filter(record: &Value, dsl: &Value) -> bool {
    match dsl {
        Value::Null => true,
        Value::Object(map) if map.is_empty() => true,
        Value::Object(map) => {
            let Some(op) = map.get("op").and_then(Value::as_str) else {
                return false;
            };
            match op {
                "and" => conds_of(dsl).iter().all(|c| matches_filter(record, c)),
                "or" => conds_of(dsl).iter().any(|c| matches_filter(record, c)),
                "must" => eval_must(record, dsl),
                "range" => eval_range(record, dsl),
                "contains" => eval_contains(record, dsl),
                "prefix" => eval_prefix(record, dsl),
                _ => false,
            }
        }
        _ => false,
    }
}

fn conds_of(dsl: &Value) -> Vec<Value> {
    dsl.get("conds")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn field_of<'a>(record: &'a Value, dsl: &Value) -> Option<(&'a Value, String)> {
    let field = dsl.get("field")?.as_str()?.to_string();
    let value = record.get(&field)?;
    Some((value, field))
}

fn eval_must(record: &Value, dsl: &Value) -> bool {
    let Some((value, field)) = field_of(record, dsl) else {
        return false;
    };
    let is_path = PATH_FIELDS.contains(&field.as_str());
    conds_of(dsl).iter().any(|cond| {
        if value == cond {
            return true;
        }
        if is_path {
            if let (Some(value), Some(cond)) = (value.as_str(), cond.as_str()) {
                return path_matches(value, cond);
            }
        }
        false
    })
}

/// Segment-prefix membership for path fields.
fn path_matches(value: &str, cond: &str) -> bool {
    if value == cond {
        return true;
    }
    let base = cond.trim_end_matches('/');
    value == base || value.starts_with(&format!("{base}/"))
}

fn eval_range(record: &Value, dsl: &Value) -> bool {
    use std::cmp::Ordering;

    let Some((value, _)) = field_of(record, dsl) else {
        return false;
    };
    let check = |key: &str, admit: fn(Ordering) -> bool| -> bool {
        match dsl.get(key) {
            Some(bound) => compare_values(value, bound).map(admit).unwrap_or(false),
            None => true,
        }
    };
    check("gte", |o| o != Ordering::Less)
        && check("gt", |o| o == Ordering::Greater)
        && check("lte", |o| o != Ordering::Greater)
        && check("lt", |o| o == Ordering::Less)
}

/// Compare a record value against a bound. Numbers compare numerically,
/// strings lexically (RFC 3339 timestamps order correctly this way).
fn compare_values(value: &Value, bound: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (value.as_f64(), bound.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (value.as_str(), bound.as_str()) {
        return Some(a.cmp(b));
    }
    None
}

fn eval_contains(record: &Value, dsl: &Value) -> bool {
    let Some((value, _)) = field_of(record, dsl) else {
        return false;
    };
    match (value.as_str(), dsl.get("substring").and_then(Value::as_str)) {
        (Some(value), Some(substring)) => value.contains(substring),
        _ => false,
    }
}

fn eval_prefix(record: &Value, dsl: &Value) -> bool {
    let Some((value, _)) = field_of(record, dsl) else {
        return false;
    };
    match (value.as_str(), dsl.get("prefix").and_then(Value::as_str)) {
        (Some(value), Some(prefix)) => path_matches(value, prefix),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Value {
        json!({
            "id": "r1",
            "uri": "viking://resources/guides/x.md",
            "parent_uri": "viking://resources/guides",
            "context_type": "resource",
            "level": 2,
            "active_count": 5,
            "updated_at": "2026-07-01T00:00:00Z",
            "abstract": "install instructions",
        })
    }

    #[test]
    fn test_empty_filter_matches() {
        assert!(matches_filter(&record(), &json!({})));
        assert!(matches_filter(&record(), &Value::Null));
    }

    #[test]
    fn test_must_equality() {
        let dsl = json!({"op": "must", "field": "context_type", "conds": ["resource"]});
        assert!(matches_filter(&record(), &dsl));

        let dsl = json!({"op": "must", "field": "context_type", "conds": ["memory"]});
        assert!(!matches_filter(&record(), &dsl));
    }

    #[test]
    fn test_must_in_membership() {
        let dsl = json!({"op": "must", "field": "level", "conds": [0, 1, 2]});
        assert!(matches_filter(&record(), &dsl));
    }

    #[test]
    fn test_path_subtree_membership() {
        // Trailing-slash condition matches descendants, not the node itself.
        let dsl = json!({"op": "must", "field": "uri", "conds": ["viking://resources/guides/"]});
        assert!(matches_filter(&record(), &dsl));

        // A sibling with a shared name prefix does not match.
        let dsl = json!({"op": "must", "field": "uri", "conds": ["viking://resources/gui/"]});
        assert!(!matches_filter(&record(), &dsl));

        // Directory condition without slash also scopes the subtree.
        let dsl = json!({"op": "must", "field": "uri", "conds": ["viking://resources"]});
        assert!(matches_filter(&record(), &dsl));
    }

    #[test]
    fn test_and_or() {
        let dsl = json!({
            "op": "and",
            "conds": [
                {"op": "must", "field": "context_type", "conds": ["resource"]},
                {"op": "or", "conds": [
                    {"op": "must", "field": "level", "conds": [0]},
                    {"op": "must", "field": "level", "conds": [2]},
                ]},
            ],
        });
        assert!(matches_filter(&record(), &dsl));
    }

    #[test]
    fn test_range_numeric_and_time() {
        let dsl = json!({"op": "range", "field": "active_count", "gte": 5});
        assert!(matches_filter(&record(), &dsl));

        let dsl = json!({"op": "range", "field": "active_count", "gt": 5});
        assert!(!matches_filter(&record(), &dsl));

        let dsl = json!({"op": "range", "field": "updated_at", "gte": "2026-01-01T00:00:00Z", "lt": "2026-08-01T00:00:00Z"});
        assert!(matches_filter(&record(), &dsl));
    }

    #[test]
    fn test_contains() {
        let dsl = json!({"op": "contains", "field": "abstract", "substring": "install"});
        assert!(matches_filter(&record(), &dsl));

        let dsl = json!({"op": "contains", "field": "abstract", "substring": "uninstall"});
        assert!(!matches_filter(&record(), &dsl));
    }

    #[test]
    fn test_unknown_op_fails_closed() {
        let dsl = json!({"op": "nope", "field": "level", "conds": [2]});
        assert!(!matches_filter(&record(), &dsl));
    }

    #[test]
    fn test_missing_field_fails_closed() {
        let dsl = json!({"op": "must", "field": "absent", "conds": ["x"]});
        assert!(!matches_filter(&record(), &dsl));
    }
}
