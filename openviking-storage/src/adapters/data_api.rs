//! Shared request/response shapes of the VikingDB data API.
//!
//! The HTTP and private-VikingDB backends speak the same JSON data plane;
//! this module holds the paths, body builders, and result parsers for it.

use serde_json::{Value, json};

use crate::adapters::{Record, SearchMode, SearchRequest};

pub const UPSERT_DATA: &str = "/api/vikingdb/data/upsert_data";
pub const FETCH_DATA: &str = "/api/vikingdb/data/fetch_data";
pub const SEARCH: &str = "/api/vikingdb/data/search";
pub const DELETE_DATA: &str = "/api/vikingdb/data/delete_data";
pub const DELETE_ALL_DATA: &str = "/api/vikingdb/data/delete_all_data";
pub const AGGREGATE: &str = "/api/vikingdb/data/aggregate";

/// Scope fields present on every data-plane request.
pub fn scope_body(project_name: &str, collection_name: &str) -> Value {
    json!({
        "ProjectName": project_name,
        "CollectionName": collection_name,
    })
}

pub fn upsert_body(scope: &Value, records: &[Record]) -> Value {
    let mut body = scope.clone();
    body["Data"] = json!(records);
    body
}

pub fn fetch_body(scope: &Value, ids: &[String]) -> Value {
    let mut body = scope.clone();
    body["Ids"] = json!(ids);
    body
}

pub fn search_body(scope: &Value, request: &SearchRequest) -> Value {
    let mut body = scope.clone();
    body["IndexName"] = json!(request.index_name);
    body["Limit"] = json!(request.limit);
    body["Offset"] = json!(request.offset);
    body["Filters"] = request.filter_dsl.clone();
    if let Some(fields) = &request.output_fields {
        body["OutputFields"] = json!(fields);
    }
    match &request.mode {
        SearchMode::Vector => {
            if let Some(dense) = &request.dense_vector {
                body["DenseVector"] = json!(dense);
            }
            if let Some(sparse) = &request.sparse_vector {
                body["SparseVector"] = json!(sparse);
            }
            body["SearchType"] = json!("vector");
        }
        SearchMode::Scalar { field, desc } => {
            body["SearchType"] = json!("scalar");
            body["Field"] = json!(field);
            body["Order"] = json!(if *desc { "desc" } else { "asc" });
        }
        SearchMode::Random => {
            body["SearchType"] = json!("random");
        }
    }
    body
}

pub fn delete_body(scope: &Value, ids: &[String]) -> Value {
    let mut body = scope.clone();
    body["Ids"] = json!(ids);
    body
}

pub fn aggregate_count_body(scope: &Value, filter_dsl: Value) -> Value {
    let mut body = scope.clone();
    body["Op"] = json!("count");
    body["Filters"] = filter_dsl;
    body
}

/// Parse `{data: [{id, score, fields}]}` search results into flat records.
pub fn parse_search_result(result: &Value) -> Vec<Record> {
    result
        .get("data")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_scored_item).collect())
        .unwrap_or_default()
}

fn parse_scored_item(item: &Value) -> Option<Record> {
    let mut record = item
        .get("fields")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let id = item.get("id")?.as_str()?.to_string();
    record.insert("id".into(), json!(id));
    let score = item.get("score").and_then(Value::as_f64).unwrap_or(0.0);
    record.insert("_score".into(), json!(score));
    Some(record)
}

/// Parse `{fetch: [{id, fields}]}` fetch results into flat records.
pub fn parse_fetch_result(result: &Value) -> Vec<Record> {
    result
        .get("fetch")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let mut record = item
                        .get("fields")
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default();
                    let id = item.get("id")?.as_str()?.to_string();
                    record.insert("id".into(), json!(id));
                    Some(record)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse `{agg: {_total: N}}` count results.
pub fn parse_count_result(result: &Value) -> i64 {
    let total = result.pointer("/agg/_total");
    match total {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_result() {
        let result = json!({
            "data": [
                {"id": "a", "score": 0.9, "fields": {"uri": "viking://r/x"}},
                {"id": "b", "fields": {}},
                {"score": 0.1},
            ]
        });
        let records = parse_search_result(&result);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["id"], "a");
        assert_eq!(records[0]["_score"], json!(0.9));
        assert_eq!(records[1]["_score"], json!(0.0));
    }

    #[test]
    fn test_parse_count_result() {
        assert_eq!(parse_count_result(&json!({"agg": {"_total": 7}})), 7);
        assert_eq!(parse_count_result(&json!({"agg": {"_total": "12"}})), 12);
        assert_eq!(parse_count_result(&json!({})), 0);
    }

    #[test]
    fn test_search_body_modes() {
        let scope = scope_body("default", "context");
        let request = SearchRequest {
            index_name: "default".into(),
            mode: SearchMode::Scalar {
                field: "active_count".into(),
                desc: true,
            },
            dense_vector: None,
            sparse_vector: None,
            filter_dsl: json!({}),
            limit: 5,
            offset: 0,
            output_fields: None,
        };
        let body = search_body(&scope, &request);
        assert_eq!(body["SearchType"], "scalar");
        assert_eq!(body["Order"], "desc");
        assert_eq!(body["CollectionName"], "context");
    }
}
