//! Collection schema definitions for the shared context collection.

use serde_json::{Value, json};
use std::collections::HashSet;

use openviking_core::Result;

use crate::backend::VectorIndexBackend;

/// Schema of the unified context collection.
///
/// `id` is the primary key; `uri`/`parent_uri` are path-typed so backends can
/// do subtree membership on them. The scalar index list covers every field
/// the tenant scope filters and the retriever touch.
pub fn context_collection(name: &str, vector_dim: usize) -> Value {
    json!({
        "CollectionName": name,
        "Description": "Unified context collection",
        "Fields": [
            {"FieldName": "id", "FieldType": "string", "IsPrimaryKey": true},
            {"FieldName": "uri", "FieldType": "path"},
            // Reserved for concrete resource types (file, image, repository, ...).
            {"FieldName": "type", "FieldType": "string"},
            {"FieldName": "context_type", "FieldType": "string"},
            {"FieldName": "vector", "FieldType": "vector", "Dim": vector_dim},
            {"FieldName": "sparse_vector", "FieldType": "sparse_vector"},
            {"FieldName": "created_at", "FieldType": "date_time"},
            {"FieldName": "updated_at", "FieldType": "date_time"},
            {"FieldName": "active_count", "FieldType": "int64"},
            {"FieldName": "parent_uri", "FieldType": "path"},
            {"FieldName": "level", "FieldType": "int64"},
            {"FieldName": "name", "FieldType": "string"},
            {"FieldName": "description", "FieldType": "string"},
            {"FieldName": "tags", "FieldType": "string"},
            {"FieldName": "abstract", "FieldType": "string"},
            {"FieldName": "account_id", "FieldType": "string"},
            {"FieldName": "owner_space", "FieldType": "string"},
        ],
        "ScalarIndex": [
            "uri",
            "type",
            "context_type",
            "created_at",
            "updated_at",
            "active_count",
            "parent_uri",
            "level",
            "name",
            "tags",
            "account_id",
            "owner_space",
        ],
    })
}

/// Field names declared by a schema payload.
pub fn schema_field_names(schema: &Value) -> HashSet<String> {
    schema
        .get("Fields")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(|f| f.get("FieldName").and_then(Value::as_str))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Create the context collection if it does not exist yet.
///
/// Returns `true` when the collection was created by this call.
pub async fn init_context_collection(
    backend: &VectorIndexBackend,
    name: &str,
    vector_dim: usize,
) -> Result<bool> {
    let schema = context_collection(name, vector_dim);
    backend.create_collection(name, schema).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_fields() {
        let schema = context_collection("context", 1024);
        let names = schema_field_names(&schema);
        for required in [
            "id",
            "uri",
            "parent_uri",
            "context_type",
            "vector",
            "sparse_vector",
            "level",
            "abstract",
            "account_id",
            "owner_space",
            "active_count",
        ] {
            assert!(names.contains(required), "missing field {required}");
        }

        let scalar = schema["ScalarIndex"].as_array().unwrap();
        assert!(scalar.iter().any(|v| v == "uri"));
        assert!(scalar.iter().all(|v| v != "vector"));
    }

    #[test]
    fn test_vector_dim_propagates() {
        let schema = context_collection("context", 4);
        let dim = schema["Fields"]
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["FieldType"] == "vector")
            .and_then(|f| f["Dim"].as_u64())
            .unwrap();
        assert_eq!(dim, 4);
    }
}
