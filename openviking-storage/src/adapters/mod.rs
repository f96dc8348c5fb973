//! Backend-specific collection adapters.
//!
//! [`CollectionAdapter`] is the sealed seam between the vector index backend
//! and a concrete vector store. The trait carries the shared pipeline
//! (id assignment, filter compilation, query dispatch, delete-by-filter) as
//! provided methods; each backend implements the raw plane plus the
//! extension hooks it needs.

mod client;
mod data_api;
mod http;
mod local;
mod vikingdb;
mod volcengine;

pub use http::HttpCollectionAdapter;
pub use local::LocalCollectionAdapter;
pub use vikingdb::VikingDbPrivateCollectionAdapter;
pub use volcengine::VolcengineCollectionAdapter;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use openviking_core::config::VectorDbConfig;
use openviking_core::{Result, VikingError};

use crate::expr::{FilterExpr, compile_filter};

/// A stored record: a flat JSON object keyed by field name.
pub type Record = Map<String, Value>;

/// Default index name used by every collection.
pub const DEFAULT_INDEX_NAME: &str = "default";

/// Query parameters accepted by the shared `query` pipeline.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pub query_vector: Option<Vec<f32>>,
    pub sparse_query_vector: Option<HashMap<String, f32>>,
    pub filter: Option<FilterExpr>,
    pub limit: usize,
    pub offset: usize,
    pub output_fields: Option<Vec<String>>,
    pub with_vector: bool,
    pub order_by: Option<String>,
    pub order_desc: bool,
}

impl QueryParams {
    pub fn new() -> Self {
        Self {
            limit: 10,
            ..Default::default()
        }
    }
}

/// How a raw search should scan the collection.
#[derive(Debug, Clone)]
pub enum SearchMode {
    /// Dense and/or sparse vector similarity.
    Vector,
    /// Scalar-sorted scan over one field.
    Scalar { field: String, desc: bool },
    /// Unordered scan.
    Random,
}

/// Fully-resolved search request handed to the raw plane.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub index_name: String,
    pub mode: SearchMode,
    pub dense_vector: Option<Vec<f32>>,
    pub sparse_vector: Option<HashMap<String, f32>>,
    pub filter_dsl: Value,
    pub limit: usize,
    pub offset: usize,
    pub output_fields: Option<Vec<String>>,
}

/// Backend-specific adapter for single-collection operations.
#[async_trait]
pub trait CollectionAdapter: Send + Sync {
    /// Backend key (`local`, `http`, `volcengine`, `vikingdb`).
    fn mode(&self) -> &'static str;

    fn collection_name(&self) -> String;

    async fn collection_exists(&self) -> Result<bool>;

    /// Create the backend collection object from its metadata.
    async fn create_backend_collection(&self, meta: Value) -> Result<()>;

    /// Create an index on the bound collection.
    async fn create_index(&self, index_name: &str, index_meta: Value) -> Result<()>;

    async fn list_indexes(&self) -> Result<Vec<String>>;

    async fn drop_index(&self, index_name: &str) -> Result<()>;

    /// Drop the backend collection itself. Returns `false` when the backend
    /// does not support dropping.
    async fn drop_backend_collection(&self) -> Result<bool>;

    async fn close(&self) -> Result<()>;

    /// Collection metadata, when the collection exists.
    async fn get_collection_info(&self) -> Result<Option<Value>>;

    // ------------------------------------------------------------------
    // Raw data plane
    // ------------------------------------------------------------------

    async fn raw_upsert(&self, records: Vec<Record>) -> Result<()>;

    async fn raw_fetch(&self, ids: &[String]) -> Result<Vec<Record>>;

    /// Search; every returned record carries `id` and `_score`.
    async fn raw_search(&self, request: SearchRequest) -> Result<Vec<Record>>;

    async fn raw_delete(&self, ids: &[String]) -> Result<()>;

    async fn raw_count(&self, filter_dsl: Value) -> Result<i64>;

    async fn raw_clear(&self) -> Result<()>;

    // ------------------------------------------------------------------
    // Extension hooks
    // ------------------------------------------------------------------

    /// Remove scalar-index fields the backend rejects.
    fn sanitize_scalar_index_fields(&self, scalar: Vec<String>, _fields_meta: &Value) -> Vec<String> {
        scalar
    }

    /// Default index metadata for this backend.
    fn build_default_index_meta(
        &self,
        index_name: &str,
        distance: &str,
        use_sparse: bool,
        sparse_weight: f32,
        scalar_index_fields: &[String],
    ) -> Value {
        build_index_meta(
            index_name,
            if use_sparse { "flat_hybrid" } else { "flat" },
            distance,
            use_sparse,
            sparse_weight,
            scalar_index_fields,
        )
    }

    /// Undo backend-side field mangling on read.
    fn normalize_record_for_read(&self, record: Record) -> Record {
        record
    }

    // ------------------------------------------------------------------
    // Shared pipeline
    // ------------------------------------------------------------------

    /// Create the collection with its default index. Returns `false` when it
    /// already exists.
    async fn create_collection(
        &self,
        schema: Value,
        distance: &str,
        sparse_weight: f32,
        index_name: &str,
    ) -> Result<bool> {
        if self.collection_exists().await? {
            return Ok(false);
        }

        let mut meta = schema
            .as_object()
            .cloned()
            .ok_or_else(|| VikingError::schema("collection schema must be an object"))?;
        let scalar_index_fields: Vec<String> = meta
            .remove("ScalarIndex")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        if !meta.contains_key("CollectionName") {
            meta.insert("CollectionName".into(), json!(self.collection_name()));
        }
        let fields_meta = meta.get("Fields").cloned().unwrap_or_else(|| json!([]));

        self.create_backend_collection(Value::Object(meta)).await?;

        let scalar_index_fields =
            self.sanitize_scalar_index_fields(scalar_index_fields, &fields_meta);
        let index_meta = self.build_default_index_meta(
            index_name,
            distance,
            sparse_weight > 0.0,
            sparse_weight,
            &scalar_index_fields,
        );
        self.create_index(index_name, index_meta).await?;
        Ok(true)
    }

    /// Drop the collection, its indexes first. Returns `false` when there is
    /// nothing to drop or the backend does not support dropping.
    async fn drop_collection(&self) -> Result<bool> {
        if !self.collection_exists().await? {
            return Ok(false);
        }

        // Drop indexes first so index lifecycle remains internal to the adapter.
        match self.list_indexes().await {
            Ok(indexes) => {
                for index_name in indexes {
                    if let Err(e) = self.drop_index(&index_name).await {
                        warn!("Failed to drop index {}: {}", index_name, e);
                    }
                }
            }
            Err(e) => warn!("Failed to list indexes before dropping collection: {}", e),
        }

        let dropped = self.drop_backend_collection().await?;
        if !dropped {
            warn!("Collection drop is not supported by backend mode={}", self.mode());
        }
        Ok(dropped)
    }

    /// Upsert records, assigning ids where missing. Returns the record ids.
    async fn upsert(&self, records: Vec<Record>) -> Result<Vec<String>> {
        self.ensure_exists().await?;

        let mut ids = Vec::with_capacity(records.len());
        let mut normalized = Vec::with_capacity(records.len());
        for mut record in records {
            let id = record
                .get("id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            record.insert("id".into(), json!(id));
            ids.push(id);
            normalized.push(record);
        }
        self.raw_upsert(normalized).await?;
        Ok(ids)
    }

    /// Fetch records by id.
    async fn get(&self, ids: &[String]) -> Result<Vec<Record>> {
        self.ensure_exists().await?;
        let records = self.raw_fetch(ids).await?;
        Ok(records
            .into_iter()
            .map(|r| self.normalize_record_for_read(r))
            .collect())
    }

    /// Query the collection. With vectors, a similarity search; without,
    /// either a scalar-sorted scan (`order_by`) or a random scan.
    async fn query(&self, params: QueryParams) -> Result<Vec<Record>> {
        self.ensure_exists().await?;

        let has_dense = params.query_vector.as_ref().is_some_and(|v| !v.is_empty());
        let has_sparse = params
            .sparse_query_vector
            .as_ref()
            .is_some_and(|v| !v.is_empty());
        let mode = if has_dense || has_sparse {
            SearchMode::Vector
        } else if let Some(field) = &params.order_by {
            SearchMode::Scalar {
                field: field.clone(),
                desc: params.order_desc,
            }
        } else {
            SearchMode::Random
        };

        let request = SearchRequest {
            index_name: DEFAULT_INDEX_NAME.to_string(),
            mode,
            dense_vector: params.query_vector.filter(|v| !v.is_empty()),
            sparse_vector: params.sparse_query_vector.filter(|v| !v.is_empty()),
            filter_dsl: compile_filter(params.filter.as_ref()),
            limit: params.limit,
            offset: params.offset,
            output_fields: params.output_fields,
        };

        let records = self.raw_search(request).await?;
        Ok(records
            .into_iter()
            .map(|record| {
                let mut record = self.normalize_record_for_read(record);
                if !record.contains_key("_score") {
                    record.insert("_score".into(), json!(0.0));
                }
                if !params.with_vector {
                    record.remove("vector");
                    record.remove("sparse_vector");
                }
                record
            })
            .collect())
    }

    /// Delete by explicit ids, or by filter (resolved to ids via a bounded
    /// query first). Returns the number of deleted records.
    async fn delete_by(
        &self,
        ids: Option<Vec<String>>,
        filter: Option<FilterExpr>,
        limit: usize,
    ) -> Result<usize> {
        self.ensure_exists().await?;

        let mut delete_ids = ids.unwrap_or_default();
        if delete_ids.is_empty() {
            if let Some(filter) = filter {
                let mut params = QueryParams::new();
                params.filter = Some(filter);
                params.limit = limit;
                params.with_vector = true;
                delete_ids = self
                    .query(params)
                    .await?
                    .into_iter()
                    .filter_map(|r| r.get("id").and_then(Value::as_str).map(String::from))
                    .collect();
            }
        }

        if delete_ids.is_empty() {
            return Ok(0);
        }
        self.raw_delete(&delete_ids).await?;
        Ok(delete_ids.len())
    }

    async fn count(&self, filter: Option<FilterExpr>) -> Result<i64> {
        self.ensure_exists().await?;
        self.raw_count(compile_filter(filter.as_ref())).await
    }

    async fn clear(&self) -> Result<bool> {
        self.ensure_exists().await?;
        self.raw_clear().await?;
        Ok(true)
    }

    /// Error with [`VikingError::CollectionNotFound`] when the collection is
    /// absent.
    async fn ensure_exists(&self) -> Result<()> {
        if self.collection_exists().await? {
            Ok(())
        } else {
            Err(VikingError::collection_not_found(self.collection_name()))
        }
    }
}

/// Build the common index metadata shape shared by all backends.
pub(crate) fn build_index_meta(
    index_name: &str,
    index_type: &str,
    distance: &str,
    use_sparse: bool,
    sparse_weight: f32,
    scalar_index_fields: &[String],
) -> Value {
    let mut vector_index = json!({
        "IndexType": index_type,
        "Distance": distance,
        "Quant": "int8",
    });
    if use_sparse {
        vector_index["EnableSparse"] = json!(true);
        vector_index["SearchWithSparseLogitAlpha"] = json!(sparse_weight);
    }
    json!({
        "IndexName": index_name,
        "VectorIndex": vector_index,
        "ScalarIndex": scalar_index_fields,
    })
}

/// Drop scalar-index entries for `date_time` fields; the hosted VikingDB
/// backends reject scalar indexes on them.
pub(crate) fn drop_date_time_fields(scalar: Vec<String>, fields_meta: &Value) -> Vec<String> {
    let date_time_fields: Vec<&str> = fields_meta
        .as_array()
        .map(|fields| {
            fields
                .iter()
                .filter(|f| f.get("FieldType").and_then(Value::as_str) == Some("date_time"))
                .filter_map(|f| f.get("FieldName").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    scalar
        .into_iter()
        .filter(|field| !date_time_fields.contains(&field.as_str()))
        .collect()
}

/// Restore the `viking://` prefix on `uri`/`parent_uri` after a backend
/// stripped it to its internal path form.
pub(crate) fn restore_uri_prefixes(mut record: Record) -> Record {
    for key in ["uri", "parent_uri"] {
        if let Some(Value::String(value)) = record.get(key) {
            if !value.starts_with("viking://") {
                let stripped = value.trim_matches('/');
                if !stripped.is_empty() {
                    let restored = format!("viking://{stripped}");
                    record.insert(key.into(), json!(restored));
                }
            }
        }
    }
    record
}

/// Unified factory entrypoint for backend-specific collection adapters.
pub fn create_collection_adapter(config: &VectorDbConfig) -> Result<Arc<dyn CollectionAdapter>> {
    match config.backend.as_str() {
        "local" => Ok(Arc::new(LocalCollectionAdapter::from_config(config)?)),
        "http" => Ok(Arc::new(HttpCollectionAdapter::from_config(config)?)),
        "volcengine" => Ok(Arc::new(VolcengineCollectionAdapter::from_config(config)?)),
        "vikingdb" => Ok(Arc::new(VikingDbPrivateCollectionAdapter::from_config(
            config,
        )?)),
        other => Err(VikingError::invalid_argument(format!(
            "Vector backend {other} is not supported. Available backends: http, local, vikingdb, volcengine"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_uri_prefixes() {
        let mut record = Record::new();
        record.insert("uri".into(), json!("/resources/guides/x.md/"));
        record.insert("parent_uri".into(), json!("viking://resources/guides"));
        let restored = restore_uri_prefixes(record);
        assert_eq!(restored["uri"], "viking://resources/guides/x.md");
        assert_eq!(restored["parent_uri"], "viking://resources/guides");
    }

    #[test]
    fn test_drop_date_time_fields() {
        let fields_meta = json!([
            {"FieldName": "uri", "FieldType": "path"},
            {"FieldName": "created_at", "FieldType": "date_time"},
            {"FieldName": "updated_at", "FieldType": "date_time"},
        ]);
        let scalar = vec!["uri".to_string(), "created_at".to_string(), "updated_at".to_string()];
        let kept = drop_date_time_fields(scalar, &fields_meta);
        assert_eq!(kept, vec!["uri".to_string()]);
    }

    #[test]
    fn test_build_index_meta_sparse() {
        let meta = build_index_meta("default", "hnsw_hybrid", "cosine", true, 0.3, &[]);
        assert_eq!(meta["VectorIndex"]["EnableSparse"], json!(true));
        assert_eq!(meta["VectorIndex"]["SearchWithSparseLogitAlpha"], json!(0.3));
    }

    #[test]
    fn test_factory_rejects_unknown_backend() {
        let mut config = VectorDbConfig::default();
        config.backend = "pinecone".to_string();
        assert!(create_collection_adapter(&config).is_err());
    }
}
