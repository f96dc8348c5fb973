//! Private VikingDB backend collection adapter.
//!
//! Talks to a self-hosted VikingDB over a custom host/header pair.
//! Collections must be pre-provisioned: `create_collection` fails unless the
//! collection already exists, and `drop_collection` is a no-op returning
//! `false`.

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use openviking_core::config::VectorDbConfig;
use openviking_core::{Result, VikingError};

use super::client::{JsonApiClient, normalize_base_url};
use super::data_api;
use super::{
    CollectionAdapter, Record, SearchRequest, build_index_meta, drop_date_time_fields,
    restore_uri_prefixes,
};

const GET_COLLECTION: &str = "/api/vikingdb/collection/get";
const CREATE_INDEX: &str = "/api/vikingdb/index/create";
const LIST_INDEXES: &str = "/api/vikingdb/index/list";
const DROP_INDEX: &str = "/api/vikingdb/index/drop";

/// Adapter for a private VikingDB deployment.
pub struct VikingDbPrivateCollectionAdapter {
    client: JsonApiClient,
    project_name: String,
    collection_name: String,
    known_exists: RwLock<bool>,
}

impl VikingDbPrivateCollectionAdapter {
    pub fn from_config(config: &VectorDbConfig) -> Result<Self> {
        let vikingdb = config
            .vikingdb
            .as_ref()
            .filter(|v| !v.host.is_empty())
            .ok_or_else(|| {
                VikingError::invalid_argument("VikingDB backend requires a valid host")
            })?;
        Ok(Self {
            client: JsonApiClient::new(normalize_base_url(&vikingdb.host), &vikingdb.headers)?,
            project_name: config.project_name.clone().unwrap_or_else(|| "default".into()),
            collection_name: config.name.clone(),
            known_exists: RwLock::new(false),
        })
    }

    fn scope(&self) -> Value {
        data_api::scope_body(&self.project_name, &self.collection_name)
    }

    async fn fetch_collection_meta(&self) -> Result<Option<Value>> {
        let result = self.client.post(GET_COLLECTION, &self.scope()).await?;
        let has_meta = result.as_object().is_some_and(|m| !m.is_empty());
        Ok(has_meta.then_some(result))
    }
}

#[async_trait]
impl CollectionAdapter for VikingDbPrivateCollectionAdapter {
    fn mode(&self) -> &'static str {
        "vikingdb"
    }

    fn collection_name(&self) -> String {
        self.collection_name.clone()
    }

    async fn collection_exists(&self) -> Result<bool> {
        if *self.known_exists.read().await {
            return Ok(true);
        }
        let exists = self.fetch_collection_meta().await?.is_some();
        if exists {
            *self.known_exists.write().await = true;
        }
        Ok(exists)
    }

    async fn create_backend_collection(&self, _meta: Value) -> Result<()> {
        if self.collection_exists().await? {
            return Ok(());
        }
        Err(VikingError::invalid_argument(
            "private vikingdb collection must be pre-created",
        ))
    }

    async fn create_index(&self, index_name: &str, index_meta: Value) -> Result<()> {
        let mut body = self.scope();
        body["IndexName"] = json!(index_name);
        body["IndexMeta"] = index_meta;
        self.client.post(CREATE_INDEX, &body).await?;
        Ok(())
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        let result = self.client.post(LIST_INDEXES, &self.scope()).await?;
        Ok(result
            .get("indexes")
            .or_else(|| result.get("Indexes"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn drop_index(&self, index_name: &str) -> Result<()> {
        let mut body = self.scope();
        body["IndexName"] = json!(index_name);
        self.client.post(DROP_INDEX, &body).await?;
        Ok(())
    }

    /// Dropping is not supported; callers must not assume the collection is
    /// gone.
    async fn drop_backend_collection(&self) -> Result<bool> {
        Ok(false)
    }

    async fn close(&self) -> Result<()> {
        *self.known_exists.write().await = false;
        Ok(())
    }

    async fn get_collection_info(&self) -> Result<Option<Value>> {
        self.fetch_collection_meta().await
    }

    fn sanitize_scalar_index_fields(&self, scalar: Vec<String>, fields_meta: &Value) -> Vec<String> {
        drop_date_time_fields(scalar, fields_meta)
    }

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
            if use_sparse { "hnsw_hybrid" } else { "hnsw" },
            distance,
            use_sparse,
            sparse_weight,
            scalar_index_fields,
        )
    }

    fn normalize_record_for_read(&self, record: Record) -> Record {
        restore_uri_prefixes(record)
    }

    async fn raw_upsert(&self, records: Vec<Record>) -> Result<()> {
        let body = data_api::upsert_body(&self.scope(), &records);
        self.client.post(data_api::UPSERT_DATA, &body).await?;
        Ok(())
    }

    async fn raw_fetch(&self, ids: &[String]) -> Result<Vec<Record>> {
        let result = self
            .client
            .post(data_api::FETCH_DATA, &data_api::fetch_body(&self.scope(), ids))
            .await?;
        Ok(data_api::parse_fetch_result(&result))
    }

    async fn raw_search(&self, request: SearchRequest) -> Result<Vec<Record>> {
        let result = self
            .client
            .post(data_api::SEARCH, &data_api::search_body(&self.scope(), &request))
            .await?;
        Ok(data_api::parse_search_result(&result))
    }

    async fn raw_delete(&self, ids: &[String]) -> Result<()> {
        self.client
            .post(data_api::DELETE_DATA, &data_api::delete_body(&self.scope(), ids))
            .await?;
        Ok(())
    }

    async fn raw_count(&self, filter_dsl: Value) -> Result<i64> {
        let result = self
            .client
            .post(
                data_api::AGGREGATE,
                &data_api::aggregate_count_body(&self.scope(), filter_dsl),
            )
            .await?;
        Ok(data_api::parse_count_result(&result))
    }

    async fn raw_clear(&self) -> Result<()> {
        self.client
            .post(data_api::DELETE_ALL_DATA, &self.scope())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openviking_core::config::VikingDbConfig;
    use std::collections::HashMap;

    #[test]
    fn test_requires_host() {
        let config = VectorDbConfig::default();
        assert!(VikingDbPrivateCollectionAdapter::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_drop_is_noop_false() {
        let mut config = VectorDbConfig::default();
        config.vikingdb = Some(VikingDbConfig {
            host: "vdb.internal:8000".into(),
            headers: HashMap::from([("X-Auth".to_string(), "token".to_string())]),
        });
        let adapter = VikingDbPrivateCollectionAdapter::from_config(&config).unwrap();
        assert!(!adapter.drop_backend_collection().await.unwrap());
    }
}
