//! HTTP backend collection adapter: a remote vectordb speaking JSON.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use tokio::sync::RwLock;

use openviking_core::config::VectorDbConfig;
use openviking_core::{Result, VikingError};

use super::client::{JsonApiClient, normalize_base_url};
use super::data_api;
use super::{CollectionAdapter, Record, SearchRequest};

const LIST_COLLECTIONS: &str = "/api/vikingdb/project/list_collections";
const CREATE_COLLECTION: &str = "/api/vikingdb/collection/create";
const DROP_COLLECTION: &str = "/api/vikingdb/collection/drop";
const CREATE_INDEX: &str = "/api/vikingdb/index/create";
const LIST_INDEXES: &str = "/api/vikingdb/index/list";
const DROP_INDEX: &str = "/api/vikingdb/index/drop";
const GET_COLLECTION: &str = "/api/vikingdb/collection/get";

/// Adapter for a remote vectordb project over HTTP.
pub struct HttpCollectionAdapter {
    client: JsonApiClient,
    project_name: String,
    collection_name: String,
    /// Remembered existence to avoid re-listing on every data call.
    known_exists: RwLock<bool>,
}

impl HttpCollectionAdapter {
    pub fn from_config(config: &VectorDbConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| VikingError::invalid_argument("HTTP backend requires a valid URL"))?;
        Ok(Self {
            client: JsonApiClient::new(normalize_base_url(url), &HashMap::new())?,
            project_name: config.project_name.clone().unwrap_or_else(|| "default".into()),
            collection_name: config.name.clone(),
            known_exists: RwLock::new(false),
        })
    }

    fn scope(&self) -> Value {
        data_api::scope_body(&self.project_name, &self.collection_name)
    }

    async fn remote_has_collection(&self) -> Result<bool> {
        let result = self
            .client
            .post(LIST_COLLECTIONS, &json!({"ProjectName": self.project_name}))
            .await?;
        Ok(normalize_collection_names(&result).contains(&self.collection_name))
    }
}

/// Collection listings come back either as plain names or as metadata
/// objects; accept both.
fn normalize_collection_names(result: &Value) -> Vec<String> {
    let raw = result
        .get("collections")
        .or_else(|| result.get("Collections"))
        .unwrap_or(result);
    raw.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(name) => Some(name.clone()),
                    Value::Object(map) => map
                        .get("CollectionName")
                        .or_else(|| map.get("collection_name"))
                        .or_else(|| map.get("name"))
                        .and_then(Value::as_str)
                        .map(String::from),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl CollectionAdapter for HttpCollectionAdapter {
    fn mode(&self) -> &'static str {
        "http"
    }

    fn collection_name(&self) -> String {
        self.collection_name.clone()
    }

    async fn collection_exists(&self) -> Result<bool> {
        if *self.known_exists.read().await {
            return Ok(true);
        }
        let exists = self.remote_has_collection().await?;
        if exists {
            *self.known_exists.write().await = true;
        }
        Ok(exists)
    }

    async fn create_backend_collection(&self, meta: Value) -> Result<()> {
        let mut payload = meta;
        payload["ProjectName"] = json!(self.project_name);
        payload["CollectionName"] = json!(self.collection_name);
        self.client.post(CREATE_COLLECTION, &payload).await?;
        *self.known_exists.write().await = true;
        Ok(())
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

    async fn drop_backend_collection(&self) -> Result<bool> {
        self.client.post(DROP_COLLECTION, &self.scope()).await?;
        *self.known_exists.write().await = false;
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        *self.known_exists.write().await = false;
        Ok(())
    }

    async fn get_collection_info(&self) -> Result<Option<Value>> {
        if !self.collection_exists().await? {
            return Ok(None);
        }
        let result = self.client.post(GET_COLLECTION, &self.scope()).await?;
        Ok(Some(result))
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

    #[test]
    fn test_requires_url() {
        let config = VectorDbConfig::default();
        assert!(HttpCollectionAdapter::from_config(&config).is_err());
    }

    #[test]
    fn test_normalize_collection_names() {
        let result = json!({
            "collections": [
                "plain",
                {"CollectionName": "meta"},
                {"name": "lower"},
                42,
            ]
        });
        assert_eq!(
            normalize_collection_names(&result),
            vec!["plain".to_string(), "meta".to_string(), "lower".to_string()]
        );
    }
}
