//! Volcengine backend collection adapter.
//!
//! Collections are managed through the signed console API
//! (`CreateVikingdbCollection`, ...) and data flows through the data API.
//! The hosted service types `uri`/`parent_uri` as `Path`: outgoing payloads
//! are stripped of `viking://` and normalized to `/{path}/`, records missing
//! a `parent_uri` get the root `/` (directory records must have a parent),
//! and the prefix is restored on read.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::error;

use openviking_core::config::VectorDbConfig;
use openviking_core::{Result, VikingError};

use super::data_api;
use super::{
    CollectionAdapter, Record, SearchRequest, build_index_meta, drop_date_time_fields,
    restore_uri_prefixes,
};

type HmacSha256 = Hmac<Sha256>;

const VIKING_DB_VERSION: &str = "2024-05-06";
const SERVICE: &str = "vikingdb";

/// Signed HTTP client for the Volcengine console and data APIs.
struct VolcengineClient {
    ak: String,
    sk: String,
    region: String,
    host: String,
    http: reqwest::Client,
}

impl VolcengineClient {
    fn new(ak: &str, sk: &str, region: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(VikingError::http)?;
        Ok(Self {
            ak: ak.to_string(),
            sk: sk.to_string(),
            region: region.to_string(),
            host: format!("api-vikingdb.{region}.volces.com"),
            http,
        })
    }

    /// Console call: `POST /?Action={action}&Version={version}`.
    async fn console_post(&self, action: &str, body: &Value) -> Result<Value> {
        let query = format!("Action={action}&Version={VIKING_DB_VERSION}");
        self.signed_post("/", &query, body).await
    }

    /// Data call: `POST {path}`.
    async fn data_post(&self, path: &str, body: &Value) -> Result<Value> {
        self.signed_post(path, "", body).await
    }

    async fn signed_post(&self, path: &str, query: &str, body: &Value) -> Result<Value> {
        let payload = serde_json::to_vec(body)?;
        let headers = self.sign("POST", path, query, &payload);

        let url = if query.is_empty() {
            format!("https://{}{}", self.host, path)
        } else {
            format!("https://{}{}?{}", self.host, path, query)
        };

        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .body(payload);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(VikingError::http)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("Volcengine request to {} failed: {} {}", path, status, text);
            return Err(VikingError::unavailable(format!(
                "volcengine request to {path} failed: {status} {text}"
            )));
        }

        let parsed: Value = response.json().await.map_err(VikingError::http)?;
        Ok(parsed
            .get("Result")
            .or_else(|| parsed.get("result"))
            .cloned()
            .unwrap_or_else(|| json!({})))
    }

    /// HMAC-SHA256 request signature in the Volcengine v4 style.
    fn sign(&self, method: &str, path: &str, query: &str, body: &[u8]) -> Vec<(String, String)> {
        let now = Utc::now();
        let x_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let short_date = now.format("%Y%m%d").to_string();
        let content_sha256 = hex::encode(Sha256::digest(body));

        let canonical_headers = format!(
            "host:{}\nx-content-sha256:{}\nx-date:{}\n",
            self.host, content_sha256, x_date
        );
        let signed_headers = "host;x-content-sha256;x-date";
        let canonical_request = format!(
            "{method}\n{path}\n{query}\n{canonical_headers}\n{signed_headers}\n{content_sha256}"
        );

        let scope = format!("{short_date}/{}/{SERVICE}/request", self.region);
        let string_to_sign = format!(
            "HMAC-SHA256\n{x_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = hmac_sha256(self.sk.as_bytes(), short_date.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"request");
        let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

        vec![
            ("X-Date".to_string(), x_date),
            ("X-Content-Sha256".to_string(), content_sha256),
            (
                "Authorization".to_string(),
                format!(
                    "HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                    self.ak
                ),
            ),
        ]
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Adapter for Volcengine-hosted VikingDB.
pub struct VolcengineCollectionAdapter {
    client: VolcengineClient,
    project_name: String,
    collection_name: String,
    known_exists: RwLock<bool>,
}

impl VolcengineCollectionAdapter {
    pub fn from_config(config: &VectorDbConfig) -> Result<Self> {
        let volc = config
            .volcengine
            .as_ref()
            .filter(|v| !v.ak.is_empty() && !v.sk.is_empty() && !v.region.is_empty())
            .ok_or_else(|| {
                VikingError::invalid_argument(
                    "Volcengine backend requires AK, SK, and Region configuration",
                )
            })?;
        Ok(Self {
            client: VolcengineClient::new(&volc.ak, &volc.sk, &volc.region)?,
            project_name: config.project_name.clone().unwrap_or_else(|| "default".into()),
            collection_name: config.name.clone(),
            known_exists: RwLock::new(false),
        })
    }

    fn scope(&self) -> Value {
        data_api::scope_body(&self.project_name, &self.collection_name)
    }

    async fn fetch_collection_meta(&self) -> Result<Option<Value>> {
        let result = self
            .client
            .console_post("GetVikingdbCollection", &self.scope())
            .await?;
        let has_name = result
            .get("CollectionName")
            .and_then(Value::as_str)
            .is_some_and(|name| !name.is_empty());
        Ok(has_name.then_some(result))
    }

    /// Sanitize a data-plane body at the request exit, covering data records
    /// and filter DSL alike.
    fn sanitize(&self, body: &Value) -> Value {
        sanitize_payload(body).unwrap_or_else(|| json!({}))
    }
}

/// Remove `viking://` and normalize to `/{path}/`; `None` for empty values.
fn sanitize_uri_value(value: &str) -> Option<String> {
    let mut s = value.trim();
    s = s.strip_prefix("viking://").unwrap_or(s);
    let s = s.trim_matches('/');
    if s.is_empty() {
        None
    } else {
        Some(format!("/{s}/"))
    }
}

/// Recursively sanitize URI values in a payload; inject `parent_uri = "/"`
/// for records that look like data (carry a `uri`) but lack one.
fn sanitize_payload(value: &Value) -> Option<Value> {
    match value {
        Value::Object(map) => sanitize_object(map),
        Value::Array(items) => Some(Value::Array(
            items.iter().filter_map(sanitize_payload).collect(),
        )),
        other => Some(other.clone()),
    }
}

fn sanitize_object(map: &Map<String, Value>) -> Option<Value> {
    let mut out = Map::new();

    // Filter DSL conds on path fields.
    let is_path_filter = map
        .get("field")
        .and_then(Value::as_str)
        .is_some_and(|f| f == "uri" || f == "parent_uri");

    for (key, value) in map {
        match key.as_str() {
            "uri" | "parent_uri" if value.is_string() => {
                if let Some(sanitized) = sanitize_uri_value(value.as_str().unwrap_or_default()) {
                    out.insert(key.clone(), json!(sanitized));
                }
                // Skip the key entirely when empty to avoid an empty Path.
            }
            "conds" if is_path_filter => {
                let conds: Vec<Value> = value
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|item| match item {
                                Value::String(s) => sanitize_uri_value(s).map(Value::String),
                                other => sanitize_payload(other),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                if conds.is_empty() {
                    return None;
                }
                out.insert(key.clone(), Value::Array(conds));
            }
            "prefix" if map.get("op").and_then(Value::as_str) == Some("prefix") => {
                let sanitized = value.as_str().and_then(sanitize_uri_value)?;
                out.insert(key.clone(), json!(sanitized));
            }
            _ => {
                if let Some(sanitized) = sanitize_payload(value) {
                    out.insert(key.clone(), sanitized);
                }
            }
        }
    }

    if out.is_empty() {
        return None;
    }

    // A record with a uri must carry a parent; directories at scope roots
    // get the filesystem root.
    if out.contains_key("uri") {
        let missing_parent = !out
            .get("parent_uri")
            .and_then(Value::as_str)
            .is_some_and(|p| !p.is_empty());
        if missing_parent {
            out.insert("parent_uri".into(), json!("/"));
        }
    }

    Some(Value::Object(out))
}

#[async_trait]
impl CollectionAdapter for VolcengineCollectionAdapter {
    fn mode(&self) -> &'static str {
        "volcengine"
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

    async fn create_backend_collection(&self, meta: Value) -> Result<()> {
        let mut payload = meta;
        payload["ProjectName"] = json!(self.project_name);
        payload["CollectionName"] = json!(self.collection_name);
        self.client
            .console_post("CreateVikingdbCollection", &payload)
            .await?;
        *self.known_exists.write().await = true;
        Ok(())
    }

    async fn create_index(&self, index_name: &str, index_meta: Value) -> Result<()> {
        let mut body = self.scope();
        body["IndexName"] = json!(index_name);
        body["IndexMeta"] = index_meta;
        self.client
            .console_post("CreateVikingdbIndex", &body)
            .await?;
        Ok(())
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        let result = self
            .client
            .console_post("ListVikingdbIndexes", &self.scope())
            .await?;
        Ok(result
            .get("Indexes")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        item.as_str()
                            .map(String::from)
                            .or_else(|| item.get("IndexName").and_then(Value::as_str).map(String::from))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn drop_index(&self, index_name: &str) -> Result<()> {
        let mut body = self.scope();
        body["IndexName"] = json!(index_name);
        self.client.console_post("DropVikingdbIndex", &body).await?;
        Ok(())
    }

    async fn drop_backend_collection(&self) -> Result<bool> {
        self.client
            .console_post("DropVikingdbCollection", &self.scope())
            .await?;
        *self.known_exists.write().await = false;
        Ok(true)
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
        let body = self.sanitize(&data_api::upsert_body(&self.scope(), &records));
        self.client.data_post(data_api::UPSERT_DATA, &body).await?;
        Ok(())
    }

    async fn raw_fetch(&self, ids: &[String]) -> Result<Vec<Record>> {
        let result = self
            .client
            .data_post(data_api::FETCH_DATA, &data_api::fetch_body(&self.scope(), ids))
            .await?;
        Ok(data_api::parse_fetch_result(&result))
    }

    async fn raw_search(&self, request: SearchRequest) -> Result<Vec<Record>> {
        let body = self.sanitize(&data_api::search_body(&self.scope(), &request));
        let result = self.client.data_post(data_api::SEARCH, &body).await?;
        Ok(data_api::parse_search_result(&result))
    }

    async fn raw_delete(&self, ids: &[String]) -> Result<()> {
        self.client
            .data_post(data_api::DELETE_DATA, &data_api::delete_body(&self.scope(), ids))
            .await?;
        Ok(())
    }

    async fn raw_count(&self, filter_dsl: Value) -> Result<i64> {
        let body = self.sanitize(&data_api::aggregate_count_body(&self.scope(), filter_dsl));
        let result = self.client.data_post(data_api::AGGREGATE, &body).await?;
        Ok(data_api::parse_count_result(&result))
    }

    async fn raw_clear(&self) -> Result<()> {
        self.client
            .data_post(data_api::DELETE_ALL_DATA, &self.scope())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openviking_core::config::VolcengineConfig;

    #[test]
    fn test_requires_credentials() {
        let config = VectorDbConfig::default();
        assert!(VolcengineCollectionAdapter::from_config(&config).is_err());

        let mut config = VectorDbConfig::default();
        config.volcengine = Some(VolcengineConfig {
            ak: "ak".into(),
            sk: String::new(),
            region: "cn-beijing".into(),
        });
        assert!(VolcengineCollectionAdapter::from_config(&config).is_err());
    }

    #[test]
    fn test_sanitize_uri_value() {
        assert_eq!(
            sanitize_uri_value("viking://resources/guides/x.md"),
            Some("/resources/guides/x.md/".to_string())
        );
        assert_eq!(sanitize_uri_value("viking://"), None);
        assert_eq!(sanitize_uri_value("  "), None);
        assert_eq!(sanitize_uri_value("/already/path/"), Some("/already/path/".to_string()));
    }

    #[test]
    fn test_sanitize_record_injects_parent() {
        let record = json!({"uri": "viking://resources", "level": 0});
        let sanitized = sanitize_payload(&record).unwrap();
        assert_eq!(sanitized["uri"], "/resources/");
        assert_eq!(sanitized["parent_uri"], "/");
    }

    #[test]
    fn test_sanitize_filter_conds() {
        let dsl = json!({
            "op": "must",
            "field": "uri",
            "conds": ["viking://resources/guides/", "viking://"],
        });
        let sanitized = sanitize_payload(&dsl).unwrap();
        assert_eq!(sanitized["conds"], json!(["/resources/guides/"]));
    }

    #[test]
    fn test_sanitize_empty_conds_drops_clause() {
        let dsl = json!({"op": "must", "field": "uri", "conds": ["viking://"]});
        assert!(sanitize_payload(&dsl).is_none());
    }

    #[test]
    fn test_sanitize_nested_filters() {
        let dsl = json!({
            "op": "and",
            "conds": [
                {"op": "must", "field": "account_id", "conds": ["acme"]},
                {"op": "must", "field": "parent_uri", "conds": ["viking://resources/guides"]},
            ],
        });
        let sanitized = sanitize_payload(&dsl).unwrap();
        assert_eq!(sanitized["conds"][1]["conds"], json!(["/resources/guides/"]));
    }

    #[test]
    fn test_signature_headers_present() {
        let client = VolcengineClient::new("ak", "sk", "cn-beijing").unwrap();
        let headers = client.sign("POST", "/", "Action=X&Version=Y", b"{}");
        let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"X-Date"));
        assert!(names.contains(&"X-Content-Sha256"));
        assert!(names.contains(&"Authorization"));
        let auth = &headers.iter().find(|(n, _)| n == "Authorization").unwrap().1;
        assert!(auth.starts_with("HMAC-SHA256 Credential=ak/"));
    }
}
