//! Minimal JSON-over-HTTP client shared by the remote adapters.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tracing::error;

use openviking_core::{Result, VikingError};

/// JSON API client bound to one base URL plus fixed headers.
#[derive(Debug, Clone)]
pub struct JsonApiClient {
    base: String,
    http: reqwest::Client,
}

impl JsonApiClient {
    pub fn new(base: impl Into<String>, headers: &HashMap<String, String>) -> Result<Self> {
        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| VikingError::invalid_argument(format!("bad header name {key}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| VikingError::invalid_argument(format!("bad header value for {key}: {e}")))?;
            header_map.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(header_map)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(VikingError::http)?;

        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// POST a JSON body; returns the `result` payload of a 200 response.
    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(VikingError::http)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("Request to {} failed: {} {}", path, status, text);
            return Err(VikingError::unavailable(format!(
                "request to {path} failed: {status} {text}"
            )));
        }

        let payload: Value = response.json().await.map_err(VikingError::http)?;
        Ok(payload
            .get("result")
            .or_else(|| payload.get("Result"))
            .cloned()
            .unwrap_or_else(|| json!({})))
    }
}

/// Normalize a `host[:port]` or URL string into a base URL.
pub fn normalize_base_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("127.0.0.1:5000"), "http://127.0.0.1:5000");
        assert_eq!(
            normalize_base_url("https://vdb.example.com/"),
            "https://vdb.example.com"
        );
    }

    #[test]
    fn test_rejects_bad_headers() {
        let headers = HashMap::from([("bad\nname".to_string(), "v".to_string())]);
        assert!(JsonApiClient::new("http://x", &headers).is_err());
    }
}
