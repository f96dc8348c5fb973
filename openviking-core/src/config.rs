//! Configuration for the OpenViking core, loaded from TOML.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, VikingError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenVikingConfig {
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub queue: QueueConfig,
    pub rerank: RerankConfig,
}

impl OpenVikingConfig {
    /// Parse a configuration from a TOML string.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| VikingError::invalid_argument(format!("bad config: {e}")))
    }

    /// Load a configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub vectordb: VectorDbConfig,
}

/// Vector-store backend selection and connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorDbConfig {
    /// Backend key: `local`, `http`, `volcengine`, or `vikingdb`.
    pub backend: String,
    /// Collection name shared by all tenants.
    pub name: String,
    /// Root directory for the local backend.
    pub path: Option<String>,
    /// Endpoint URL for the HTTP backend.
    pub url: Option<String>,
    pub project_name: Option<String>,
    pub distance_metric: String,
    /// Sparse blend weight; 0 disables hybrid indexes.
    pub sparse_weight: f32,
    pub volcengine: Option<VolcengineConfig>,
    pub vikingdb: Option<VikingDbConfig>,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            backend: "local".to_string(),
            name: "context".to_string(),
            path: None,
            url: None,
            project_name: None,
            distance_metric: "cosine".to_string(),
            sparse_weight: 0.0,
            volcengine: None,
            vikingdb: None,
        }
    }
}

/// Credentials for the Volcengine console/data APIs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VolcengineConfig {
    pub ak: String,
    pub sk: String,
    pub region: String,
}

/// Connection settings for a private VikingDB deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VikingDbConfig {
    pub host: String,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Dense embedding dimension; every stored vector must match.
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dimension: 1024 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_concurrent_embedding: usize,
    pub max_concurrent_llm: usize,
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_embedding: 10,
            max_concurrent_llm: 100,
            poll_interval_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub enabled: bool,
    pub threshold: f32,
}

impl RerankConfig {
    pub fn is_available(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OpenVikingConfig::default();
        assert_eq!(config.storage.vectordb.backend, "local");
        assert_eq!(config.storage.vectordb.name, "context");
        assert_eq!(config.embedding.dimension, 1024);
        assert_eq!(config.queue.max_concurrent_embedding, 10);
        assert_eq!(config.queue.max_concurrent_llm, 100);
        assert_eq!(config.queue.poll_interval_ms, 200);
        assert!(!config.rerank.is_available());
    }

    #[test]
    fn test_partial_toml() {
        let raw = r#"
            [storage.vectordb]
            backend = "http"
            url = "http://127.0.0.1:5000"

            [embedding]
            dimension = 4

            [queue]
            max_concurrent_embedding = 2
        "#;
        let config = OpenVikingConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.storage.vectordb.backend, "http");
        assert_eq!(config.embedding.dimension, 4);
        assert_eq!(config.queue.max_concurrent_embedding, 2);
        // Unset sections keep their defaults.
        assert_eq!(config.queue.poll_interval_ms, 200);
    }

    #[test]
    fn test_bad_toml_rejected() {
        assert!(OpenVikingConfig::from_toml_str("embedding = 3").is_err());
    }
}
