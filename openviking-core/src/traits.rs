//! Upstream provider traits consumed by the core.
//!
//! The blob store, embedder, reranker, and LLM are external collaborators:
//! the core depends only on these seams, and tests supply mock
//! implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

/// Directory entry / stat result from the blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStat {
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub mode: String,
    #[serde(rename = "modTime", default, skip_serializing_if = "Option::is_none")]
    pub mod_time: Option<DateTime<Utc>>,
    #[serde(rename = "isDir")]
    pub is_dir: bool,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl FileStat {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mode: "-rw-r--r--".to_string(),
            mod_time: Some(Utc::now()),
            is_dir: false,
            meta: HashMap::new(),
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            mode: "drwxr-xr-x".to_string(),
            mod_time: Some(Utc::now()),
            is_dir: true,
            meta: HashMap::new(),
        }
    }
}

/// One matching line from a grep call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrepMatch {
    pub line: u64,
    pub file: String,
    pub content: String,
}

/// Pluggable blob store under the filesystem facade.
///
/// Paths are backing paths (`/local/{account_id}/...`), not URIs; the facade
/// owns the mapping.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a blob, optionally a byte range of it.
    async fn read(&self, path: &str, offset: Option<u64>, size: Option<u64>) -> Result<Vec<u8>>;

    /// Write a blob, creating parent directories as needed.
    async fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// List the entries of a directory.
    async fn ls(&self, path: &str) -> Result<Vec<FileStat>>;

    async fn mkdir(&self, path: &str) -> Result<()>;

    async fn rm(&self, path: &str, recursive: bool) -> Result<()>;

    async fn mv(&self, from: &str, to: &str) -> Result<()>;

    async fn stat(&self, path: &str) -> Result<FileStat>;

    /// Search blob contents for a pattern.
    async fn grep(
        &self,
        path: &str,
        pattern: &str,
        recursive: bool,
        case_insensitive: bool,
    ) -> Result<Vec<GrepMatch>>;

    async fn exists(&self, path: &str) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Result of one embedding call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResult {
    pub dense_vector: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse_vector: Option<HashMap<String, f32>>,
}

/// Text embedder. `embed` is a blocking call (provider HTTP); callers must
/// offload it from the async scheduler.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<EmbedResult>;

    /// Dense vector dimension this embedder produces.
    fn dimension(&self) -> usize;
}

/// Cross-encoder reranker. Blocking, like the embedder.
pub trait Reranker: Send + Sync {
    /// Score each document against the query; one score per document.
    fn rerank_batch(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;
}

/// Plain string-in/string-out language model used for summarization.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}
