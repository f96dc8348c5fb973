//! Embedding queue payloads and the text embedding handler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error};

use openviking_core::{
    ContextLevel, ContextNode, Embedder, Result, VikingError, stable_record_id,
};
use openviking_storage::VectorIndexBackend;

use crate::named_queue::DequeueHandler;

/// One embedding work item: the text to vectorize plus the context record
/// it belongs to. The queue treats the payload as opaque JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingMsg {
    pub message: Value,
    pub context_data: Value,
}

impl EmbeddingMsg {
    /// Build a message for a context node, deriving `level` from the URI
    /// suffix. `None` when there is nothing to vectorize.
    pub fn from_context(mut node: ContextNode, vectorization_text: &str) -> Option<Self> {
        if vectorization_text.is_empty() {
            return None;
        }
        node.level = ContextLevel::for_uri(&node.uri);
        Some(Self {
            message: json!(vectorization_text),
            context_data: serde_json::to_value(&node).ok()?,
        })
    }
}

/// Converts queued text messages to embedding vectors and upserts them into
/// the vector index.
///
/// Non-string messages are skipped (counted as success). During backend
/// shutdown, transient write failures for in-flight messages are downgraded
/// to success so the worker can quiesce.
pub struct TextEmbeddingHandler {
    backend: Arc<VectorIndexBackend>,
    embedder: Arc<dyn Embedder>,
    vector_dim: usize,
}

impl TextEmbeddingHandler {
    pub fn new(backend: Arc<VectorIndexBackend>, embedder: Arc<dyn Embedder>) -> Self {
        let vector_dim = backend.vector_dim();
        Self {
            backend,
            embedder,
            vector_dim,
        }
    }
}

#[async_trait]
impl DequeueHandler for TextEmbeddingHandler {
    async fn on_dequeue(&self, envelope: Value) -> Result<()> {
        let payload = envelope.get("data").cloned().unwrap_or(envelope);
        let msg: EmbeddingMsg = serde_json::from_value(payload)?;

        if self.backend.is_closing() {
            debug!("Skip embedding dequeue during shutdown");
            return Ok(());
        }

        // Only process string messages.
        let Some(text) = msg.message.as_str().map(String::from) else {
            debug!("Skipping non-string embedding message");
            return Ok(());
        };

        let mut record = msg
            .context_data
            .as_object()
            .cloned()
            .ok_or_else(|| VikingError::schema("embedding context_data must be an object"))?;

        // The embed call is blocking provider HTTP; run it off the scheduler.
        let embedder = self.embedder.clone();
        let result = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| VikingError::internal(format!("embed task failed: {e}")))??;

        if !result.dense_vector.is_empty() {
            if result.dense_vector.len() != self.vector_dim {
                let message = format!(
                    "Dense vector dimension mismatch: expected {}, got {}",
                    self.vector_dim,
                    result.dense_vector.len()
                );
                error!("{message}");
                return Err(VikingError::schema(message));
            }
            record.insert("vector".into(), json!(result.dense_vector));
        }
        if let Some(sparse) = &result.sparse_vector {
            record.insert("sparse_vector".into(), json!(sparse));
            debug!("Generated sparse vector with {} terms", sparse.len());
        }

        // One vector record per (account, uri): pin the stable id.
        if let Some(uri) = record.get("uri").and_then(Value::as_str) {
            let account_id = record
                .get("account_id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or("default");
            let id = stable_record_id(account_id, uri);
            record.insert("id".into(), json!(id));
        }

        match self.backend.upsert(Value::Object(record)).await {
            Ok(_) => Ok(()),
            Err(e) if self.backend.is_closing() && e.is_transient() => {
                debug!("Skip embedding write during shutdown: {}", e);
                Ok(())
            }
            Err(e) => {
                error!("Failed to write embedding to vector index: {}", e);
                Err(e)
            }
        }
    }
}
