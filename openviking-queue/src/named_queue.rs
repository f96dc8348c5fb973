//! Durable FIFO queues over the blob store.
//!
//! A queue is a directory of message files under its mount point; file names
//! carry a monotonically increasing sequence number, so lexicographic order
//! is arrival order. Messages are removed on dequeue; there is no in-process
//! retry, handlers own idempotence.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use openviking_core::{BlobStore, Result};

/// Name of the embedding work queue.
pub const EMBEDDING_QUEUE: &str = "embedding";
/// Name of the semantic-processing work queue.
pub const SEMANTIC_QUEUE: &str = "semantic";

/// Typed handler invoked for each dequeued message.
///
/// Returning `Ok` counts the message as processed, `Err` as failed; the
/// worker reports each message exactly once either way.
#[async_trait]
pub trait DequeueHandler: Send + Sync {
    async fn on_dequeue(&self, envelope: Value) -> Result<()>;
}

/// Counter snapshot for one queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queue_size: usize,
    pub in_progress: u64,
    pub processed_total: u64,
    pub error_count: u64,
    pub is_complete: bool,
}

/// A named FIFO queue, durable at the blob layer.
pub struct NamedQueue {
    name: String,
    mount: String,
    blob: Arc<dyn BlobStore>,
    seq: AtomicU64,
    in_progress: AtomicU64,
    processed_total: AtomicU64,
    error_count: AtomicU64,
    handler: RwLock<Option<Arc<dyn DequeueHandler>>>,
    max_concurrent: usize,
    /// Serializes head removal so each message is dispatched at most once.
    head_lock: Mutex<()>,
}

impl NamedQueue {
    /// Open (or create) a queue at `{mount_root}/{name}`. The sequence
    /// counter resumes past any messages already on disk.
    pub async fn open(
        name: impl Into<String>,
        blob: Arc<dyn BlobStore>,
        mount_root: &str,
        max_concurrent: usize,
    ) -> Result<Self> {
        let name = name.into();
        let mount = format!("{}/{}", mount_root.trim_end_matches('/'), name);
        blob.mkdir(&mount).await?;

        let mut next_seq = 0;
        for entry in blob.ls(&mount).await? {
            if let Some(seq) = parse_seq(&entry.name) {
                next_seq = next_seq.max(seq + 1);
            }
        }

        Ok(Self {
            name,
            mount,
            blob,
            seq: AtomicU64::new(next_seq),
            in_progress: AtomicU64::new(0),
            processed_total: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            handler: RwLock::new(None),
            max_concurrent: max_concurrent.max(1),
            head_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn set_handler(&self, handler: Arc<dyn DequeueHandler>) {
        *self.handler.write() = Some(handler);
    }

    pub fn handler(&self) -> Option<Arc<dyn DequeueHandler>> {
        self.handler.read().clone()
    }

    /// Append a message. Identical payloads become distinct messages.
    pub async fn enqueue(&self, data: Value) -> Result<String> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let id = format!("{seq:020}");
        let envelope = json!({
            "id": id,
            "queue": self.name,
            "enqueued_at": chrono::Utc::now().to_rfc3339(),
            "data": data,
        });
        let path = format!("{}/{}.json", self.mount, id);
        self.blob
            .write(&path, serde_json::to_vec(&envelope)?.as_slice())
            .await?;
        debug!("Enqueued message {} on queue {}", id, self.name);
        Ok(id)
    }

    /// Read the head message without removing it.
    pub async fn peek(&self) -> Result<Option<Value>> {
        let _guard = self.head_lock.lock().await;
        match self.head_name().await? {
            Some(name) => Ok(Some(self.read_message(&name).await?)),
            None => Ok(None),
        }
    }

    /// Remove and return the head message.
    pub async fn dequeue(&self) -> Result<Option<Value>> {
        let _guard = self.head_lock.lock().await;
        let Some(name) = self.head_name().await? else {
            return Ok(None);
        };
        let envelope = self.read_message(&name).await?;
        self.blob
            .rm(&format!("{}/{}", self.mount, name), false)
            .await?;
        Ok(Some(envelope))
    }

    pub async fn size(&self) -> Result<usize> {
        Ok(self
            .blob
            .ls(&self.mount)
            .await?
            .iter()
            .filter(|e| parse_seq(&e.name).is_some())
            .count())
    }

    /// Drop every pending message. Returns the number removed.
    pub async fn clear(&self) -> Result<usize> {
        let _guard = self.head_lock.lock().await;
        let mut removed = 0;
        for entry in self.blob.ls(&self.mount).await? {
            if parse_seq(&entry.name).is_some() {
                self.blob
                    .rm(&format!("{}/{}", self.mount, entry.name), false)
                    .await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn get_status(&self) -> Result<QueueStatus> {
        let queue_size = self.size().await?;
        let in_progress = self.in_progress.load(Ordering::SeqCst);
        Ok(QueueStatus {
            queue_size,
            in_progress,
            processed_total: self.processed_total.load(Ordering::SeqCst),
            error_count: self.error_count.load(Ordering::SeqCst),
            is_complete: queue_size == 0 && in_progress == 0,
        })
    }

    // ------------------------------------------------------------------
    // Counter surface used by the queue worker
    // ------------------------------------------------------------------

    /// Claim a message slot. Called BEFORE the dequeue so `size() == 0 &&
    /// in_progress == 0` never flickers true while a message is in hand.
    pub(crate) fn on_dequeue_start(&self) {
        self.in_progress.fetch_add(1, Ordering::SeqCst);
    }

    /// Release a claimed slot when the dequeue produced nothing.
    pub(crate) fn on_dequeue_abort(&self) {
        self.in_progress.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn report_success(&self) {
        self.in_progress.fetch_sub(1, Ordering::SeqCst);
        self.processed_total.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn report_error(&self, message: &str, envelope: &Value) {
        self.in_progress.fetch_sub(1, Ordering::SeqCst);
        self.error_count.fetch_add(1, Ordering::SeqCst);
        warn!(
            "Queue {} handler failed for message {}: {}",
            self.name,
            envelope.get("id").and_then(|v| v.as_str()).unwrap_or("?"),
            message
        );
    }

    async fn head_name(&self) -> Result<Option<String>> {
        let mut names: Vec<String> = self
            .blob
            .ls(&self.mount)
            .await?
            .into_iter()
            .filter(|e| parse_seq(&e.name).is_some())
            .map(|e| e.name)
            .collect();
        names.sort();
        Ok(names.into_iter().next())
    }

    async fn read_message(&self, name: &str) -> Result<Value> {
        let raw = self
            .blob
            .read(&format!("{}/{}", self.mount, name), None, None)
            .await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

fn parse_seq(name: &str) -> Option<u64> {
    name.strip_suffix(".json")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use openviking_storage::MemoryBlobStore;

    async fn queue() -> NamedQueue {
        let blob: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        NamedQueue::open("embedding", blob, "/local/_system/queues", 1)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = queue().await;
        queue.enqueue(json!({"n": 1})).await.unwrap();
        queue.enqueue(json!({"n": 2})).await.unwrap();
        queue.enqueue(json!({"n": 3})).await.unwrap();
        assert_eq!(queue.size().await.unwrap(), 3);

        for expected in 1..=3 {
            let envelope = queue.dequeue().await.unwrap().unwrap();
            assert_eq!(envelope["data"]["n"], json!(expected));
        }
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_peek_does_not_remove() {
        let queue = queue().await;
        queue.enqueue(json!({"n": 1})).await.unwrap();

        let peeked = queue.peek().await.unwrap().unwrap();
        assert_eq!(peeked["data"]["n"], json!(1));
        assert_eq!(queue.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_identical_payloads_are_distinct_messages() {
        let queue = queue().await;
        let id1 = queue.enqueue(json!({"same": true})).await.unwrap();
        let id2 = queue.enqueue(json!({"same": true})).await.unwrap();
        assert_ne!(id1, id2);
        assert_eq!(queue.size().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let queue = queue().await;
        for i in 0..4 {
            queue.enqueue(json!({"n": i})).await.unwrap();
        }
        assert_eq!(queue.clear().await.unwrap(), 4);
        assert_eq!(queue.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sequence_resumes_from_disk() {
        let blob: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let queue = NamedQueue::open("semantic", blob.clone(), "/local/_system/queues", 1)
            .await
            .unwrap();
        queue.enqueue(json!({"n": 1})).await.unwrap();
        queue.enqueue(json!({"n": 2})).await.unwrap();
        drop(queue);

        // Re-open over the same blob layer: new ids sort after existing ones.
        let reopened = NamedQueue::open("semantic", blob, "/local/_system/queues", 1)
            .await
            .unwrap();
        let id = reopened.enqueue(json!({"n": 3})).await.unwrap();
        assert_eq!(reopened.size().await.unwrap(), 3);
        let first = reopened.dequeue().await.unwrap().unwrap();
        assert_eq!(first["data"]["n"], json!(1));
        assert!(id > first["id"].as_str().unwrap().to_string());
    }

    #[tokio::test]
    async fn test_status_counters() {
        let queue = queue().await;
        queue.enqueue(json!({})).await.unwrap();

        let status = queue.get_status().await.unwrap();
        assert_eq!(status.queue_size, 1);
        assert!(!status.is_complete);

        let envelope = queue.dequeue().await.unwrap().unwrap();
        queue.on_dequeue_start();
        queue.report_error("boom", &envelope);

        let status = queue.get_status().await.unwrap();
        assert_eq!(status.queue_size, 0);
        assert_eq!(status.in_progress, 0);
        assert_eq!(status.error_count, 1);
        assert!(status.is_complete);
    }
}
