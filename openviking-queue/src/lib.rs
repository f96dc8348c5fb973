//! Named queues for OpenViking: durable FIFO queues over the blob store,
//! per-queue worker loops with bounded concurrency, and the embedding
//! handler that turns queued text into vector index records.

pub mod embedding;
pub mod manager;
pub mod named_queue;

pub use embedding::{EmbeddingMsg, TextEmbeddingHandler};
pub use manager::{QUEUE_MOUNT_ROOT, QueueManager};
pub use named_queue::{
    DequeueHandler, EMBEDDING_QUEUE, NamedQueue, QueueStatus, SEMANTIC_QUEUE,
};
