//! Semantic processing for OpenViking: the post-order DAG walk that builds
//! per-file summaries and per-directory overviews/abstracts, and the queue
//! handler that drives it.

pub mod dag;
pub mod processor;

pub use dag::{DagStats, SemanticDagExecutor};
pub use processor::{
    FileSummary, LlmSemanticProcessor, SemanticProcessor, SemanticTaskHandler, SemanticTaskMsg,
};
