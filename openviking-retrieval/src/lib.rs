//! Hierarchical retrieval for OpenViking: best-first recursive search over
//! the context tree with rerank, score propagation, convergence stopping,
//! and a hotness blend.

pub mod hotness;
pub mod retriever;
pub mod types;

pub use hotness::hotness_score;
pub use retriever::{HierarchicalRetriever, RelationProvider, RetrieverStorage};
pub use types::{MatchedContext, QueryResult, RelatedContext, RetrieverMode, TypedQuery};
