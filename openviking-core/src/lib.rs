//! Core types and abstractions for the OpenViking memory system.
//!
//! This crate provides the error taxonomy, request identity, URI grammar,
//! context node types, configuration, and the upstream provider traits
//! shared by all OpenViking components.

pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod traits;
pub mod uri;

pub use config::{EmbeddingConfig, OpenVikingConfig, QueueConfig, RerankConfig, VectorDbConfig};
pub use context::{ContextLevel, ContextNode, ContextType, stable_record_id};
pub use error::{Result, VikingError};
pub use identity::{RequestContext, Role, UserIdentifier, bind_context, bound_context};
pub use traits::{BlobStore, EmbedResult, Embedder, FileStat, GrepMatch, LanguageModel, Reranker};
pub use uri::VikingUri;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::config::OpenVikingConfig;
    pub use crate::context::{ContextLevel, ContextNode, ContextType};
    pub use crate::error::{Result, VikingError};
    pub use crate::identity::{RequestContext, Role, UserIdentifier};
    pub use crate::traits::*;
    pub use crate::uri::VikingUri;
}
