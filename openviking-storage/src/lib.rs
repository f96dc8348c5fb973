//! Vector storage for OpenViking: filter expressions, backend collection
//! adapters, and the tenant-aware vector index backend.
//!
//! One collection is shared by all tenants. Backends plug in behind the
//! [`adapters::CollectionAdapter`] seam (`local`, `http`, `volcengine`,
//! `vikingdb`), selected by a backend key through
//! [`adapters::create_collection_adapter`].

pub mod adapters;
pub mod backend;
pub mod blob;
pub mod eval;
pub mod expr;
pub mod local;
pub mod schema;

pub use adapters::{
    CollectionAdapter, DEFAULT_INDEX_NAME, QueryParams, Record, create_collection_adapter,
};
pub use backend::{TenantSearch, VectorIndexBackend};
pub use blob::MemoryBlobStore;
pub use expr::FilterExpr;
pub use schema::{context_collection, init_context_collection};
