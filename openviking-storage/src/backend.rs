//! Tenant-aware vector index backend over the collection adapters.
//!
//! One collection is shared by all tenants; every search composes a scope
//! filter from the request context, and all mutations are keyed by the
//! stable `md5(account_id ":" uri)` record id so upserts stay idempotent.

use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use openviking_core::config::VectorDbConfig;
use openviking_core::{RequestContext, Result, Role, stable_record_id};

use crate::adapters::{
    CollectionAdapter, DEFAULT_INDEX_NAME, QueryParams, Record, create_collection_adapter,
};
use crate::expr::FilterExpr;
use crate::schema::schema_field_names;

/// Context types accepted by the collection.
const ALLOWED_CONTEXT_TYPES: &[&str] = &["resource", "skill", "memory"];

/// Single-collection vector backend with adapter-based backend
/// specialization.
pub struct VectorIndexBackend {
    adapter: Arc<dyn CollectionAdapter>,
    collection_name: String,
    vector_dim: usize,
    distance_metric: String,
    sparse_weight: f32,
    closing: AtomicBool,
    known_fields: RwLock<Option<HashSet<String>>>,
}

/// Tenant-scoped search arguments shared by the `*_in_tenant` helpers.
#[derive(Debug, Clone, Default)]
pub struct TenantSearch {
    pub query_vector: Option<Vec<f32>>,
    pub sparse_query_vector: Option<std::collections::HashMap<String, f32>>,
    pub context_type: Option<String>,
    pub target_directories: Vec<String>,
    pub extra_filter: Option<Value>,
    pub limit: usize,
    pub offset: usize,
}

impl TenantSearch {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }
}

impl VectorIndexBackend {
    /// Create a backend from config; the adapter is selected by the backend
    /// key.
    pub fn new(config: &VectorDbConfig, vector_dim: usize) -> Result<Self> {
        let adapter = create_collection_adapter(config)?;
        Ok(Self::with_adapter(adapter, config, vector_dim))
    }

    /// Create a backend over an explicit adapter (used by tests).
    pub fn with_adapter(
        adapter: Arc<dyn CollectionAdapter>,
        config: &VectorDbConfig,
        vector_dim: usize,
    ) -> Self {
        info!(
            "Vector index backend initialized (mode={}, collection={})",
            adapter.mode(),
            config.name
        );
        Self {
            collection_name: config.name.clone(),
            vector_dim,
            distance_metric: config.distance_metric.clone(),
            sparse_weight: config.sparse_weight,
            adapter,
            closing: AtomicBool::new(false),
            known_fields: RwLock::new(None),
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub fn mode(&self) -> &'static str {
        self.adapter.mode()
    }

    pub fn vector_dim(&self) -> usize {
        self.vector_dim
    }

    /// Quiescence flag consulted by queue handlers during shutdown.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Collection management
    // ------------------------------------------------------------------

    pub async fn create_collection(&self, name: &str, schema: Value) -> Result<bool> {
        if name != self.collection_name {
            warn!(
                "Creating collection {} while configured name is {}",
                name, self.collection_name
            );
        }
        let created = self
            .adapter
            .create_collection(
                schema,
                &self.distance_metric,
                self.sparse_weight,
                DEFAULT_INDEX_NAME,
            )
            .await?;
        if created {
            info!("Created collection: {} (dim={})", name, self.vector_dim);
            *self.known_fields.write().await = None;
        }
        Ok(created)
    }

    pub async fn drop_collection(&self) -> Result<bool> {
        let dropped = self.adapter.drop_collection().await?;
        if dropped {
            *self.known_fields.write().await = None;
        }
        Ok(dropped)
    }

    pub async fn collection_exists(&self) -> Result<bool> {
        self.adapter.collection_exists().await
    }

    pub async fn get_collection_info(&self) -> Result<Option<Value>> {
        if !self.collection_exists().await? {
            return Ok(None);
        }
        Ok(Some(json!({
            "name": self.collection_name,
            "vector_dim": self.vector_dim,
            "count": self.count(None).await?,
            "status": "active",
        })))
    }

    // ------------------------------------------------------------------
    // Data operations
    // ------------------------------------------------------------------

    /// Upsert one record. Assigns the stable `(account, uri)` id when the
    /// record has a URI, filters unknown fields, and skips records with an
    /// invalid `context_type` (returns `None`).
    pub async fn upsert(&self, data: Value) -> Result<Option<String>> {
        let mut record = data
            .as_object()
            .cloned()
            .ok_or_else(|| openviking_core::VikingError::schema("record must be an object"))?;

        if let Some(context_type) = record.get("context_type").and_then(Value::as_str) {
            if !ALLOWED_CONTEXT_TYPES.contains(&context_type) {
                warn!(
                    "Invalid context_type: {}. Must be one of {:?}",
                    context_type, ALLOWED_CONTEXT_TYPES
                );
                return Ok(None);
            }
        }

        let has_id = record
            .get("id")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty());
        if !has_id {
            let id = match record.get("uri").and_then(Value::as_str) {
                Some(uri) if !uri.is_empty() => {
                    let account_id = record
                        .get("account_id")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .unwrap_or("default");
                    stable_record_id(account_id, uri)
                }
                _ => Uuid::new_v4().to_string(),
            };
            record.insert("id".into(), json!(id));
        }

        let record = self.filter_known_fields(record).await;
        let ids = self.adapter.upsert(vec![record]).await?;
        Ok(ids.into_iter().next())
    }

    pub async fn get(&self, ids: &[String]) -> Result<Vec<Record>> {
        self.adapter.get(ids).await
    }

    pub async fn delete(&self, ids: Vec<String>) -> Result<usize> {
        self.adapter.delete_by(Some(ids), None, 100_000).await
    }

    pub async fn exists(&self, id: &str) -> Result<bool> {
        Ok(!self.get(std::slice::from_ref(&id.to_string())).await?.is_empty())
    }

    /// Fetch the record for a URI; `None` unless exactly one exists.
    pub async fn fetch_by_uri(&self, uri: &str) -> Result<Option<Record>> {
        let mut params = QueryParams::new();
        params.filter = Some(FilterExpr::eq("uri", uri));
        params.limit = 10;
        let records = self.adapter.query(params).await?;
        let mut exact: Vec<Record> = records
            .into_iter()
            .filter(|r| r.get("uri").and_then(Value::as_str) == Some(uri))
            .collect();
        if exact.len() == 1 {
            Ok(Some(exact.remove(0)))
        } else {
            Ok(None)
        }
    }

    pub async fn query(&self, params: QueryParams) -> Result<Vec<Record>> {
        self.adapter.query(params).await
    }

    /// Pure filter query without vectors.
    pub async fn filter(
        &self,
        filter: FilterExpr,
        limit: usize,
        with_vector: bool,
    ) -> Result<Vec<Record>> {
        let mut params = QueryParams::new();
        params.filter = Some(filter);
        params.limit = limit;
        params.with_vector = with_vector;
        self.adapter.query(params).await
    }

    /// Remove a URI's record; for level-0/1 records, cascade through
    /// `parent_uri` descendants first.
    pub async fn remove_by_uri(&self, uri: &str) -> Result<usize> {
        let targets = self.filter(FilterExpr::eq("uri", uri), 10, false).await?;
        let targets: Vec<Record> = targets
            .into_iter()
            .filter(|r| r.get("uri").and_then(Value::as_str) == Some(uri))
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let mut total_deleted = 0;
        let is_directory = targets
            .iter()
            .any(|r| matches!(r.get("level").and_then(Value::as_i64), Some(0) | Some(1)));
        if is_directory {
            total_deleted += self.remove_descendants(uri).await?;
        }

        let ids: Vec<String> = targets
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_str).map(String::from))
            .collect();
        if !ids.is_empty() {
            total_deleted += self.delete(ids).await?;
        }
        Ok(total_deleted)
    }

    fn remove_descendants<'a>(
        &'a self,
        parent_uri: &'a str,
    ) -> futures::future::BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            let mut total_deleted = 0;
            let children = self
                .filter(FilterExpr::eq("parent_uri", parent_uri), 100_000, false)
                .await?;
            for child in children {
                let child_uri = child.get("uri").and_then(Value::as_str).map(String::from);
                let level = child.get("level").and_then(Value::as_i64).unwrap_or(2);
                if let (Some(child_uri), 0..=1) = (&child_uri, level) {
                    total_deleted += self.remove_descendants(child_uri).await?;
                }
                if let Some(id) = child.get("id").and_then(Value::as_str) {
                    total_deleted += self.delete(vec![id.to_string()]).await?;
                }
            }
            Ok(total_deleted)
        })
    }

    // ------------------------------------------------------------------
    // Semantic context operations (tenant-aware)
    // ------------------------------------------------------------------

    /// Vector search under the tenant scope filter.
    pub async fn search_in_tenant(
        &self,
        ctx: &RequestContext,
        search: TenantSearch,
    ) -> Result<Vec<Record>> {
        let filter = self.build_scope_filter(ctx, &search);
        self.run_search(search, filter).await
    }

    /// Global seeding search, restricted to level-0/1 summary nodes.
    pub async fn search_global_roots_in_tenant(
        &self,
        ctx: &RequestContext,
        search: TenantSearch,
    ) -> Result<Vec<Record>> {
        if !search.query_vector.as_ref().is_some_and(|v| !v.is_empty()) {
            return Ok(Vec::new());
        }
        let filter = FilterExpr::merge([
            self.build_scope_filter(ctx, &search),
            Some(FilterExpr::is_in("level", vec![json!(0), json!(1)])),
        ]);
        self.run_search(search, filter).await
    }

    /// Children of one directory under the tenant scope filter.
    pub async fn search_children_in_tenant(
        &self,
        ctx: &RequestContext,
        parent_uri: &str,
        search: TenantSearch,
    ) -> Result<Vec<Record>> {
        let filter = FilterExpr::merge([
            Some(FilterExpr::eq("parent_uri", parent_uri)),
            self.build_scope_filter(ctx, &search),
        ]);
        self.run_search(search, filter).await
    }

    /// Similar memories for deduplication: level-2 memory records only.
    pub async fn search_similar_memories(
        &self,
        account_id: &str,
        owner_space: Option<&str>,
        category_uri_prefix: &str,
        query_vector: Vec<f32>,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let mut conds = vec![
            FilterExpr::eq("context_type", "memory"),
            FilterExpr::eq("level", 2),
            FilterExpr::eq("account_id", account_id),
        ];
        if let Some(owner_space) = owner_space.filter(|s| !s.is_empty()) {
            conds.push(FilterExpr::eq("owner_space", owner_space));
        }
        if !category_uri_prefix.is_empty() {
            conds.push(FilterExpr::is_in("uri", vec![json!(category_uri_prefix)]));
        }

        let mut params = QueryParams::new();
        params.query_vector = Some(query_vector);
        params.filter = Some(FilterExpr::And(conds));
        params.limit = limit;
        self.adapter.query(params).await
    }

    /// Records for a URI scoped by account (and optionally owner space).
    pub async fn get_context_by_uri(
        &self,
        account_id: &str,
        uri: &str,
        owner_space: Option<&str>,
        limit: usize,
        with_vector: bool,
    ) -> Result<Vec<Record>> {
        let mut conds = vec![
            FilterExpr::eq("uri", uri),
            FilterExpr::eq("account_id", account_id),
        ];
        if let Some(owner_space) = owner_space.filter(|s| !s.is_empty()) {
            conds.push(FilterExpr::eq("owner_space", owner_space));
        }
        let records = self
            .filter(FilterExpr::And(conds), limit.max(10), with_vector)
            .await?;
        Ok(records
            .into_iter()
            .filter(|r| r.get("uri").and_then(Value::as_str) == Some(uri))
            .take(limit)
            .collect())
    }

    /// Cascade delete of every record belonging to an account.
    pub async fn delete_account_data(&self, account_id: &str) -> Result<usize> {
        self.adapter
            .delete_by(None, Some(FilterExpr::eq("account_id", account_id)), 100_000)
            .await
    }

    /// Delete each URI and its whole subtree, scoped by account and (for
    /// USER role under `user`/`agent` scopes) by owner space.
    pub async fn delete_uris(&self, ctx: &RequestContext, uris: &[String]) -> Result<()> {
        for uri in uris {
            let mut conds = vec![
                FilterExpr::eq("account_id", ctx.account_id()),
                FilterExpr::Or(vec![
                    FilterExpr::eq("uri", uri.as_str()),
                    FilterExpr::is_in("uri", vec![json!(format!("{uri}/"))]),
                ]),
            ];
            if ctx.role == Role::User
                && (uri.starts_with("viking://user/") || uri.starts_with("viking://agent/"))
            {
                let owner_space = if uri.starts_with("viking://user/") {
                    ctx.user.user_space_name()
                } else {
                    ctx.user.agent_space_name()
                };
                conds.push(FilterExpr::eq("owner_space", owner_space));
            }
            self.adapter
                .delete_by(None, Some(FilterExpr::And(conds)), 100_000)
                .await?;
        }
        Ok(())
    }

    /// Rewrite one record's URI fields in place, reusing its stable id so
    /// embeddings survive renames.
    pub async fn update_uri_mapping(
        &self,
        ctx: &RequestContext,
        uri: &str,
        new_uri: &str,
        new_parent_uri: &str,
    ) -> Result<bool> {
        let records = self
            .filter(
                FilterExpr::And(vec![
                    FilterExpr::eq("uri", uri),
                    FilterExpr::eq("account_id", ctx.account_id()),
                ]),
                10,
                true,
            )
            .await?;
        let Some(record) = records
            .into_iter()
            .find(|r| r.get("uri").and_then(Value::as_str) == Some(uri))
        else {
            return Ok(false);
        };
        if record.get("id").and_then(Value::as_str).is_none() {
            return Ok(false);
        }

        let mut updated = record;
        updated.insert("uri".into(), json!(new_uri));
        updated.insert("parent_uri".into(), json!(new_parent_uri));
        Ok(self.upsert(Value::Object(updated)).await?.is_some())
    }

    /// Bump the use counter on each URI. Returns the number updated.
    pub async fn increment_active_count(
        &self,
        ctx: &RequestContext,
        uris: &[String],
    ) -> Result<usize> {
        let mut updated = 0;
        for uri in uris {
            let mut records = self
                .get_context_by_uri(ctx.account_id(), uri, None, 1, true)
                .await?;
            let Some(mut record) = records.pop() else {
                continue;
            };
            let current = record.get("active_count").and_then(Value::as_i64).unwrap_or(0);
            record.insert("active_count".into(), json!(current + 1));
            if self.upsert(Value::Object(record)).await?.is_some() {
                updated += 1;
            }
        }
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Scans and maintenance
    // ------------------------------------------------------------------

    /// Offset-cursor pagination over a filter.
    pub async fn scroll(
        &self,
        filter: Option<FilterExpr>,
        limit: usize,
        cursor: Option<&str>,
        output_fields: Option<Vec<String>>,
    ) -> Result<(Vec<Record>, Option<String>)> {
        let offset = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let mut params = QueryParams::new();
        params.filter = filter;
        params.limit = limit;
        params.offset = offset;
        params.output_fields = output_fields;
        let records = self.adapter.query(params).await?;
        let next_cursor = (records.len() == limit).then(|| (offset + limit).to_string());
        Ok((records, next_cursor))
    }

    pub async fn count(&self, filter: Option<FilterExpr>) -> Result<i64> {
        self.adapter.count(filter).await
    }

    pub async fn clear(&self) -> Result<bool> {
        self.adapter.clear().await
    }

    pub async fn health_check(&self) -> bool {
        self.collection_exists().await.is_ok()
    }

    pub async fn get_stats(&self) -> Value {
        let exists = self.collection_exists().await.unwrap_or(false);
        let total_records = if exists {
            self.count(None).await.unwrap_or(0)
        } else {
            0
        };
        json!({
            "collections": if exists { 1 } else { 0 },
            "total_records": total_records,
            "backend": "vikingdb",
            "mode": self.adapter.mode(),
        })
    }

    pub async fn close(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        self.adapter.close().await?;
        *self.known_fields.write().await = None;
        info!("Vector index backend closed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn run_search(
        &self,
        search: TenantSearch,
        filter: Option<FilterExpr>,
    ) -> Result<Vec<Record>> {
        let mut params = QueryParams::new();
        params.query_vector = search.query_vector;
        params.sparse_query_vector = search.sparse_query_vector;
        params.filter = filter;
        params.limit = search.limit.max(1);
        params.offset = search.offset;
        self.adapter.query(params).await
    }

    fn build_scope_filter(&self, ctx: &RequestContext, search: &TenantSearch) -> Option<FilterExpr> {
        let mut filters: Vec<Option<FilterExpr>> = Vec::new();

        if let Some(context_type) = search.context_type.as_deref().filter(|s| !s.is_empty()) {
            filters.push(Some(FilterExpr::eq("context_type", context_type)));
        }

        filters.push(Self::tenant_filter(ctx));

        let uri_conds: Vec<FilterExpr> = search
            .target_directories
            .iter()
            .filter(|dir| !dir.is_empty())
            .map(|dir| FilterExpr::is_in("uri", vec![json!(dir)]))
            .collect();
        if !uri_conds.is_empty() {
            filters.push(Some(FilterExpr::Or(uri_conds)));
        }

        if let Some(extra) = &search.extra_filter {
            if !crate::expr::is_empty_dsl(extra) {
                filters.push(Some(FilterExpr::RawDsl(extra.clone())));
            }
        }

        FilterExpr::merge(filters)
    }

    /// Tenant isolation: account scope plus owner-space membership. ROOT
    /// bypasses the filter.
    fn tenant_filter(ctx: &RequestContext) -> Option<FilterExpr> {
        if ctx.role.is_root() {
            return None;
        }
        let owner_spaces = vec![
            json!(ctx.user.user_space_name()),
            json!(ctx.user.agent_space_name()),
            json!(""),
        ];
        Some(FilterExpr::And(vec![
            FilterExpr::eq("account_id", ctx.account_id()),
            FilterExpr::is_in("owner_space", owner_spaces),
        ]))
    }

    /// Drop unknown fields and nulls against the collection's field list.
    async fn filter_known_fields(&self, record: Record) -> Record {
        let allowed = self.load_known_fields().await;
        let Some(allowed) = allowed else {
            return record;
        };
        record
            .into_iter()
            .filter(|(key, value)| allowed.contains(key) && !value.is_null())
            .collect()
    }

    async fn load_known_fields(&self) -> Option<HashSet<String>> {
        if let Some(fields) = self.known_fields.read().await.as_ref() {
            return Some(fields.clone());
        }
        let meta = self.adapter.get_collection_info().await.ok()??;
        let fields = schema_field_names(&meta);
        if fields.is_empty() {
            return None;
        }
        debug!("Cached {} collection fields", fields.len());
        *self.known_fields.write().await = Some(fields.clone());
        Some(fields)
    }
}
