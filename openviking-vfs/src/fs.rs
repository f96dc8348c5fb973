//! VikingFS: the URI-keyed, tenant-scoped filesystem facade.
//!
//! Wraps the pluggable blob store with `viking://` URI addressing, the role
//! access gate, the per-directory relation tables, and keeps the vector
//! index consistent across `rm`/`mv`. `find`/`search` delegate to the
//! hierarchical retriever; `write_context` feeds the embedding queue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use openviking_core::traits::{BlobStore, FileStat, GrepMatch};
use openviking_core::uri::{parent_uri_str, path_to_uri, uri_to_path};
use openviking_core::{
    ContextNode, ContextType, RequestContext, Result, VikingError, VikingUri,
};
use openviking_queue::{EMBEDDING_QUEUE, EmbeddingMsg, QueueManager, SEMANTIC_QUEUE};
use openviking_retrieval::{
    HierarchicalRetriever, QueryResult, RelationProvider, RetrieverMode, TypedQuery,
};
use openviking_storage::VectorIndexBackend;

use crate::access::{check_uri_access, is_uri_visible};
use crate::decode::decode_text;
use crate::relations::{
    RELATIONS_FILE, RelationEntry, next_link_id, parse_relation_table, serialize_relation_table,
};

/// Default content file name for directory nodes.
pub const DEFAULT_CONTENT_FILENAME: &str = "content.md";

/// One node in a `tree` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEntry {
    pub uri: String,
    #[serde(rename = "isDir")]
    pub is_dir: bool,
    pub size: u64,
}

/// Payload for [`VikingFS::write_context`].
#[derive(Debug, Clone, Default)]
pub struct WriteContextRequest {
    pub uri: String,
    pub content: Option<Vec<u8>>,
    pub abstract_text: Option<String>,
    pub overview: Option<String>,
    pub content_filename: Option<String>,
    pub is_leaf: bool,
}

impl WriteContextRequest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }
}

/// The filesystem facade.
pub struct VikingFS {
    blob: Arc<dyn BlobStore>,
    index: Arc<VectorIndexBackend>,
    retriever: OnceLock<Arc<HierarchicalRetriever>>,
    queues: OnceLock<Arc<QueueManager>>,
}

impl VikingFS {
    pub fn new(blob: Arc<dyn BlobStore>, index: Arc<VectorIndexBackend>) -> Self {
        Self {
            blob,
            index,
            retriever: OnceLock::new(),
            queues: OnceLock::new(),
        }
    }

    pub fn blob(&self) -> &Arc<dyn BlobStore> {
        &self.blob
    }

    pub fn index(&self) -> &Arc<VectorIndexBackend> {
        &self.index
    }

    /// Wire the retriever and register this facade as its relation provider.
    pub fn wire_retriever(self: &Arc<Self>, retriever: Arc<HierarchicalRetriever>) {
        retriever.set_relation_provider(self.clone());
        let _ = self.retriever.set(retriever);
    }

    /// Attach the queue manager that receives embedding and semantic work.
    pub fn attach_queues(&self, queues: Arc<QueueManager>) {
        let _ = self.queues.set(queues);
    }

    // ------------------------------------------------------------------
    // Basic file operations
    // ------------------------------------------------------------------

    pub async fn read(&self, uri: &str, ctx: Option<&RequestContext>) -> Result<Vec<u8>> {
        let (_, _, path) = self.gate(uri, ctx)?;
        self.blob.read(&path, None, None).await
    }

    /// Read a file with the permissive text decoder.
    pub async fn read_text(&self, uri: &str, ctx: Option<&RequestContext>) -> Result<String> {
        Ok(decode_text(&self.read(uri, ctx).await?))
    }

    pub async fn write(&self, uri: &str, data: &[u8], ctx: Option<&RequestContext>) -> Result<()> {
        let (_, _, path) = self.gate(uri, ctx)?;
        self.blob.write(&path, data).await
    }

    pub async fn mkdir(&self, uri: &str, ctx: Option<&RequestContext>) -> Result<()> {
        let (_, _, path) = self.gate(uri, ctx)?;
        self.blob.mkdir(&path).await
    }

    pub async fn stat(&self, uri: &str, ctx: Option<&RequestContext>) -> Result<FileStat> {
        let (_, _, path) = self.gate(uri, ctx)?;
        self.blob.stat(&path).await
    }

    pub async fn exists(&self, uri: &str, ctx: Option<&RequestContext>) -> Result<bool> {
        match self.stat(uri, ctx).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// List directory contents. Internal dotfiles are hidden unless
    /// `show_all_hidden`; children the context may not see are omitted.
    pub async fn ls(
        &self,
        uri: &str,
        show_all_hidden: bool,
        ctx: Option<&RequestContext>,
    ) -> Result<Vec<FileStat>> {
        let (ctx, parsed, path) = self.gate(uri, ctx)?;
        let entries = self.blob.ls(&path).await?;
        Ok(entries
            .into_iter()
            .filter(|e| show_all_hidden || !e.name.starts_with('.'))
            .filter(|e| is_uri_visible(&ctx, &parsed.join(&e.name)))
            .collect())
    }

    /// Full recursive listing rooted at `uri` (directories included).
    pub async fn tree(&self, uri: &str, ctx: Option<&RequestContext>) -> Result<Vec<TreeEntry>> {
        let (ctx, parsed, _) = self.gate(uri, ctx)?;
        let mut out = Vec::new();
        self.walk(&ctx, &parsed, false, &mut out).await?;
        Ok(out)
    }

    /// Match descendant URIs against a glob pattern (`*`, `?`, `**`).
    pub async fn glob(
        &self,
        uri: &str,
        pattern: &str,
        ctx: Option<&RequestContext>,
    ) -> Result<Vec<String>> {
        let (ctx, parsed, _) = self.gate(uri, ctx)?;
        let regex = glob_to_regex(pattern)?;
        let base = parsed.to_string();
        let mut entries = Vec::new();
        self.walk(&ctx, &parsed, false, &mut entries).await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let rel = entry.uri.strip_prefix(&base)?.trim_start_matches('/').to_string();
                (!rel.is_empty() && regex.is_match(&rel)).then_some(entry.uri)
            })
            .collect())
    }

    /// Search blob contents under a URI; match paths map back to URIs.
    pub async fn grep(
        &self,
        uri: &str,
        pattern: &str,
        recursive: bool,
        case_insensitive: bool,
        ctx: Option<&RequestContext>,
    ) -> Result<Vec<GrepMatch>> {
        let (ctx, _, path) = self.gate(uri, ctx)?;
        let mut matches = self
            .blob
            .grep(&path, pattern, recursive, case_insensitive)
            .await?;
        for entry in &mut matches {
            if let Ok(uri) = path_to_uri(&entry.file, ctx.account_id()) {
                entry.file = uri;
            }
        }
        Ok(matches)
    }

    // ------------------------------------------------------------------
    // Indexer-consistent mutations
    // ------------------------------------------------------------------

    /// Remove a URI: blobs first, then every vector record under it.
    /// Idempotent: orphan vector records are purged even when the blob is
    /// already gone.
    pub async fn rm(&self, uri: &str, recursive: bool, ctx: Option<&RequestContext>) -> Result<()> {
        let (ctx, parsed, path) = self.gate(uri, ctx)?;

        match self.blob.rm(&path, recursive).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("Blob already gone for {}, purging vector records", parsed);
            }
            Err(e) => return Err(e),
        }

        self.index
            .delete_uris(&ctx, std::slice::from_ref(&parsed.to_string()))
            .await?;
        Ok(())
    }

    /// Move a subtree: blob mv first, then rewrite the URI of every vector
    /// record under it (embeddings are not recomputed). When the source blob
    /// is missing, vector-side cleanup still runs and the error is reraised.
    pub async fn mv(&self, from: &str, to: &str, ctx: Option<&RequestContext>) -> Result<()> {
        let (ctx, from_uri, from_path) = self.gate(from, ctx)?;
        let to_uri = VikingUri::parse(to)?;
        check_uri_access(&ctx, &to_uri)?;
        let to_path = uri_to_path(&to_uri.to_string(), ctx.account_id())?;

        // Collect descendant URIs before the blob move.
        let mut collected = Vec::new();
        match self.walk(&ctx, &from_uri, true, &mut collected).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let mut uris: Vec<String> = vec![from_uri.to_string()];
        uris.extend(collected.into_iter().map(|e| e.uri));

        if let Err(e) = self.blob.mv(&from_path, &to_path).await {
            if e.is_not_found() {
                // Source vanished: purge stale vector records, then reraise.
                self.index
                    .delete_uris(&ctx, std::slice::from_ref(&from_uri.to_string()))
                    .await?;
            }
            return Err(e);
        }

        let from_base = from_uri.to_string();
        let to_base = to_uri.to_string();
        for uri in uris {
            let new_uri = format!("{to_base}{}", &uri[from_base.len()..]);
            let new_parent = parent_uri_str(&new_uri);
            self.index
                .update_uri_mapping(&ctx, &uri, &new_uri, &new_parent)
                .await?;
        }
        info!("Moved {} -> {}", from_base, to_base);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Summaries and context nodes
    // ------------------------------------------------------------------

    /// Read the level-0 summary of a directory node.
    pub async fn abstract_of(&self, uri: &str, ctx: Option<&RequestContext>) -> Result<String> {
        self.read_summary(uri, openviking_core::context::ABSTRACT_FILE, ctx)
            .await
    }

    /// Read the level-1 overview of a directory node.
    pub async fn overview_of(&self, uri: &str, ctx: Option<&RequestContext>) -> Result<String> {
        self.read_summary(uri, openviking_core::context::OVERVIEW_FILE, ctx)
            .await
    }

    async fn read_summary(
        &self,
        uri: &str,
        file: &str,
        ctx: Option<&RequestContext>,
    ) -> Result<String> {
        let (_, parsed, path) = self.gate(uri, ctx)?;
        let stat = self.blob.stat(&path).await?;
        if !stat.is_dir {
            return Err(VikingError::invalid_argument(format!(
                "{parsed} is a file, not a directory node"
            )));
        }
        let raw = self.blob.read(&format!("{path}/{file}"), None, None).await?;
        Ok(decode_text(&raw))
    }

    /// Level-0 abstracts for a batch of URIs; missing summaries are skipped.
    pub async fn read_batch(
        &self,
        uris: &[String],
        ctx: Option<&RequestContext>,
    ) -> Result<HashMap<String, String>> {
        let ctx = RequestContext::resolve(ctx)?;
        let mut out = HashMap::new();
        for uri in uris {
            match self.abstract_of(uri, Some(&ctx)).await {
                Ok(text) => {
                    out.insert(uri.clone(), text);
                }
                Err(e) if e.is_not_found() || e.is_permission_denied() => {}
                Err(VikingError::InvalidArgument(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Create or overwrite a context node, writing its content file and
    /// summaries, and enqueue embedding work for each written level.
    pub async fn write_context(
        &self,
        request: WriteContextRequest,
        ctx: Option<&RequestContext>,
    ) -> Result<()> {
        let (ctx, parsed, path) = self.gate(&request.uri, ctx)?;
        let node_uri = parsed.to_string();

        if request.is_leaf {
            let content = request.content.as_deref().unwrap_or_default();
            self.blob.write(&path, content).await?;
            self.enqueue_embedding(
                &ctx,
                &parsed,
                &node_uri,
                request.abstract_text.as_deref().unwrap_or_default(),
                &decode_text(content),
            )
            .await?;
            return Ok(());
        }

        self.blob.mkdir(&path).await?;

        if let Some(content) = &request.content {
            let filename = request
                .content_filename
                .as_deref()
                .unwrap_or(DEFAULT_CONTENT_FILENAME);
            self.blob.write(&format!("{path}/{filename}"), content).await?;
        }
        if let Some(abstract_text) = &request.abstract_text {
            self.blob
                .write(
                    &format!("{path}/{}", openviking_core::context::ABSTRACT_FILE),
                    abstract_text.as_bytes(),
                )
                .await?;
        }
        if let Some(overview) = &request.overview {
            self.blob
                .write(
                    &format!("{path}/{}", openviking_core::context::OVERVIEW_FILE),
                    overview.as_bytes(),
                )
                .await?;
        }

        // Summary records advertise the node in its parent's child listing;
        // the content record is the node itself.
        let abstract_text = request.abstract_text.as_deref().unwrap_or_default();
        if let Some(text) = &request.abstract_text {
            let uri = format!("{node_uri}/{}", openviking_core::context::ABSTRACT_FILE);
            self.enqueue_embedding(&ctx, &parsed, &uri, abstract_text, text).await?;
        }
        if let Some(overview) = &request.overview {
            let uri = format!("{node_uri}/{}", openviking_core::context::OVERVIEW_FILE);
            self.enqueue_embedding(&ctx, &parsed, &uri, abstract_text, overview)
                .await?;
        }
        if let Some(content) = &request.content {
            self.enqueue_embedding(&ctx, &parsed, &node_uri, abstract_text, &decode_text(content))
                .await?;
        }
        Ok(())
    }

    /// Push one embedding message for a node level. No-op without queues.
    async fn enqueue_embedding(
        &self,
        ctx: &RequestContext,
        node: &VikingUri,
        record_uri: &str,
        abstract_text: &str,
        vectorization_text: &str,
    ) -> Result<()> {
        let Some(queue) = self
            .queues
            .get()
            .and_then(|queues| queues.get_queue(EMBEDDING_QUEUE))
        else {
            return Ok(());
        };

        let mut context = ContextNode::new(record_uri, derive_context_type(node));
        // Summaries carry the node's parent so they list as its siblings.
        context.parent_uri = parent_uri_str(&node.to_string());
        context.name = node.name().to_string();
        context.abstract_text = abstract_text.to_string();
        context.account_id = ctx.account_id().to_string();
        context.owner_space = node.space().unwrap_or_default().to_string();

        if let Some(msg) = EmbeddingMsg::from_context(context, vectorization_text) {
            queue.enqueue(serde_json::to_value(&msg)?).await?;
        }
        Ok(())
    }

    /// Enqueue a semantic DAG walk over a subtree. No-op without queues.
    pub async fn enqueue_semantic_task(
        &self,
        root_uri: &str,
        context_type: ContextType,
        ctx: Option<&RequestContext>,
    ) -> Result<Option<String>> {
        let (ctx, parsed, _) = self.gate(root_uri, ctx)?;
        let Some(queue) = self
            .queues
            .get()
            .and_then(|queues| queues.get_queue(SEMANTIC_QUEUE))
        else {
            return Ok(None);
        };
        let id = queue
            .enqueue(json!({
                "root_uri": parsed.to_string(),
                "context_type": context_type.as_str(),
                "ctx": ctx,
            }))
            .await?;
        Ok(Some(id))
    }

    // ------------------------------------------------------------------
    // Relations
    // ------------------------------------------------------------------

    /// Link a node to target URIs. Returns the allocated `link_{N}` id.
    pub async fn link(
        &self,
        uri: &str,
        target_uris: &[String],
        reason: &str,
        ctx: Option<&RequestContext>,
    ) -> Result<String> {
        let (_, _, path) = self.gate(uri, ctx)?;
        let table_path = format!("{path}/{RELATIONS_FILE}");
        let mut entries = self.load_relation_entries(&table_path).await?;
        let id = next_link_id(&entries);
        entries.push(RelationEntry {
            id: id.clone(),
            uris: target_uris.to_vec(),
            reason: reason.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        });
        self.blob
            .write(&table_path, &serialize_relation_table(&entries)?)
            .await?;
        Ok(id)
    }

    /// Remove a target URI from the node's relations; entries whose last URI
    /// is removed disappear entirely.
    pub async fn unlink(
        &self,
        uri: &str,
        target_uri: &str,
        ctx: Option<&RequestContext>,
    ) -> Result<()> {
        let (_, _, path) = self.gate(uri, ctx)?;
        let table_path = format!("{path}/{RELATIONS_FILE}");
        let mut entries = self.load_relation_entries(&table_path).await?;
        for entry in &mut entries {
            entry.uris.retain(|u| u != target_uri);
        }
        entries.retain(|entry| !entry.uris.is_empty());
        self.blob
            .write(&table_path, &serialize_relation_table(&entries)?)
            .await?;
        Ok(())
    }

    /// All related URIs of a node, access-filtered.
    pub async fn get_relations(
        &self,
        uri: &str,
        ctx: Option<&RequestContext>,
    ) -> Result<Vec<String>> {
        let ctx = RequestContext::resolve(ctx)?;
        Ok(self
            .get_relation_table(uri, Some(&ctx))
            .await?
            .into_iter()
            .flat_map(|entry| entry.uris)
            .collect())
    }

    /// The relation table of a node with inaccessible URIs filtered out.
    pub async fn get_relation_table(
        &self,
        uri: &str,
        ctx: Option<&RequestContext>,
    ) -> Result<Vec<RelationEntry>> {
        let (ctx, _, path) = self.gate(uri, ctx)?;
        let table_path = format!("{path}/{RELATIONS_FILE}");
        let mut entries = self.load_relation_entries(&table_path).await?;
        for entry in &mut entries {
            entry.uris.retain(|u| {
                VikingUri::parse(u)
                    .map(|parsed| is_uri_visible(&ctx, &parsed))
                    .unwrap_or(false)
            });
        }
        entries.retain(|entry| !entry.uris.is_empty());
        Ok(entries)
    }

    async fn load_relation_entries(&self, table_path: &str) -> Result<Vec<RelationEntry>> {
        match self.blob.read(table_path, None, None).await {
            Ok(raw) => parse_relation_table(&raw),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------

    /// Semantic lookup under an optional target directory.
    pub async fn find(
        &self,
        query: &str,
        target_uri: Option<&str>,
        limit: usize,
        ctx: Option<&RequestContext>,
    ) -> Result<QueryResult> {
        let mut typed = TypedQuery::new(query);
        if let Some(target) = target_uri {
            typed = typed.with_target(target);
        }
        self.search(typed, limit, RetrieverMode::Thinking, None, false, None, ctx)
            .await
    }

    /// Full-control retrieval entry point.
    #[allow(clippy::too_many_arguments)]
    pub async fn search(
        &self,
        query: TypedQuery,
        limit: usize,
        mode: RetrieverMode,
        score_threshold: Option<f64>,
        score_gte: bool,
        scope_dsl: Option<Value>,
        ctx: Option<&RequestContext>,
    ) -> Result<QueryResult> {
        let ctx = RequestContext::resolve(ctx)?;
        for target in &query.target_directories {
            check_uri_access(&ctx, &VikingUri::parse(target)?)?;
        }
        let retriever = self
            .retriever
            .get()
            .ok_or_else(|| VikingError::internal("retriever is not wired"))?;
        retriever
            .retrieve(&query, &ctx, limit, mode, score_threshold, score_gte, scope_dsl)
            .await
    }

    /// Bump the use counter on each URI.
    pub async fn increment_active_count(
        &self,
        uris: &[String],
        ctx: Option<&RequestContext>,
    ) -> Result<usize> {
        let ctx = RequestContext::resolve(ctx)?;
        self.index.increment_active_count(&ctx, uris).await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Resolve the context, check access, and map the URI to its path.
    fn gate(
        &self,
        uri: &str,
        ctx: Option<&RequestContext>,
    ) -> Result<(RequestContext, VikingUri, String)> {
        let ctx = RequestContext::resolve(ctx)?;
        let parsed = VikingUri::parse(uri)?;
        check_uri_access(&ctx, &parsed)?;
        let path = uri_to_path(&parsed.to_string(), ctx.account_id())?;
        Ok((ctx, parsed, path))
    }

    /// Depth-first listing under a URI. `include_hidden` keeps dotfiles
    /// (needed when collecting URIs for index consistency).
    fn walk<'a>(
        &'a self,
        ctx: &'a RequestContext,
        base: &'a VikingUri,
        include_hidden: bool,
        out: &'a mut Vec<TreeEntry>,
    ) -> futures::future::BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = uri_to_path(&base.to_string(), ctx.account_id())?;
            let stat = self.blob.stat(&path).await?;
            if !stat.is_dir {
                return Ok(());
            }
            for entry in self.blob.ls(&path).await? {
                if !include_hidden && entry.name.starts_with('.') {
                    continue;
                }
                let child = base.join(&entry.name);
                if !is_uri_visible(ctx, &child) {
                    continue;
                }
                out.push(TreeEntry {
                    uri: child.to_string(),
                    is_dir: entry.is_dir,
                    size: entry.size,
                });
                if entry.is_dir {
                    self.walk(ctx, &child, include_hidden, out).await?;
                }
            }
            Ok(())
        })
    }
}

#[async_trait]
impl RelationProvider for VikingFS {
    async fn get_relations(&self, uri: &str, ctx: &RequestContext) -> Result<Vec<String>> {
        VikingFS::get_relations(self, uri, Some(ctx)).await
    }

    async fn read_abstracts(
        &self,
        uris: &[String],
        ctx: &RequestContext,
    ) -> Result<HashMap<String, String>> {
        self.read_batch(uris, Some(ctx)).await
    }
}

/// Context type by URI convention: agent skills, memory trees, everything
/// else a resource.
fn derive_context_type(uri: &VikingUri) -> ContextType {
    let segments = uri.segments();
    if uri.scope() == "agent" && segments.get(2).map(String::as_str) == Some("skills") {
        return ContextType::Skill;
    }
    if segments.iter().any(|s| s == "memories") {
        return ContextType::Memory;
    }
    ContextType::Resource
}

/// Translate a glob pattern (`*`, `?`, `**`) to an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<regex::Regex> {
    let mut expr = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        // `**/` spans zero or more directories.
                        expr.push_str("(?:.*/)?");
                    } else {
                        expr.push_str(".*");
                    }
                } else {
                    expr.push_str("[^/]*");
                }
            }
            '?' => expr.push_str("[^/]"),
            c if "\\.+()[]{}^$|".contains(c) => {
                expr.push('\\');
                expr.push(c);
            }
            c => expr.push(c),
        }
    }
    expr.push('$');
    regex::Regex::new(&expr)
        .map_err(|e| VikingError::invalid_argument(format!("bad glob pattern {pattern}: {e}")))
}
