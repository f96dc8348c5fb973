//! Hierarchical retriever: best-first recursive descent over the context
//! tree, blending vector similarity, rerank, score propagation, and hotness.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

use openviking_core::config::RerankConfig;
use openviking_core::{
    ContextLevel, ContextType, Embedder, RequestContext, Reranker, Result, Role,
};
use openviking_storage::{Record, TenantSearch, VectorIndexBackend};

use crate::hotness::hotness_score;
use crate::types::{MatchedContext, QueryResult, RelatedContext, RetrieverMode, TypedQuery};

/// Storage surface the retriever needs; implemented by the vector index
/// backend and by scripted stores in tests.
#[async_trait]
pub trait RetrieverStorage: Send + Sync {
    fn collection_name(&self) -> String;

    async fn collection_exists(&self) -> Result<bool>;

    async fn search_global_roots(
        &self,
        ctx: &RequestContext,
        search: TenantSearch,
    ) -> Result<Vec<Record>>;

    async fn search_children(
        &self,
        ctx: &RequestContext,
        parent_uri: &str,
        search: TenantSearch,
    ) -> Result<Vec<Record>>;
}

#[async_trait]
impl RetrieverStorage for VectorIndexBackend {
    fn collection_name(&self) -> String {
        VectorIndexBackend::collection_name(self).to_string()
    }

    async fn collection_exists(&self) -> Result<bool> {
        VectorIndexBackend::collection_exists(self).await
    }

    async fn search_global_roots(
        &self,
        ctx: &RequestContext,
        search: TenantSearch,
    ) -> Result<Vec<Record>> {
        self.search_global_roots_in_tenant(ctx, search).await
    }

    async fn search_children(
        &self,
        ctx: &RequestContext,
        parent_uri: &str,
        search: TenantSearch,
    ) -> Result<Vec<Record>> {
        self.search_children_in_tenant(ctx, parent_uri, search).await
    }
}

/// Supplies related URIs and their level-0 abstracts for result enrichment.
#[async_trait]
pub trait RelationProvider: Send + Sync {
    async fn get_relations(&self, uri: &str, ctx: &RequestContext) -> Result<Vec<String>>;

    async fn read_abstracts(
        &self,
        uris: &[String],
        ctx: &RequestContext,
    ) -> Result<HashMap<String, String>>;
}

/// Hierarchical retriever with dense and sparse vector support.
pub struct HierarchicalRetriever {
    storage: Arc<dyn RetrieverStorage>,
    embedder: Option<Arc<dyn Embedder>>,
    reranker: Option<Arc<dyn Reranker>>,
    relations: OnceLock<Arc<dyn RelationProvider>>,
    threshold: f64,
}

impl HierarchicalRetriever {
    /// Stop after this many rounds with an unchanged top-k.
    pub const MAX_CONVERGENCE_ROUNDS: u32 = 3;
    /// Maximum relations attached per result.
    pub const MAX_RELATIONS: usize = 5;
    /// Score propagation coefficient.
    pub const SCORE_PROPAGATION_ALPHA: f64 = 0.5;
    /// Directory score must exceed max child score by this ratio.
    pub const DIRECTORY_DOMINANCE_RATIO: f64 = 1.2;
    /// Global retrieval count for starting-point seeding.
    pub const GLOBAL_SEARCH_TOPK: usize = 3;
    /// Weight of the hotness score in final ranking (0 disables it).
    pub const HOTNESS_ALPHA: f64 = 0.2;

    pub fn new(
        storage: Arc<dyn RetrieverStorage>,
        embedder: Option<Arc<dyn Embedder>>,
        reranker: Option<Arc<dyn Reranker>>,
        rerank_config: Option<&RerankConfig>,
    ) -> Self {
        let threshold = rerank_config.map(|c| c.threshold as f64).unwrap_or(0.0);
        let reranker = match rerank_config {
            Some(config) if config.is_available() => reranker,
            _ => {
                info!(
                    "Rerank not configured, using vector search only with threshold={}",
                    threshold
                );
                None
            }
        };
        Self {
            storage,
            embedder,
            reranker,
            relations: OnceLock::new(),
            threshold,
        }
    }

    /// Wire the relation provider after construction (the filesystem facade
    /// depends on this retriever, so it attaches itself here).
    pub fn set_relation_provider(&self, provider: Arc<dyn RelationProvider>) {
        let _ = self.relations.set(provider);
    }

    /// Execute hierarchical retrieval.
    pub async fn retrieve(
        &self,
        query: &TypedQuery,
        ctx: &RequestContext,
        limit: usize,
        mode: RetrieverMode,
        score_threshold: Option<f64>,
        score_gte: bool,
        scope_dsl: Option<Value>,
    ) -> Result<QueryResult> {
        let effective_threshold = score_threshold.unwrap_or(self.threshold);
        let target_dirs: Vec<String> = query
            .target_directories
            .iter()
            .filter(|d| !d.is_empty())
            .cloned()
            .collect();

        if !self.storage.collection_exists().await? {
            warn!(
                "Collection {} does not exist",
                self.storage.collection_name()
            );
            return Ok(QueryResult {
                query: query.clone(),
                matched_contexts: Vec::new(),
                searched_directories: Vec::new(),
            });
        }

        // Embed the query once to avoid duplicate embedding calls.
        let (query_vector, sparse_query_vector) = match &self.embedder {
            Some(embedder) => {
                let embedder = embedder.clone();
                let text = query.query.clone();
                let result = spawn_blocking(move || embedder.embed(&text))
                    .await
                    .map_err(|e| {
                        openviking_core::VikingError::internal(format!("embed task failed: {e}"))
                    })??;
                (Some(result.dense_vector), result.sparse_vector)
            }
            None => (None, None),
        };

        // Step 1: starting directories from target_directories or type roots.
        let root_uris = if target_dirs.is_empty() {
            self.root_uris_for_type(query.context_type, ctx)
        } else {
            target_dirs.clone()
        };

        // Step 2: global vector search to supplement starting points.
        let context_type = query.context_type.map(|t| t.as_str().to_string());
        let global_results = self
            .storage
            .search_global_roots(
                ctx,
                TenantSearch {
                    query_vector: query_vector.clone(),
                    sparse_query_vector: sparse_query_vector.clone(),
                    context_type: context_type.clone(),
                    target_directories: target_dirs.clone(),
                    extra_filter: scope_dsl.clone(),
                    limit: Self::GLOBAL_SEARCH_TOPK,
                    offset: 0,
                },
            )
            .await?;

        // Step 3: merge starting points. Seeds that pass the threshold are
        // also candidate results in their own right.
        let (starting_points, seed_candidates) = self
            .merge_starting_points(&query.query, &root_uris, global_results, mode)
            .await?;

        // Step 4: recursive best-first search.
        let candidates = self
            .recursive_search(RecursiveSearchArgs {
                query: &query.query,
                ctx,
                query_vector,
                sparse_query_vector,
                starting_points,
                seed_candidates,
                limit,
                mode,
                threshold: effective_threshold,
                score_gte,
                context_type,
                target_dirs: &target_dirs,
                scope_dsl,
            })
            .await?;

        // Step 5: hotness blend, relations, final ranking.
        let mut matched = self.convert_to_matched_contexts(candidates, ctx).await?;
        matched.truncate(limit);

        Ok(QueryResult {
            query: query.clone(),
            matched_contexts: matched,
            searched_directories: root_uris,
        })
    }

    /// Starting directory URIs per context type and tenant. ROOT has no
    /// space and relies on global seeding alone.
    fn root_uris_for_type(
        &self,
        context_type: Option<ContextType>,
        ctx: &RequestContext,
    ) -> Vec<String> {
        if ctx.role == Role::Root {
            return Vec::new();
        }
        let user_space = ctx.user.user_space_name();
        let agent_space = ctx.user.agent_space_name();
        match context_type {
            None => vec![
                format!("viking://user/{user_space}/memories"),
                format!("viking://agent/{agent_space}/memories"),
                "viking://resources".to_string(),
                format!("viking://agent/{agent_space}/skills"),
            ],
            Some(ContextType::Memory) => vec![
                format!("viking://user/{user_space}/memories"),
                format!("viking://agent/{agent_space}/memories"),
            ],
            Some(ContextType::Resource) => vec!["viking://resources".to_string()],
            Some(ContextType::Skill) => vec![format!("viking://agent/{agent_space}/skills")],
        }
    }

    /// Merge global hits (with their scores) and root URIs (score 0),
    /// deduplicated by node URI. Summary hits (`.abstract.md`/`.overview.md`)
    /// are normalized to the directory they describe, both as expansion
    /// starting points and as seed candidates.
    async fn merge_starting_points(
        &self,
        query: &str,
        root_uris: &[String],
        global_results: Vec<Record>,
        mode: RetrieverMode,
    ) -> Result<(Vec<(String, f64)>, Vec<(Record, f64)>)> {
        let mut points = Vec::new();
        let mut seeds = Vec::new();
        let mut seen = HashSet::new();

        let scores = self.score_candidates(query, &global_results, mode).await?;
        for (record, score) in global_results.into_iter().zip(scores) {
            let uri = node_uri_of(&record);
            if uri.is_empty() || seen.contains(&uri) {
                continue;
            }
            points.push((uri.clone(), score));
            seen.insert(uri);
            seeds.push((record, score));
        }

        for uri in root_uris {
            if !seen.contains(uri) {
                points.push((uri.clone(), 0.0));
                seen.insert(uri.clone());
            }
        }

        Ok((points, seeds))
    }

    /// Score candidates either by reranking their abstracts (Thinking mode
    /// with a reranker) or by their vector `_score`.
    async fn score_candidates(
        &self,
        query: &str,
        records: &[Record],
        mode: RetrieverMode,
    ) -> Result<Vec<f64>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        if let (Some(reranker), RetrieverMode::Thinking) = (&self.reranker, mode) {
            let documents: Vec<String> = records
                .iter()
                .map(|r| {
                    r.get("abstract")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                })
                .collect();
            let reranker = reranker.clone();
            let query = query.to_string();
            let scores = spawn_blocking(move || reranker.rerank_batch(&query, &documents))
                .await
                .map_err(|e| {
                    openviking_core::VikingError::internal(format!("rerank task failed: {e}"))
                })??;
            return Ok(scores.into_iter().map(|s| s as f64).collect());
        }
        Ok(records
            .iter()
            .map(|r| r.get("_score").and_then(Value::as_f64).unwrap_or(0.0))
            .collect())
    }

    /// Best-first expansion over a max-heap of directory URIs with score
    /// propagation and a convergence stop rule.
    async fn recursive_search(&self, args: RecursiveSearchArgs<'_>) -> Result<Vec<Record>> {
        let RecursiveSearchArgs {
            query,
            ctx,
            query_vector,
            sparse_query_vector,
            starting_points,
            seed_candidates,
            limit,
            mode,
            threshold,
            score_gte,
            context_type,
            target_dirs,
            scope_dsl,
        } = args;

        let alpha = Self::SCORE_PROPAGATION_ALPHA;
        let passes_threshold = |score: f64| {
            if score_gte {
                score >= threshold
            } else {
                score > threshold
            }
        };

        let mut collected: Vec<Record> = Vec::new();
        let mut collected_uris: HashSet<String> = HashSet::new();
        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut prev_topk: HashSet<String> = HashSet::new();
        let mut convergence_rounds = 0u32;
        let mut seq = 0u64;

        for (uri, score) in starting_points {
            heap.push(HeapEntry { score, seq, uri });
            seq += 1;
        }

        // Global seeds that pass the threshold are results themselves.
        for (mut record, score) in seed_candidates {
            if !passes_threshold(score) {
                continue;
            }
            let uri = node_uri_of(&record);
            if uri.is_empty() || collected_uris.contains(&uri) {
                continue;
            }
            record.insert("uri".into(), Value::from(uri.clone()));
            record.insert("_final_score".into(), Value::from(score));
            collected_uris.insert(uri);
            collected.push(record);
        }

        while let Some(entry) = heap.pop() {
            let current_uri = entry.uri;
            let current_score = entry.score;
            if visited.contains(&current_uri) {
                continue;
            }
            visited.insert(current_uri.clone());
            debug!("Entering URI: {}", current_uri);

            let pre_filter_limit = (limit * 2).max(20);
            let results = self
                .storage
                .search_children(
                    ctx,
                    &current_uri,
                    TenantSearch {
                        query_vector: query_vector.clone(),
                        sparse_query_vector: sparse_query_vector.clone(),
                        context_type: context_type.clone(),
                        target_directories: target_dirs.to_vec(),
                        extra_filter: scope_dsl.clone(),
                        limit: pre_filter_limit,
                        offset: 0,
                    },
                )
                .await?;
            if results.is_empty() {
                continue;
            }

            let scores = self.score_candidates(query, &results, mode).await?;

            for (mut record, score) in results.into_iter().zip(scores) {
                // Summary records stand in for the directory they describe.
                let uri = node_uri_of(&record);
                let final_score = if current_score != 0.0 {
                    alpha * score + (1.0 - alpha) * current_score
                } else {
                    score
                };

                if uri.is_empty() || !passes_threshold(final_score) {
                    continue;
                }

                // Collect results that pass the threshold even when already
                // visited as a starting point; visited only prevents
                // re-entering directories for child search.
                if !collected_uris.contains(&uri) {
                    record.insert("uri".into(), Value::from(uri.clone()));
                    record.insert("_final_score".into(), Value::from(final_score));
                    collected_uris.insert(uri.clone());
                    collected.push(record.clone());
                }

                if !visited.contains(&uri) {
                    let level = record.get("level").and_then(Value::as_i64).unwrap_or(2);
                    if level == 2 {
                        visited.insert(uri);
                    } else {
                        heap.push(HeapEntry {
                            score: final_score,
                            seq,
                            uri,
                        });
                        seq += 1;
                    }
                }
            }

            // Convergence check over the current top-k.
            let current_topk = top_k_uris(&collected, limit);
            if current_topk == prev_topk && current_topk.len() >= limit {
                convergence_rounds += 1;
                if convergence_rounds >= Self::MAX_CONVERGENCE_ROUNDS {
                    break;
                }
            } else {
                convergence_rounds = 0;
                prev_topk = current_topk;
            }
        }

        collected.sort_by(|a, b| {
            final_score_of(b)
                .partial_cmp(&final_score_of(a))
                .unwrap_or(Ordering::Equal)
        });
        collected.truncate(limit);
        Ok(collected)
    }

    /// Blend semantic scores with hotness and attach related contexts.
    async fn convert_to_matched_contexts(
        &self,
        candidates: Vec<Record>,
        ctx: &RequestContext,
    ) -> Result<Vec<MatchedContext>> {
        let mut results = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let uri = candidate
                .get("uri")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            let mut relations = Vec::new();
            if let Some(provider) = self.relations.get() {
                let related_uris = provider.get_relations(&uri, ctx).await?;
                if !related_uris.is_empty() {
                    let related_uris: Vec<String> = related_uris
                        .into_iter()
                        .take(Self::MAX_RELATIONS)
                        .collect();
                    let abstracts = provider.read_abstracts(&related_uris, ctx).await?;
                    for related_uri in related_uris {
                        if let Some(abstract_text) = abstracts.get(&related_uri) {
                            if !abstract_text.is_empty() {
                                relations.push(RelatedContext {
                                    uri: related_uri,
                                    abstract_text: abstract_text.clone(),
                                });
                            }
                        }
                    }
                }
            }

            let semantic_score = final_score_of(&candidate);
            let updated_at = candidate
                .get("updated_at")
                .and_then(Value::as_str)
                .and_then(|raw| raw.parse().ok());
            let h_score = hotness_score(
                candidate.get("active_count").and_then(Value::as_i64).unwrap_or(0),
                updated_at,
            );
            let alpha = Self::HOTNESS_ALPHA;
            let final_score = (1.0 - alpha) * semantic_score + alpha * h_score;

            results.push(MatchedContext {
                uri,
                context_type: candidate
                    .get("context_type")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(ContextType::Resource),
                level: candidate
                    .get("level")
                    .and_then(Value::as_i64)
                    .and_then(|l| ContextLevel::from_i64(l).ok())
                    .unwrap_or(ContextLevel::Detail),
                abstract_text: candidate
                    .get("abstract")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                category: candidate
                    .get("category")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                score: final_score,
                relations,
            });
        }

        // Re-sort by blended score so the hotness boost can change ranking.
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        Ok(results)
    }
}

struct RecursiveSearchArgs<'a> {
    query: &'a str,
    ctx: &'a RequestContext,
    query_vector: Option<Vec<f32>>,
    sparse_query_vector: Option<HashMap<String, f32>>,
    starting_points: Vec<(String, f64)>,
    seed_candidates: Vec<(Record, f64)>,
    limit: usize,
    mode: RetrieverMode,
    threshold: f64,
    score_gte: bool,
    context_type: Option<String>,
    target_dirs: &'a [String],
    scope_dsl: Option<Value>,
}

/// The node URI a record represents: summary records (`.abstract.md`,
/// `.overview.md`) stand in for their directory.
fn node_uri_of(record: &Record) -> String {
    let uri = record
        .get("uri")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let level = record.get("level").and_then(Value::as_i64).unwrap_or(2);
    if level == 2 {
        return uri.to_string();
    }
    for suffix in ["/.abstract.md", "/.overview.md"] {
        if let Some(stripped) = uri.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    uri.to_string()
}

fn final_score_of(record: &Record) -> f64 {
    record
        .get("_final_score")
        .or_else(|| record.get("_score"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

fn top_k_uris(collected: &[Record], limit: usize) -> HashSet<String> {
    let mut sorted: Vec<&Record> = collected.iter().collect();
    sorted.sort_by(|a, b| {
        final_score_of(b)
            .partial_cmp(&final_score_of(a))
            .unwrap_or(Ordering::Equal)
    });
    sorted
        .into_iter()
        .take(limit)
        .filter_map(|r| r.get("uri").and_then(Value::as_str).map(String::from))
        .collect()
}

/// Max-heap entry keyed by score; ties pop in insertion order.
struct HeapEntry {
    score: f64,
    seq: u64,
    uri: String,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openviking_core::UserIdentifier;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Scripted storage: canned children per parent URI, call capture.
    struct ScriptedStorage {
        children: HashMap<String, Vec<Record>>,
        global: Vec<Record>,
        global_calls: Mutex<Vec<TenantSearch>>,
        child_calls: Mutex<Vec<(String, TenantSearch)>>,
    }

    impl ScriptedStorage {
        fn new() -> Self {
            Self {
                children: HashMap::new(),
                global: Vec::new(),
                global_calls: Mutex::new(Vec::new()),
                child_calls: Mutex::new(Vec::new()),
            }
        }

        fn with_children(mut self, parent: &str, children: Vec<Record>) -> Self {
            self.children.insert(parent.to_string(), children);
            self
        }

        fn with_global(mut self, hits: Vec<Record>) -> Self {
            self.global = hits;
            self
        }
    }

    #[async_trait]
    impl RetrieverStorage for ScriptedStorage {
        fn collection_name(&self) -> String {
            "context".to_string()
        }

        async fn collection_exists(&self) -> Result<bool> {
            Ok(true)
        }

        async fn search_global_roots(
            &self,
            _ctx: &RequestContext,
            search: TenantSearch,
        ) -> Result<Vec<Record>> {
            self.global_calls.lock().push(search);
            Ok(self.global.clone())
        }

        async fn search_children(
            &self,
            _ctx: &RequestContext,
            parent_uri: &str,
            search: TenantSearch,
        ) -> Result<Vec<Record>> {
            self.child_calls.lock().push((parent_uri.to_string(), search));
            Ok(self.children.get(parent_uri).cloned().unwrap_or_default())
        }
    }

    fn child(uri: &str, level: i64, score: f64) -> Record {
        json!({
            "id": uri,
            "uri": uri,
            "context_type": "resource",
            "level": level,
            "abstract": format!("about {uri}"),
            "_score": score,
            "active_count": 0,
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn user_ctx() -> RequestContext {
        RequestContext::new(UserIdentifier::new("acc1", "user1", "agent1"), Role::User)
    }

    fn retriever(storage: Arc<ScriptedStorage>) -> HierarchicalRetriever {
        HierarchicalRetriever::new(storage, None, None, None)
    }

    #[tokio::test]
    async fn test_honors_target_directories() {
        let target = "viking://resources/foo";
        let storage = Arc::new(ScriptedStorage::new());
        let retriever = retriever(storage.clone());

        let query = TypedQuery::new("test")
            .with_type(ContextType::Resource)
            .with_target(target);
        let result = retriever
            .retrieve(&query, &user_ctx(), 3, RetrieverMode::Thinking, None, false, None)
            .await
            .unwrap();

        assert_eq!(result.searched_directories, vec![target.to_string()]);

        let global_calls = storage.global_calls.lock();
        assert_eq!(global_calls.len(), 1);
        assert_eq!(global_calls[0].target_directories, vec![target.to_string()]);

        let child_calls = storage.child_calls.lock();
        assert!(!child_calls.is_empty());
        assert_eq!(child_calls[0].0, target);
        assert_eq!(child_calls[0].1.target_directories, vec![target.to_string()]);
    }

    #[tokio::test]
    async fn test_default_roots_for_user() {
        let storage = Arc::new(ScriptedStorage::new());
        let retriever = retriever(storage.clone());

        let result = retriever
            .retrieve(
                &TypedQuery::new("q"),
                &user_ctx(),
                3,
                RetrieverMode::Quick,
                None,
                false,
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            result.searched_directories,
            vec![
                "viking://user/user1/memories".to_string(),
                "viking://agent/agent1/memories".to_string(),
                "viking://resources".to_string(),
                "viking://agent/agent1/skills".to_string(),
            ]
        );

        // ROOT relies on global seeding only.
        let result = retriever
            .retrieve(
                &TypedQuery::new("q"),
                &RequestContext::root("acc1"),
                3,
                RetrieverMode::Quick,
                None,
                false,
                None,
            )
            .await
            .unwrap();
        assert!(result.searched_directories.is_empty());
    }

    #[tokio::test]
    async fn test_score_propagation_and_ranking() {
        let root = "viking://resources";
        let storage = Arc::new(
            ScriptedStorage::new()
                .with_children(
                    root,
                    vec![
                        child("viking://resources/docs", 1, 0.8),
                        child("viking://resources/top.md", 2, 0.6),
                    ],
                )
                .with_children(
                    "viking://resources/docs",
                    vec![child("viking://resources/docs/deep.md", 2, 1.0)],
                ),
        );
        let retriever = retriever(storage);

        let query = TypedQuery::new("q").with_type(ContextType::Resource);
        let result = retriever
            .retrieve(&query, &user_ctx(), 5, RetrieverMode::Quick, None, false, None)
            .await
            .unwrap();

        let by_uri: HashMap<&str, f64> = result
            .matched_contexts
            .iter()
            .map(|m| (m.uri.as_str(), m.score))
            .collect();

        // Root children keep their own score (no parent to propagate from);
        // deep.md gets alpha * 1.0 + (1 - alpha) * 0.8 = 0.9 before the
        // hotness blend scales everything by (1 - HOTNESS_ALPHA).
        let expected_docs = 0.8 * 0.8;
        let expected_deep = 0.9 * 0.8;
        assert!((by_uri["viking://resources/docs"] - expected_docs).abs() < 1e-9);
        assert!((by_uri["viking://resources/docs/deep.md"] - expected_deep).abs() < 1e-9);
        assert_eq!(result.matched_contexts[0].uri, "viking://resources/docs/deep.md");
    }

    #[tokio::test]
    async fn test_threshold_gte_vs_gt() {
        let root = "viking://resources";
        let make_storage = || {
            Arc::new(ScriptedStorage::new().with_children(
                root,
                vec![child("viking://resources/x.md", 2, 0.5)],
            ))
        };
        let query = TypedQuery::new("q").with_type(ContextType::Resource);

        // score == threshold with score_gte = true admits.
        let result = retriever(make_storage())
            .retrieve(&query, &user_ctx(), 3, RetrieverMode::Quick, Some(0.5), true, None)
            .await
            .unwrap();
        assert_eq!(result.matched_contexts.len(), 1);

        // score == threshold with score_gte = false rejects.
        let result = retriever(make_storage())
            .retrieve(&query, &user_ctx(), 3, RetrieverMode::Quick, Some(0.5), false, None)
            .await
            .unwrap();
        assert!(result.matched_contexts.is_empty());
    }

    #[tokio::test]
    async fn test_convergence_stops_on_stable_topk() {
        // An endless chain of directories below three strong leaves: the
        // top-3 stabilizes immediately, so expansion must stop after
        // MAX_CONVERGENCE_ROUNDS extra rounds instead of following the chain.
        let root = "viking://resources";
        let mut storage = ScriptedStorage::new().with_children(
            root,
            vec![
                child("viking://resources/a.md", 2, 0.9),
                child("viking://resources/b.md", 2, 0.8),
                child("viking://resources/c.md", 2, 0.7),
                child("viking://resources/chain0", 1, 0.2),
            ],
        );
        for i in 0..50 {
            storage = storage.with_children(
                &format!("viking://resources/chain{i}"),
                vec![child(&format!("viking://resources/chain{}", i + 1), 1, 0.2)],
            );
        }
        let storage = Arc::new(storage);
        let retriever = retriever(storage.clone());

        let query = TypedQuery::new("q").with_type(ContextType::Resource);
        let result = retriever
            .retrieve(&query, &user_ctx(), 3, RetrieverMode::Quick, None, false, None)
            .await
            .unwrap();

        assert_eq!(result.matched_contexts.len(), 3);
        let expansions = storage.child_calls.lock().len();
        assert!(
            expansions <= 1 + 1 + HierarchicalRetriever::MAX_CONVERGENCE_ROUNDS as usize,
            "expected bounded expansion, saw {expansions}"
        );
    }

    #[tokio::test]
    async fn test_hotness_breaks_semantic_ties() {
        let root = "viking://resources";
        let now = chrono::Utc::now().to_rfc3339();
        let old = (chrono::Utc::now() - chrono::Duration::days(30)).to_rfc3339();

        let mut hot = child("viking://resources/hot.md", 2, 0.8);
        hot.insert("active_count".into(), json!(100));
        hot.insert("updated_at".into(), json!(now));
        let mut cold = child("viking://resources/cold.md", 2, 0.8);
        cold.insert("active_count".into(), json!(0));
        cold.insert("updated_at".into(), json!(old));

        let storage = Arc::new(ScriptedStorage::new().with_children(root, vec![cold, hot]));
        let retriever = retriever(storage);

        let query = TypedQuery::new("q").with_type(ContextType::Resource);
        let result = retriever
            .retrieve(&query, &user_ctx(), 2, RetrieverMode::Quick, None, false, None)
            .await
            .unwrap();

        assert_eq!(result.matched_contexts.len(), 2);
        assert_eq!(result.matched_contexts[0].uri, "viking://resources/hot.md");
        assert!(result.matched_contexts[0].score > result.matched_contexts[1].score);
    }

    #[tokio::test]
    async fn test_global_seed_is_collected_as_node_uri() {
        // A level-0 summary hit stands in for its directory: the seed is a
        // result itself, reported under the node URI.
        let seed = child("viking://resources/guides/x.md/.abstract.md", 0, 0.7);
        let storage = Arc::new(ScriptedStorage::new().with_global(vec![seed]));
        let retriever = retriever(storage.clone());

        let query = TypedQuery::new("install").with_type(ContextType::Resource);
        let result = retriever
            .retrieve(&query, &user_ctx(), 3, RetrieverMode::Quick, None, false, None)
            .await
            .unwrap();

        assert_eq!(result.matched_contexts.len(), 1);
        assert_eq!(result.matched_contexts[0].uri, "viking://resources/guides/x.md");

        // The seed directory was expanded (not just collected).
        let expanded: Vec<String> =
            storage.child_calls.lock().iter().map(|(p, _)| p.clone()).collect();
        assert!(expanded.contains(&"viking://resources/guides/x.md".to_string()));
    }

    #[tokio::test]
    async fn test_dedup_collected_by_uri() {
        // The same leaf reachable from two directories is collected once.
        let root = "viking://resources";
        let shared = child("viking://resources/shared.md", 2, 0.9);
        let storage = Arc::new(
            ScriptedStorage::new()
                .with_children(
                    root,
                    vec![
                        child("viking://resources/d1", 1, 0.8),
                        child("viking://resources/d2", 1, 0.7),
                    ],
                )
                .with_children("viking://resources/d1", vec![shared.clone()])
                .with_children("viking://resources/d2", vec![shared]),
        );
        let retriever = retriever(storage);

        let query = TypedQuery::new("q").with_type(ContextType::Resource);
        let result = retriever
            .retrieve(&query, &user_ctx(), 10, RetrieverMode::Quick, None, false, None)
            .await
            .unwrap();

        let count = result
            .matched_contexts
            .iter()
            .filter(|m| m.uri == "viking://resources/shared.md")
            .count();
        assert_eq!(count, 1);
    }
}
