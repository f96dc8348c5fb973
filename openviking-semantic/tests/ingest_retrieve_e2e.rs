//! End-to-end scenarios: ingest through the queues, then retrieve through
//! the hierarchical retriever, with rename and tenant-isolation checks.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openviking_core::config::VectorDbConfig;
use openviking_core::traits::{BlobStore, EmbedResult, Embedder, LanguageModel};
use openviking_core::{
    ContextNode, ContextType, RequestContext, Result, Role, UserIdentifier, stable_record_id,
};
use openviking_queue::{
    EMBEDDING_QUEUE, EmbeddingMsg, QueueManager, SEMANTIC_QUEUE, TextEmbeddingHandler,
};
use openviking_retrieval::HierarchicalRetriever;
use openviking_semantic::{LlmSemanticProcessor, SemanticTaskHandler};
use openviking_storage::{
    FilterExpr, MemoryBlobStore, VectorIndexBackend, context_collection,
};
use openviking_vfs::{VikingFS, WriteContextRequest};

const DIM: usize = 4;

/// Deterministic embedder: keyword indicator dimensions, token bag sparse.
struct KeywordEmbedder;

impl Embedder for KeywordEmbedder {
    fn embed(&self, text: &str) -> Result<EmbedResult> {
        let lower = text.to_lowercase();
        let mut dense = vec![0.05f32; DIM];
        if lower.contains("install") {
            dense[0] = 1.0;
        }
        if lower.contains("deploy") {
            dense[1] = 1.0;
        }
        if lower.contains("memory") || lower.contains("note") {
            dense[2] = 1.0;
        }
        let sparse: HashMap<String, f32> = lower
            .split_whitespace()
            .map(|t| (t.trim_matches(|c: char| !c.is_alphanumeric()).to_string(), 1.0))
            .filter(|(t, _)| !t.is_empty())
            .collect();
        Ok(EmbedResult {
            dense_vector: dense,
            sparse_vector: Some(sparse),
        })
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

/// Scripted LLM: JSON for file summaries, plain text for overviews.
struct ScriptedLlm;

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if prompt.starts_with("Summarize the following file") {
            Ok(json!({
                "name": "summary",
                "summary": "How to install the toolkit",
            })
            .to_string())
        } else {
            Ok("Install guides for the toolkit.\n\nCovers pip install steps.".to_string())
        }
    }
}

struct Harness {
    fs: Arc<VikingFS>,
    index: Arc<VectorIndexBackend>,
    queues: Arc<QueueManager>,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = VectorDbConfig::default();
    config.path = Some(dir.path().to_string_lossy().into_owned());
    config.sparse_weight = 0.3;

    let index = Arc::new(VectorIndexBackend::new(&config, DIM).unwrap());
    index
        .create_collection("context", context_collection("context", DIM))
        .await
        .unwrap();

    let blob: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let fs = Arc::new(VikingFS::new(blob.clone(), index.clone()));

    let embedder: Arc<dyn Embedder> = Arc::new(KeywordEmbedder);
    let queues = Arc::new(QueueManager::new(blob, Duration::from_millis(20)));
    let embedding_queue = queues
        .register_queue(
            EMBEDDING_QUEUE,
            Some(Arc::new(TextEmbeddingHandler::new(
                index.clone(),
                embedder.clone(),
            ))),
            10,
        )
        .await
        .unwrap();
    let processor = Arc::new(LlmSemanticProcessor::new(
        Arc::new(ScriptedLlm),
        fs.clone(),
        embedding_queue,
    ));
    queues
        .register_queue(
            SEMANTIC_QUEUE,
            Some(Arc::new(SemanticTaskHandler::new(processor, fs.clone(), 4))),
            1,
        )
        .await
        .unwrap();
    queues.start();

    fs.attach_queues(queues.clone());
    let retriever = Arc::new(HierarchicalRetriever::new(
        index.clone(),
        Some(embedder),
        None,
        None,
    ));
    fs.wire_retriever(retriever);

    Harness {
        fs,
        index,
        queues,
        _dir: dir,
    }
}

fn user_ctx(account: &str, user: &str, agent: &str) -> RequestContext {
    RequestContext::new(UserIdentifier::new(account, user, agent), Role::User)
}

async fn ingest_install_guide(h: &Harness, ctx: &RequestContext) {
    h.fs.write_context(
        WriteContextRequest {
            uri: "viking://resources/guides/x.md".into(),
            content: Some(b"Install: pip install ov".to_vec()),
            abstract_text: Some("Install instructions".into()),
            overview: Some("Brief install steps".into()),
            content_filename: None,
            is_leaf: false,
        },
        Some(ctx),
    )
    .await
    .unwrap();
    h.queues.wait_complete(Duration::from_secs(30)).await.unwrap();
}

#[tokio::test]
async fn test_ingest_and_retrieve_resource() {
    let h = harness().await;
    let ctx = user_ctx("acme", "u1", "a1");

    ingest_install_guide(&h, &ctx).await;

    // Three records landed: L0, L1, L2.
    assert_eq!(h.index.count(None).await.unwrap(), 3);

    let result = h
        .fs
        .find("How do I install?", Some("viking://resources"), 5, Some(&ctx))
        .await
        .unwrap();

    assert!(!result.matched_contexts.is_empty());
    let hit = result
        .matched_contexts
        .iter()
        .find(|m| m.uri == "viking://resources/guides/x.md")
        .expect("expected the ingested node in the results");
    assert!(hit.score > 0.0);

    h.queues.shutdown().await;
}

#[tokio::test]
async fn test_rename_preserves_embeddings() {
    let h = harness().await;
    let ctx = user_ctx("acme", "u1", "a1");
    ingest_install_guide(&h, &ctx).await;

    let before = h
        .index
        .filter(
            FilterExpr::eq("uri", "viking://resources/guides/x.md"),
            10,
            true,
        )
        .await
        .unwrap()
        .into_iter()
        .find(|r| r["uri"] == json!("viking://resources/guides/x.md"))
        .unwrap();
    let vector_before = before["vector"].clone();

    h.fs.mv(
        "viking://resources/guides/x.md",
        "viking://resources/guides/install.md",
        Some(&ctx),
    )
    .await
    .unwrap();

    // The new URI answers immediately; the old one is gone.
    let moved = h
        .index
        .filter(
            FilterExpr::eq("uri", "viking://resources/guides/install.md"),
            10,
            true,
        )
        .await
        .unwrap()
        .into_iter()
        .find(|r| r["uri"] == json!("viking://resources/guides/install.md"))
        .unwrap();
    assert_eq!(moved["vector"], vector_before);
    assert!(
        h.index
            .fetch_by_uri("viking://resources/guides/x.md")
            .await
            .unwrap()
            .is_none()
    );

    h.queues.shutdown().await;
}

#[tokio::test]
async fn test_tenant_isolation() {
    let h = harness().await;
    let ctx_a1 = user_ctx("a1", "space_u1", "space_a1");
    let ctx_a2 = user_ctx("a2", "space_u2", "space_a2");

    h.fs.write_context(
        WriteContextRequest {
            uri: "viking://user/space_u1/memories/notes/n.md".into(),
            content: Some(b"memory note about installs".to_vec()),
            abstract_text: Some("A memory note".into()),
            overview: Some("Notes".into()),
            content_filename: None,
            is_leaf: false,
        },
        Some(&ctx_a1),
    )
    .await
    .unwrap();
    h.queues.wait_complete(Duration::from_secs(30)).await.unwrap();

    // Foreign space: stat is rejected outright.
    let err = h
        .fs
        .stat("viking://user/space_u1/memories/notes/n.md", Some(&ctx_a2))
        .await
        .unwrap_err();
    assert!(err.is_permission_denied());

    // An untargeted find from the other account never sees a1's record.
    let result = h.fs.find("memory note", None, 10, Some(&ctx_a2)).await.unwrap();
    assert!(
        result
            .matched_contexts
            .iter()
            .all(|m| !m.uri.contains("space_u1")),
        "a2 must not see a1's memories"
    );

    // The owner can retrieve it.
    let result = h.fs.find("memory note", None, 10, Some(&ctx_a1)).await.unwrap();
    assert!(
        result
            .matched_contexts
            .iter()
            .any(|m| m.uri == "viking://user/space_u1/memories/notes/n.md")
    );

    h.queues.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_embedding_drain() {
    let h = harness().await;
    let queue = h.queues.get_queue(EMBEDDING_QUEUE).unwrap();

    let count_before = h.index.count(None).await.unwrap();
    for i in 0..50 {
        let mut node = ContextNode::new(
            format!("viking://resources/bulk/{i}.md"),
            ContextType::Resource,
        );
        node.account_id = "acme".into();
        node.abstract_text = format!("bulk document {i}");
        let msg = EmbeddingMsg::from_context(node, &format!("install document {i}")).unwrap();
        queue.enqueue(serde_json::to_value(&msg).unwrap()).await.unwrap();
    }

    h.queues.wait_complete(Duration::from_secs(30)).await.unwrap();

    let status = queue.get_status().await.unwrap();
    assert_eq!(status.processed_total, 50);
    assert_eq!(status.error_count, 0);
    assert_eq!(h.index.count(None).await.unwrap(), count_before + 50);

    // Stable ids keep a re-drain idempotent on the index.
    let expected = stable_record_id("acme", "viking://resources/bulk/0.md");
    assert!(h.index.exists(&expected).await.unwrap());

    h.queues.shutdown().await;
}

#[tokio::test]
async fn test_semantic_dag_ingests_tree() {
    let h = harness().await;
    let ctx = user_ctx("acme", "u1", "a1");

    h.fs.write(
        "viking://resources/kb/setup/install.md",
        b"pip install toolkit",
        Some(&ctx),
    )
    .await
    .unwrap();
    h.fs.write(
        "viking://resources/kb/setup/deploy.md",
        b"deploy with docker",
        Some(&ctx),
    )
    .await
    .unwrap();

    h.fs.enqueue_semantic_task("viking://resources/kb", ContextType::Resource, Some(&ctx))
        .await
        .unwrap()
        .expect("semantic queue should be attached");
    h.queues.wait_complete(Duration::from_secs(30)).await.unwrap();

    // The DAG wrote the summary files.
    let abstract_text = h
        .fs
        .abstract_of("viking://resources/kb/setup", Some(&ctx))
        .await
        .unwrap();
    assert!(!abstract_text.is_empty());

    // Level-2 records for the files, level-0/1 for each directory.
    for uri in [
        "viking://resources/kb/setup/install.md",
        "viking://resources/kb/setup/deploy.md",
        "viking://resources/kb/setup/.abstract.md",
        "viking://resources/kb/setup/.overview.md",
        "viking://resources/kb/.abstract.md",
    ] {
        let records = h
            .index
            .filter(FilterExpr::eq("uri", uri), 10, false)
            .await
            .unwrap();
        assert!(
            records.iter().any(|r| r["uri"] == json!(uri)),
            "missing record for {uri}"
        );
    }

    // And the tree answers hierarchical retrieval.
    let result = h
        .fs
        .find("how to install", Some("viking://resources/kb"), 5, Some(&ctx))
        .await
        .unwrap();
    assert!(!result.matched_contexts.is_empty());

    h.queues.shutdown().await;
}
