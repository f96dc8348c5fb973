//! Semantic DAG executor: post-order walk over a context subtree.
//!
//! Children complete before their parent. File summaries within a directory
//! run concurrently under the LLM semaphore; subdirectories recurse first so
//! a directory's overview can fold in its children's abstracts. A failed
//! node is counted and skipped; siblings continue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use openviking_core::context::{ABSTRACT_FILE, OVERVIEW_FILE};
use openviking_core::{ContextType, RequestContext, Result};
use openviking_vfs::VikingFS;

use crate::processor::{FileSummary, SemanticProcessor};

/// Progress counters for one DAG run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagStats {
    pub total_nodes: usize,
    pub pending_nodes: usize,
    pub in_progress_nodes: usize,
    pub done_nodes: usize,
    pub failed_nodes: usize,
}

#[derive(Default)]
struct StatsInner {
    total: AtomicUsize,
    in_progress: AtomicUsize,
    done: AtomicUsize,
    failed: AtomicUsize,
}

impl StatsInner {
    fn discovered(&self) {
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    fn started(&self) {
        self.in_progress.fetch_add(1, Ordering::SeqCst);
    }

    fn finished(&self, ok: bool) {
        self.in_progress.fetch_sub(1, Ordering::SeqCst);
        if ok {
            self.done.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn snapshot(&self) -> DagStats {
        let total = self.total.load(Ordering::SeqCst);
        let in_progress = self.in_progress.load(Ordering::SeqCst);
        let done = self.done.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        DagStats {
            total_nodes: total,
            pending_nodes: total.saturating_sub(in_progress + done + failed),
            in_progress_nodes: in_progress,
            done_nodes: done,
            failed_nodes: failed,
        }
    }
}

/// Walks a subtree post-order, producing summaries and embedding work.
pub struct SemanticDagExecutor {
    processor: Arc<dyn SemanticProcessor>,
    fs: Arc<VikingFS>,
    context_type: ContextType,
    llm_semaphore: Arc<Semaphore>,
    ctx: RequestContext,
    stats: Arc<StatsInner>,
}

impl SemanticDagExecutor {
    pub fn new(
        processor: Arc<dyn SemanticProcessor>,
        fs: Arc<VikingFS>,
        context_type: ContextType,
        max_concurrent_llm: usize,
        ctx: RequestContext,
    ) -> Self {
        Self {
            processor,
            fs,
            context_type,
            llm_semaphore: Arc::new(Semaphore::new(max_concurrent_llm.max(1))),
            ctx,
            stats: Arc::new(StatsInner::default()),
        }
    }

    pub fn get_stats(&self) -> DagStats {
        self.stats.snapshot()
    }

    /// Run the walk from `root_uri`. Node failures are counted in the stats
    /// rather than aborting the run.
    pub async fn run(&self, root_uri: &str) -> Result<DagStats> {
        self.stats.discovered();
        self.process_directory(root_uri.trim_end_matches('/').to_string())
            .await?;
        Ok(self.get_stats())
    }

    /// Process one directory: subdirectories first, then file summaries,
    /// then the directory's own overview/abstract. Returns the abstract for
    /// the parent's overview generation, or `None` when the node failed.
    fn process_directory(
        &self,
        dir_uri: String,
    ) -> futures::future::BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move {
            debug!("Processing directory {}", dir_uri);
            self.stats.started();

            let entries = match self.fs.ls(&dir_uri, false, Some(&self.ctx)).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Failed to list {}: {}", dir_uri, e);
                    self.stats.finished(false);
                    return Ok(None);
                }
            };

            let mut subdirs = Vec::new();
            let mut files = Vec::new();
            for entry in entries {
                self.stats.discovered();
                if entry.is_dir {
                    subdirs.push(format!("{dir_uri}/{}", entry.name));
                } else {
                    files.push(format!("{dir_uri}/{}", entry.name));
                }
            }

            // Subdirectories must complete before the current directory.
            let mut children_abstracts = Vec::new();
            for subdir in subdirs {
                if let Some(abstract_text) = self.process_directory(subdir).await? {
                    children_abstracts.push(abstract_text);
                }
            }

            // File summaries run concurrently under the LLM semaphore.
            let mut tasks: JoinSet<(String, Result<FileSummary>)> = JoinSet::new();
            for file_uri in files {
                let processor = self.processor.clone();
                let semaphore = self.llm_semaphore.clone();
                let ctx = self.ctx.clone();
                let stats = self.stats.clone();
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    stats.started();
                    let summary = processor.generate_file_summary(&file_uri, &ctx).await;
                    (file_uri, summary)
                });
            }

            let mut file_summaries = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                let Ok((file_uri, summary)) = joined else {
                    continue;
                };
                match summary {
                    Ok(summary) => {
                        let vectorized = self
                            .processor
                            .vectorize_file(&dir_uri, self.context_type, &file_uri, &summary, &self.ctx)
                            .await;
                        match vectorized {
                            Ok(()) => {
                                self.stats.finished(true);
                                file_summaries.push(summary);
                            }
                            Err(e) => {
                                warn!("Failed to vectorize file {}: {}", file_uri, e);
                                self.stats.finished(false);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Failed to summarize file {}: {}", file_uri, e);
                        self.stats.finished(false);
                    }
                }
            }

            // Directory step: overview, abstract, summary files, vectorize.
            let overview = match self
                .processor
                .generate_overview(&dir_uri, &file_summaries, &children_abstracts)
                .await
            {
                Ok(overview) => overview,
                Err(e) => {
                    warn!("Failed to generate overview for {}: {}", dir_uri, e);
                    self.stats.finished(false);
                    return Ok(None);
                }
            };
            let abstract_text = self.processor.extract_abstract(&overview);

            self.fs
                .write(
                    &format!("{dir_uri}/{ABSTRACT_FILE}"),
                    abstract_text.as_bytes(),
                    Some(&self.ctx),
                )
                .await?;
            self.fs
                .write(
                    &format!("{dir_uri}/{OVERVIEW_FILE}"),
                    overview.as_bytes(),
                    Some(&self.ctx),
                )
                .await?;

            match self
                .processor
                .vectorize_directory(&dir_uri, self.context_type, &abstract_text, &overview, &self.ctx)
                .await
            {
                Ok(()) => {
                    self.stats.finished(true);
                    Ok(Some(abstract_text))
                }
                Err(e) => {
                    warn!("Failed to vectorize directory {}: {}", dir_uri, e);
                    self.stats.finished(false);
                    Ok(None)
                }
            }
        })
    }
}
