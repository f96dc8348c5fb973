//! Semantic processors: LLM-backed summarization plus the handler that
//! drives DAG runs from the semantic queue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use openviking_core::context::{ABSTRACT_FILE, OVERVIEW_FILE};
use openviking_core::uri::parent_uri_str;
use openviking_core::{
    ContextNode, ContextType, LanguageModel, RequestContext, Result, VikingError, VikingUri,
};
use openviking_queue::{DequeueHandler, EmbeddingMsg, NamedQueue};
use openviking_vfs::VikingFS;

use crate::dag::SemanticDagExecutor;

/// Maximum characters of file content handed to the LLM.
const MAX_FILE_CHARS: usize = 8_000;
/// Maximum characters kept for a directory abstract.
const MAX_ABSTRACT_CHARS: usize = 300;

/// Structured summary of one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSummary {
    pub name: String,
    pub summary: String,
}

/// The per-node steps of the semantic DAG.
#[async_trait]
pub trait SemanticProcessor: Send + Sync {
    /// Summarize one file into a structured `{name, summary}`.
    async fn generate_file_summary(
        &self,
        file_uri: &str,
        ctx: &RequestContext,
    ) -> Result<FileSummary>;

    /// Generate a directory overview from its file summaries and the
    /// abstracts of its completed subdirectories.
    async fn generate_overview(
        &self,
        dir_uri: &str,
        file_summaries: &[FileSummary],
        children_abstracts: &[String],
    ) -> Result<String>;

    /// Derive the short abstract from an overview.
    fn extract_abstract(&self, overview: &str) -> String;

    /// Enqueue the level-0/level-1 embedding work for a directory.
    async fn vectorize_directory(
        &self,
        uri: &str,
        context_type: ContextType,
        abstract_text: &str,
        overview: &str,
        ctx: &RequestContext,
    ) -> Result<()>;

    /// Enqueue the level-2 embedding work for a file.
    async fn vectorize_file(
        &self,
        parent_uri: &str,
        context_type: ContextType,
        file_uri: &str,
        summary: &FileSummary,
        ctx: &RequestContext,
    ) -> Result<()>;
}

/// LLM-backed semantic processor feeding the embedding queue.
pub struct LlmSemanticProcessor {
    llm: Arc<dyn LanguageModel>,
    fs: Arc<VikingFS>,
    embedding_queue: Arc<NamedQueue>,
}

impl LlmSemanticProcessor {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        fs: Arc<VikingFS>,
        embedding_queue: Arc<NamedQueue>,
    ) -> Self {
        Self {
            llm,
            fs,
            embedding_queue,
        }
    }

    async fn enqueue(&self, node: ContextNode, text: &str) -> Result<()> {
        if let Some(msg) = EmbeddingMsg::from_context(node, text) {
            self.embedding_queue
                .enqueue(serde_json::to_value(&msg)?)
                .await?;
        }
        Ok(())
    }

    fn node_for(
        uri: &str,
        parent_uri: &str,
        name: &str,
        context_type: ContextType,
        abstract_text: &str,
        ctx: &RequestContext,
    ) -> ContextNode {
        let mut node = ContextNode::new(uri, context_type);
        node.parent_uri = parent_uri.to_string();
        node.name = name.to_string();
        node.abstract_text = abstract_text.to_string();
        node.account_id = ctx.account_id().to_string();
        node.owner_space = VikingUri::parse(uri)
            .ok()
            .and_then(|u| u.space().map(String::from))
            .unwrap_or_default();
        node
    }
}

/// Extract the first JSON object from an LLM response, tolerating code
/// fences and prose around it.
fn parse_json_response(response: &str) -> Result<Value> {
    let trimmed = response.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            return Ok(serde_json::from_str(&trimmed[start..=end])?);
        }
    }
    Err(VikingError::invalid_argument(format!(
        "LLM response is not JSON: {trimmed:.80}"
    )))
}

#[async_trait]
impl SemanticProcessor for LlmSemanticProcessor {
    async fn generate_file_summary(
        &self,
        file_uri: &str,
        ctx: &RequestContext,
    ) -> Result<FileSummary> {
        let mut content = self.fs.read_text(file_uri, Some(ctx)).await?;
        if content.len() > MAX_FILE_CHARS {
            let mut end = MAX_FILE_CHARS;
            while end > 0 && !content.is_char_boundary(end) {
                end -= 1;
            }
            content.truncate(end);
        }

        let prompt = format!(
            "Summarize the following file for a retrieval index. Respond with \
             a JSON object {{\"name\": \"short display name\", \"summary\": \
             \"one-paragraph summary\"}} and nothing else.\n\nFile: {file_uri}\n\n{content}"
        );
        let response = self.llm.complete(&prompt).await?;
        let parsed = parse_json_response(&response)?;
        let summary: FileSummary = serde_json::from_value(parsed)?;
        debug!("Summarized {} as {}", file_uri, summary.name);
        Ok(summary)
    }

    async fn generate_overview(
        &self,
        dir_uri: &str,
        file_summaries: &[FileSummary],
        children_abstracts: &[String],
    ) -> Result<String> {
        let mut sections = String::new();
        for summary in file_summaries {
            sections.push_str(&format!("- {}: {}\n", summary.name, summary.summary));
        }
        for abstract_text in children_abstracts {
            sections.push_str(&format!("- (subdirectory) {abstract_text}\n"));
        }

        let prompt = format!(
            "Write a concise overview of the directory {dir_uri} from the \
             summaries of its contents. Start with a one-sentence abstract \
             paragraph, then elaborate.\n\nContents:\n{sections}"
        );
        self.llm.complete(&prompt).await
    }

    fn extract_abstract(&self, overview: &str) -> String {
        let first_paragraph = overview
            .split("\n\n")
            .map(str::trim)
            .find(|p| !p.is_empty())
            .unwrap_or("");
        let mut abstract_text = first_paragraph.to_string();
        if abstract_text.len() > MAX_ABSTRACT_CHARS {
            let mut end = MAX_ABSTRACT_CHARS;
            while end > 0 && !abstract_text.is_char_boundary(end) {
                end -= 1;
            }
            abstract_text.truncate(end);
        }
        abstract_text
    }

    async fn vectorize_directory(
        &self,
        uri: &str,
        context_type: ContextType,
        abstract_text: &str,
        overview: &str,
        ctx: &RequestContext,
    ) -> Result<()> {
        let parent = parent_uri_str(uri);
        let name = uri.rsplit('/').next().unwrap_or_default();

        // Summary records carry the directory's parent so the directory
        // lists as a child of it during hierarchical descent.
        let l0 = Self::node_for(
            &format!("{uri}/{ABSTRACT_FILE}"),
            &parent,
            name,
            context_type,
            abstract_text,
            ctx,
        );
        self.enqueue(l0, abstract_text).await?;

        let l1 = Self::node_for(
            &format!("{uri}/{OVERVIEW_FILE}"),
            &parent,
            name,
            context_type,
            abstract_text,
            ctx,
        );
        self.enqueue(l1, overview).await
    }

    async fn vectorize_file(
        &self,
        parent_uri: &str,
        context_type: ContextType,
        file_uri: &str,
        summary: &FileSummary,
        ctx: &RequestContext,
    ) -> Result<()> {
        let node = Self::node_for(
            file_uri,
            parent_uri,
            &summary.name,
            context_type,
            &summary.summary,
            ctx,
        );
        self.enqueue(node, &summary.summary).await
    }
}

/// Payload of one semantic queue message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticTaskMsg {
    pub root_uri: String,
    pub context_type: ContextType,
    pub ctx: RequestContext,
}

/// Semantic queue handler: one DAG run per message. The queue itself is
/// serial; concurrency lives inside the executor's LLM semaphore.
pub struct SemanticTaskHandler {
    processor: Arc<dyn SemanticProcessor>,
    fs: Arc<VikingFS>,
    max_concurrent_llm: usize,
}

impl SemanticTaskHandler {
    pub fn new(
        processor: Arc<dyn SemanticProcessor>,
        fs: Arc<VikingFS>,
        max_concurrent_llm: usize,
    ) -> Self {
        Self {
            processor,
            fs,
            max_concurrent_llm,
        }
    }
}

#[async_trait]
impl DequeueHandler for SemanticTaskHandler {
    async fn on_dequeue(&self, envelope: Value) -> Result<()> {
        let payload = envelope.get("data").cloned().unwrap_or(envelope);
        let task: SemanticTaskMsg = serde_json::from_value(payload)?;

        let executor = SemanticDagExecutor::new(
            self.processor.clone(),
            self.fs.clone(),
            task.context_type,
            self.max_concurrent_llm,
            task.ctx,
        );
        let stats = executor.run(&task.root_uri).await?;
        info!(
            "Semantic DAG for {} finished: {} done, {} failed",
            task.root_uri, stats.done_nodes, stats.failed_nodes
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_response_fenced() {
        let fenced = "```json\n{\"name\": \"n\", \"summary\": \"s\"}\n```";
        let parsed = parse_json_response(fenced).unwrap();
        assert_eq!(parsed["name"], "n");

        let prose = "Here you go: {\"name\": \"n\", \"summary\": \"s\"} hope it helps";
        let parsed = parse_json_response(prose).unwrap();
        assert_eq!(parsed["summary"], "s");

        assert!(parse_json_response("no json here").is_err());
    }

    #[test]
    fn test_extract_abstract_logic() {
        // Free function behavior is on the trait impl; use a tiny stand-in.
        let overview = "First paragraph abstract.\n\nSecond paragraph detail.";
        let first = overview
            .split("\n\n")
            .map(str::trim)
            .find(|p| !p.is_empty())
            .unwrap();
        assert_eq!(first, "First paragraph abstract.");
    }
}
