//! Typed query and result shapes for hierarchical retrieval.

use serde::{Deserialize, Serialize};

use openviking_core::{ContextLevel, ContextType};

/// Retrieval mode. Thinking consults the reranker when one is configured;
/// Quick sticks to vector scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieverMode {
    Thinking,
    Quick,
}

/// A query with optional type and directory scoping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedQuery {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_type: Option<ContextType>,
    #[serde(default)]
    pub target_directories: Vec<String>,
    #[serde(default)]
    pub intent: String,
}

impl TypedQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            context_type: None,
            target_directories: Vec::new(),
            intent: String::new(),
        }
    }

    pub fn with_type(mut self, context_type: ContextType) -> Self {
        self.context_type = Some(context_type);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_directories.push(target.into());
        self
    }
}

/// A related context attached to a result via the relation table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedContext {
    pub uri: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
}

/// One retrieval hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedContext {
    pub uri: String,
    pub context_type: ContextType,
    pub level: ContextLevel,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub category: String,
    pub score: f64,
    #[serde(default)]
    pub relations: Vec<RelatedContext>,
}

/// Full retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: TypedQuery,
    pub matched_contexts: Vec<MatchedContext>,
    pub searched_directories: Vec<String>,
}
