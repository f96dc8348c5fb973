//! Context node types: the unit stored in the vector index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::VikingError;

/// File name of the level-0 directory summary.
pub const ABSTRACT_FILE: &str = ".abstract.md";
/// File name of the level-1 directory summary.
pub const OVERVIEW_FILE: &str = ".overview.md";

/// Broad category of a context node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    Resource,
    Memory,
    Skill,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::Resource => "resource",
            ContextType::Memory => "memory",
            ContextType::Skill => "skill",
        }
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextType {
    type Err = VikingError;

    fn from_str(s: &str) -> Result<Self, VikingError> {
        match s {
            "resource" => Ok(ContextType::Resource),
            "memory" => Ok(ContextType::Memory),
            "skill" => Ok(ContextType::Skill),
            other => Err(VikingError::invalid_argument(format!(
                "unknown context type: {other}"
            ))),
        }
    }
}

/// Summary level of a context node.
///
/// The integer encoding (0/1/2) is the only persisted form; legacy string
/// forms (`l0`/`l1`/`l2`) are accepted on parse but never produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextLevel {
    /// L0: the `.abstract.md` summary of a directory.
    Abstract,
    /// L1: the `.overview.md` description of a directory.
    Overview,
    /// L2: the actual content of a leaf node.
    Detail,
}

impl ContextLevel {
    pub fn as_i64(&self) -> i64 {
        match self {
            ContextLevel::Abstract => 0,
            ContextLevel::Overview => 1,
            ContextLevel::Detail => 2,
        }
    }

    pub fn from_i64(value: i64) -> Result<Self, VikingError> {
        match value {
            0 => Ok(ContextLevel::Abstract),
            1 => Ok(ContextLevel::Overview),
            2 => Ok(ContextLevel::Detail),
            other => Err(VikingError::invalid_argument(format!(
                "unknown context level: {other}"
            ))),
        }
    }

    /// Derive the level from a node URI by its summary-file suffix.
    pub fn for_uri(uri: &str) -> Self {
        if uri.ends_with(&format!("/{ABSTRACT_FILE}")) {
            ContextLevel::Abstract
        } else if uri.ends_with(&format!("/{OVERVIEW_FILE}")) {
            ContextLevel::Overview
        } else {
            ContextLevel::Detail
        }
    }
}

impl Serialize for ContextLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

impl<'de> Deserialize<'de> for ContextLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Int(i64),
            Str(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Int(value) => ContextLevel::from_i64(value).map_err(serde::de::Error::custom),
            Repr::Str(value) => match value.as_str() {
                "l0" | "0" | "abstract" => Ok(ContextLevel::Abstract),
                "l1" | "1" | "overview" => Ok(ContextLevel::Overview),
                "l2" | "2" | "detail" => Ok(ContextLevel::Detail),
                other => Err(serde::de::Error::custom(format!(
                    "unknown context level: {other}"
                ))),
            },
        }
    }
}

/// One indexed record representing a URI at a given level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub uri: String,
    #[serde(default)]
    pub parent_uri: String,
    pub context_type: ContextType,
    #[serde(default = "default_level")]
    pub level: ContextLevel,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub category: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse_vector: Option<HashMap<String, f32>>,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub owner_space: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active_count: i64,
}

fn default_level() -> ContextLevel {
    ContextLevel::Detail
}

impl ContextNode {
    /// Create a node with the given URI and type; remaining fields default.
    pub fn new(uri: impl Into<String>, context_type: ContextType) -> Self {
        let uri = uri.into();
        let now = Utc::now();
        Self {
            id: None,
            parent_uri: crate::uri::parent_uri_str(&uri),
            level: ContextLevel::for_uri(&uri),
            uri,
            context_type,
            name: String::new(),
            description: String::new(),
            tags: String::new(),
            category: String::new(),
            abstract_text: String::new(),
            vector: None,
            sparse_vector: None,
            account_id: String::new(),
            owner_space: String::new(),
            created_at: Some(now),
            updated_at: Some(now),
            active_count: 0,
        }
    }
}

/// Stable record id enforcing at most one vector record per `(account, uri)`.
pub fn stable_record_id(account_id: &str, uri: &str) -> String {
    format!("{:x}", md5::compute(format!("{account_id}:{uri}")))
}
