//! Embedded on-disk collection used by the local backend.
//!
//! A collection lives at `{project}/{collection}` with two files:
//! `collection_meta.json` (schema + indexes) and `data.json` (records keyed
//! by id). The collection exists iff `collection_meta.json` exists. All
//! scoring and filter evaluation happens in-process.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use openviking_core::{Result, VikingError};

use crate::adapters::{Record, SearchMode, SearchRequest};
use crate::eval::matches_filter;

const META_FILE: &str = "collection_meta.json";
const DATA_FILE: &str = "data.json";

/// In-process vector collection persisted as JSON files.
pub struct LocalCollectionStore {
    path: PathBuf,
    meta: RwLock<Value>,
    records: DashMap<String, Value>,
    /// Serializes data-file persistence.
    persist_lock: Mutex<()>,
}

impl LocalCollectionStore {
    /// Open an existing collection. `None` when the meta file is absent.
    pub async fn open(path: &Path) -> Result<Option<Self>> {
        let meta_path = path.join(META_FILE);
        if !meta_path.exists() {
            return Ok(None);
        }
        let meta: Value = serde_json::from_str(&tokio::fs::read_to_string(&meta_path).await?)?;

        let records = DashMap::new();
        let data_path = path.join(DATA_FILE);
        if data_path.exists() {
            let data: HashMap<String, Value> =
                serde_json::from_str(&tokio::fs::read_to_string(&data_path).await?)?;
            for (id, record) in data {
                records.insert(id, record);
            }
        }

        Ok(Some(Self {
            path: path.to_path_buf(),
            meta: RwLock::new(meta),
            records,
            persist_lock: Mutex::new(()),
        }))
    }

    /// Create a fresh collection directory with the given metadata.
    pub async fn create(path: &Path, meta: Value) -> Result<Self> {
        tokio::fs::create_dir_all(path).await?;
        let store = Self {
            path: path.to_path_buf(),
            meta: RwLock::new(meta),
            records: DashMap::new(),
            persist_lock: Mutex::new(()),
        };
        store.persist_meta().await?;
        store.persist_data().await?;
        Ok(store)
    }

    pub fn meta_data(&self) -> Value {
        self.meta.read().clone()
    }

    /// Register an index in the collection metadata.
    pub async fn create_index(&self, index_name: &str, index_meta: Value) -> Result<()> {
        {
            let mut meta = self.meta.write();
            let indexes = meta
                .as_object_mut()
                .ok_or_else(|| VikingError::schema("collection meta must be an object"))?
                .entry("Indexes")
                .or_insert_with(|| json!({}));
            indexes[index_name] = index_meta;
        }
        self.persist_meta().await
    }

    pub fn list_indexes(&self) -> Vec<String> {
        self.meta
            .read()
            .get("Indexes")
            .and_then(Value::as_object)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn drop_index(&self, index_name: &str) -> Result<()> {
        {
            let mut meta = self.meta.write();
            if let Some(indexes) = meta.get_mut("Indexes").and_then(Value::as_object_mut) {
                indexes.remove(index_name);
            }
        }
        self.persist_meta().await
    }

    /// Remove the entire collection directory.
    pub async fn drop(&self) -> Result<()> {
        self.records.clear();
        if self.path.exists() {
            tokio::fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    pub async fn upsert(&self, records: Vec<Record>) -> Result<()> {
        for record in records {
            let id = record
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| VikingError::schema("record missing id"))?
                .to_string();
            self.records.insert(id, Value::Object(record));
        }
        self.persist_data().await
    }

    pub fn fetch(&self, ids: &[String]) -> Vec<Record> {
        ids.iter()
            .filter_map(|id| self.records.get(id))
            .filter_map(|entry| entry.value().as_object().cloned())
            .collect()
    }

    pub async fn delete(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            self.records.remove(id);
        }
        self.persist_data().await
    }

    pub async fn clear(&self) -> Result<()> {
        self.records.clear();
        self.persist_data().await
    }

    pub fn count(&self, filter_dsl: &Value) -> i64 {
        self.records
            .iter()
            .filter(|entry| matches_filter(entry.value(), filter_dsl))
            .count() as i64
    }

    /// Execute a search request against the in-memory records.
    pub fn search(&self, request: &SearchRequest) -> Vec<Record> {
        let mut hits: Vec<(f64, Record)> = self
            .records
            .iter()
            .filter(|entry| matches_filter(entry.value(), &request.filter_dsl))
            .filter_map(|entry| {
                let record = entry.value().as_object()?.clone();
                let score = match &request.mode {
                    SearchMode::Vector => self.score_record(&record, request),
                    _ => 0.0,
                };
                Some((score, record))
            })
            .collect();

        match &request.mode {
            SearchMode::Vector => {
                hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            }
            SearchMode::Scalar { field, desc } => {
                hits.sort_by(|a, b| {
                    let ordering = compare_scalar(a.1.get(field), b.1.get(field));
                    if *desc { ordering.reverse() } else { ordering }
                });
            }
            SearchMode::Random => {
                // Stable order so offset pagination is well-defined.
                hits.sort_by(|a, b| compare_scalar(a.1.get("id"), b.1.get("id")));
            }
        }

        debug!(
            "Local search matched {} records (mode {:?})",
            hits.len(),
            request.mode
        );

        hits.into_iter()
            .skip(request.offset)
            .take(request.limit)
            .map(|(score, mut record)| {
                record.insert("_score".into(), json!(score));
                if let Some(fields) = &request.output_fields {
                    record.retain(|k, _| {
                        k == "id" || k == "_score" || fields.iter().any(|f| f == k)
                    });
                }
                record
            })
            .collect()
    }

    fn score_record(&self, record: &Record, request: &SearchRequest) -> f64 {
        let dense = match (&request.dense_vector, record.get("vector")) {
            (Some(query), Some(stored)) => {
                let stored: Vec<f32> = stored
                    .as_array()
                    .map(|a| a.iter().filter_map(Value::as_f64).map(|v| v as f32).collect())
                    .unwrap_or_default();
                Some(cosine_similarity(query, &stored))
            }
            _ => None,
        };

        let sparse = match (&request.sparse_vector, record.get("sparse_vector")) {
            (Some(query), Some(stored)) => stored.as_object().map(|stored| {
                query
                    .iter()
                    .filter_map(|(token, weight)| {
                        stored
                            .get(token)
                            .and_then(Value::as_f64)
                            .map(|w| w * (*weight as f64))
                    })
                    .sum::<f64>()
            }),
            _ => None,
        };

        match (dense, sparse) {
            (Some(dense), Some(sparse)) => {
                let alpha = self.sparse_alpha();
                (1.0 - alpha) * dense + alpha * sparse
            }
            (Some(dense), None) => dense,
            (None, Some(sparse)) => sparse,
            (None, None) => 0.0,
        }
    }

    /// Sparse blend weight from the default index metadata.
    fn sparse_alpha(&self) -> f64 {
        self.meta
            .read()
            .pointer("/Indexes/default/VectorIndex/SearchWithSparseLogitAlpha")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    async fn persist_meta(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let payload = serde_json::to_string_pretty(&*self.meta.read())?;
        tokio::fs::create_dir_all(&self.path).await?;
        tokio::fs::write(self.path.join(META_FILE), payload).await?;
        Ok(())
    }

    async fn persist_data(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let data: Map<String, Value> = self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        tokio::fs::write(
            self.path.join(DATA_FILE),
            serde_json::to_string(&Value::Object(data))?,
        )
        .await?;
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn compare_scalar(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(a), Some(b)) => {
            if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
                a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
            } else if let (Some(a), Some(b)) = (a.as_str(), b.as_str()) {
                a.cmp(b)
            } else {
                std::cmp::Ordering::Equal
            }
        }
        (Some(_), None) => std::cmp::Ordering::Greater,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (None, None) => std::cmp::Ordering::Equal,
    }
}
