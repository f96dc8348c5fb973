//! Local backend collection adapter.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use openviking_core::config::VectorDbConfig;
use openviking_core::{Result, VikingError};

use crate::local::LocalCollectionStore;

use super::{CollectionAdapter, Record, SearchRequest};

/// Adapter for the embedded on-disk vector store.
pub struct LocalCollectionAdapter {
    collection_name: String,
    project_path: PathBuf,
    store: RwLock<Option<Arc<LocalCollectionStore>>>,
}

impl LocalCollectionAdapter {
    /// Project directory name under the configured storage path.
    pub const DEFAULT_LOCAL_PROJECT_NAME: &'static str = "vectordb";

    pub fn from_config(config: &VectorDbConfig) -> Result<Self> {
        let path = config
            .path
            .as_deref()
            .ok_or_else(|| VikingError::invalid_argument("local backend requires a storage path"))?;
        Ok(Self {
            collection_name: config.name.clone(),
            project_path: PathBuf::from(path).join(Self::DEFAULT_LOCAL_PROJECT_NAME),
            store: RwLock::new(None),
        })
    }

    fn collection_path(&self) -> PathBuf {
        self.project_path.join(&self.collection_name)
    }

    /// Load the existing collection handle when possible.
    async fn load_existing(&self) -> Result<Option<Arc<LocalCollectionStore>>> {
        if let Some(store) = self.store.read().await.as_ref() {
            return Ok(Some(store.clone()));
        }
        let mut guard = self.store.write().await;
        if let Some(store) = guard.as_ref() {
            return Ok(Some(store.clone()));
        }
        if let Some(store) = LocalCollectionStore::open(&self.collection_path()).await? {
            let store = Arc::new(store);
            *guard = Some(store.clone());
            return Ok(Some(store));
        }
        Ok(None)
    }

    async fn store(&self) -> Result<Arc<LocalCollectionStore>> {
        self.load_existing()
            .await?
            .ok_or_else(|| VikingError::collection_not_found(self.collection_name.clone()))
    }
}

#[async_trait]
impl CollectionAdapter for LocalCollectionAdapter {
    fn mode(&self) -> &'static str {
        "local"
    }

    fn collection_name(&self) -> String {
        self.collection_name.clone()
    }

    async fn collection_exists(&self) -> Result<bool> {
        Ok(self.load_existing().await?.is_some())
    }

    async fn create_backend_collection(&self, meta: Value) -> Result<()> {
        let store = LocalCollectionStore::create(&self.collection_path(), meta).await?;
        *self.store.write().await = Some(Arc::new(store));
        Ok(())
    }

    async fn create_index(&self, index_name: &str, index_meta: Value) -> Result<()> {
        self.store().await?.create_index(index_name, index_meta).await
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        Ok(self.store().await?.list_indexes())
    }

    async fn drop_index(&self, index_name: &str) -> Result<()> {
        self.store().await?.drop_index(index_name).await
    }

    async fn drop_backend_collection(&self) -> Result<bool> {
        let store = self.store().await?;
        LocalCollectionStore::drop(&store).await?;
        *self.store.write().await = None;
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        *self.store.write().await = None;
        Ok(())
    }

    async fn get_collection_info(&self) -> Result<Option<Value>> {
        Ok(self.load_existing().await?.map(|store| store.meta_data()))
    }

    async fn raw_upsert(&self, records: Vec<Record>) -> Result<()> {
        self.store().await?.upsert(records).await
    }

    async fn raw_fetch(&self, ids: &[String]) -> Result<Vec<Record>> {
        Ok(self.store().await?.fetch(ids))
    }

    async fn raw_search(&self, request: SearchRequest) -> Result<Vec<Record>> {
        Ok(self.store().await?.search(&request))
    }

    async fn raw_delete(&self, ids: &[String]) -> Result<()> {
        self.store().await?.delete(ids).await
    }

    async fn raw_count(&self, filter_dsl: Value) -> Result<i64> {
        Ok(self.store().await?.count(&filter_dsl))
    }

    async fn raw_clear(&self) -> Result<()> {
        self.store().await?.clear().await
    }
}
