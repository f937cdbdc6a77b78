use crate::domain::ports::{MediaCategory, MediaStore};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keeps uploaded blobs in memory under `memory://<category>/<n>` URLs.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMediaStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, url: &str) -> Option<Vec<u8>> {
        self.blobs.read().await.get(url).cloned()
    }
}

#[async_trait]
impl MediaStore for InMemoryMediaStore {
    async fn store(&self, bytes: Vec<u8>, category: MediaCategory) -> Result<String> {
        if bytes.is_empty() {
            return Err(PipelineError::ValidationError(
                "Upload must not be empty".to_string(),
            ));
        }
        let mut blobs = self.blobs.write().await;
        let url = format!("memory://{}/{}", category.as_str(), blobs.len() + 1);
        blobs.insert(url.clone(), bytes);
        Ok(url)
    }
}
