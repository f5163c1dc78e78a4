use crate::config::AppConfig;
use crate::models::UploadedFile;
use crate::services::disk_store::DiskStore;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable record of uploaded files.
///
/// `save` may be called concurrently from many request tasks; each
/// implementation guards its own state. A batch becomes visible all at
/// once or not at all.
#[async_trait]
pub trait Store: Send + Sync {
    /// Prepare the backend before the server accepts requests
    async fn init(&self) -> Result<(), StoreError>;

    /// Persist one request's files as a single batch
    async fn save(&self, files: &[UploadedFile]) -> Result<(), StoreError>;
}

/// In-memory store, mostly for tests and debug deployments
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Vec<UploadedFile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every file saved so far, in save order
    pub fn saved_files(&self) -> Vec<UploadedFile> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save(&self, files: &[UploadedFile]) -> Result<(), StoreError> {
        let mut saved = self
            .saved
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        saved.extend_from_slice(files);
        Ok(())
    }
}

/// Factory function to create the configured store backend
pub fn create_store(config: &AppConfig) -> Result<Box<dyn Store>, StoreError> {
    match config.store_backend.as_str() {
        "memory" => Ok(Box::new(MemoryStore::new())),
        "disk" => Ok(Box::new(DiskStore::new(config.store_dir.clone()))),
        other => Err(StoreError::Unavailable(format!(
            "unknown store backend '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UploadInfo;
    use bytes::Bytes;
    use chrono::Utc;
    use std::sync::Arc;

    fn file(name: &str, contents: &'static [u8]) -> UploadedFile {
        UploadedFile {
            name: name.to_string(),
            contents: Bytes::from_static(contents),
            upload: UploadInfo {
                time: Utc::now(),
                client_agent: "test-agent".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_memory_store_keeps_every_record() {
        let store = MemoryStore::new();
        store.init().await.unwrap();
        assert!(store.is_empty());

        store
            .save(&[file("a.txt", b"a"), file("a.txt", b"a again")])
            .await
            .unwrap();
        store.save(&[file("b.txt", b"b")]).await.unwrap();

        let names: Vec<String> = store.saved_files().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["a.txt", "a.txt", "b.txt"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_store_concurrent_batches_stay_contiguous() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let batch: Vec<UploadedFile> = (0..4)
                    .map(|_| UploadedFile {
                        name: format!("batch-{}", i),
                        ..file("x", b"x")
                    })
                    .collect();
                store.save(&batch).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let saved = store.saved_files();
        assert_eq!(saved.len(), 64);
        for chunk in saved.chunks(4) {
            assert!(chunk.iter().all(|f| f.name == chunk[0].name));
        }
    }

    #[test]
    fn test_create_store() {
        let mut config = AppConfig::development();
        assert!(create_store(&config).is_ok());

        config.store_backend = "disk".to_string();
        assert!(create_store(&config).is_ok());

        config.store_backend = "tape".to_string();
        assert!(create_store(&config).is_err());
    }
}
