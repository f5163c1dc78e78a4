use crate::models::UploadedFile;
use crate::services::store::{Store, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

const STAGING_DIR: &str = ".staging";
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub name: String,
    /// Path of the payload relative to the batch directory
    pub path: String,
    pub size: u64,
    pub sha256: String,
    pub upload_time: DateTime<Utc>,
    pub client_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub id: Uuid,
    pub saved_at: DateTime<Utc>,
    pub files: Vec<StoredFile>,
}

/// Stores every batch in its own directory under `root`.
///
/// A batch is written to `root/.staging/<id>` and renamed to `root/<id>`
/// once complete, so readers never observe a partial batch.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[cfg(test)]
    fn root(&self) -> &Path {
        &self.root
    }

    /// Reads the manifests of all committed batches, oldest first
    pub async fn batches(&self) -> Result<Vec<BatchManifest>, StoreError> {
        let mut batches = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_name() == STAGING_DIR || !entry.file_type().await?.is_dir() {
                continue;
            }
            let raw = fs::read(entry.path().join(MANIFEST_FILE)).await?;
            batches.push(serde_json::from_slice::<BatchManifest>(&raw)?);
        }
        batches.sort_by_key(|b| b.saved_at);
        Ok(batches)
    }

    async fn write_batch(
        &self,
        staging: &Path,
        id: Uuid,
        files: &[UploadedFile],
    ) -> Result<(), StoreError> {
        fs::create_dir(staging).await?;

        let mut stored = Vec::with_capacity(files.len());
        for (index, file) in files.iter().enumerate() {
            // Names are client-supplied; payloads are stored by index only
            let path = format!("{:05}.bin", index);
            fs::write(staging.join(&path), &file.contents).await?;

            stored.push(StoredFile {
                name: file.name.clone(),
                path,
                size: file.contents.len() as u64,
                sha256: hex::encode(Sha256::digest(&file.contents)),
                upload_time: file.upload.time,
                client_agent: file.upload.client_agent.clone(),
            });
        }

        let manifest = BatchManifest {
            id,
            saved_at: Utc::now(),
            files: stored,
        };
        fs::write(staging.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for DiskStore {
    async fn init(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.root.join(STAGING_DIR)).await?;
        tracing::info!("🗄️  Disk store ready at {}", self.root.display());
        Ok(())
    }

    async fn save(&self, files: &[UploadedFile]) -> Result<(), StoreError> {
        let id = Uuid::new_v4();
        let staging = self.root.join(STAGING_DIR).join(id.to_string());

        let committed = match self.write_batch(&staging, id, files).await {
            Ok(()) => fs::rename(&staging, self.root.join(id.to_string()))
                .await
                .map_err(StoreError::from),
            Err(e) => Err(e),
        };

        if let Err(e) = committed {
            if let Err(cleanup) = fs::remove_dir_all(&staging).await {
                tracing::warn!("Failed to clean up staging batch {}: {}", id, cleanup);
            }
            return Err(e);
        }

        tracing::debug!("Stored batch {} with {} files", id, files.len());
        Ok(())
    }
}
