//! Checkpoint persistence
//!
//! The checkpoint is a single JSON document, `{"lastImportedAt": "..."}`.
//! A missing document means nothing was ever imported.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use toptracks_common::types::Checkpoint;
use tracing::{debug, info};

use crate::storage::Storage;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint, `None` if none was ever saved
    async fn load(&self) -> Result<Option<Checkpoint>>;

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
}

/// Checkpoint in a local JSON file
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No checkpoint file");
                return Ok(None);
            },
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            },
        };

        let checkpoint = Checkpoint::from_json(&bytes)
            .with_context(|| format!("Invalid checkpoint in {}", self.path.display()))?;
        Ok(Some(checkpoint))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        // Atomic replace through a sibling temp file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, checkpoint.to_json()?)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        info!(
            path = %self.path.display(),
            last_imported_at = %checkpoint.last_imported_at,
            "Saved checkpoint"
        );
        Ok(())
    }
}

/// Checkpoint as an S3 object
#[derive(Clone)]
pub struct S3CheckpointStore {
    storage: Storage,
    key: String,
}

impl S3CheckpointStore {
    pub fn new(storage: Storage, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }
}

#[async_trait]
impl CheckpointStore for S3CheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>> {
        match self.storage.get(&self.key).await? {
            Some(bytes) => {
                let checkpoint = Checkpoint::from_json(&bytes).with_context(|| {
                    format!("Invalid checkpoint in s3://{}/{}", self.storage.bucket(), self.key)
                })?;
                Ok(Some(checkpoint))
            },
            None => Ok(None),
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.storage
            .put(&self.key, checkpoint.to_json()?, Some("application/json"))
            .await?;

        info!(
            bucket = %self.storage.bucket(),
            key = %self.key,
            last_imported_at = %checkpoint.last_imported_at,
            "Saved checkpoint"
        );
        Ok(())
    }
}

/// Process-local checkpoint, for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoint: Mutex<Option<Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new(initial: Option<Checkpoint>) -> Self {
        Self {
            checkpoint: Mutex::new(initial),
        }
    }

    pub fn current(&self) -> Option<Checkpoint> {
        *self
            .checkpoint
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>> {
        Ok(self.current())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        *self
            .checkpoint
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(*checkpoint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use toptracks_common::types::snapshot_date_from_folder;

    fn checkpoint(folder: &str) -> Checkpoint {
        Checkpoint::new(snapshot_date_from_folder(folder, "itunes").unwrap())
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("nested").join("stats.json"));

        assert_eq!(store.load().await.unwrap(), None);

        store.save(&checkpoint("itunes20240110")).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(checkpoint("itunes20240110")));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("lastImportedAt"));
    }

    #[tokio::test]
    async fn test_file_store_reads_legacy_payload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, r#"{"lastImportedAt":"2024-01-10T00:00:00.000Z"}"#).unwrap();

        let store = FileCheckpointStore::new(&path);
        assert_eq!(store.load().await.unwrap(), Some(checkpoint("itunes20240110")));
    }

    #[tokio::test]
    async fn test_file_store_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(FileCheckpointStore::new(&path).load().await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCheckpointStore::default();
        assert_eq!(store.load().await.unwrap(), None);
        store.save(&checkpoint("itunes20240101")).await.unwrap();
        assert_eq!(store.current(), Some(checkpoint("itunes20240101")));
    }
}
