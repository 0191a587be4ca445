//! Persistent store for fetched descriptions
//!
//! [`FsStore`] keeps one JSON document per key in the cache directory. Writes
//! go to a temporary sibling file which is synced and then renamed into place,
//! so a reader never observes a half-written document.

use crate::cache::key::CacheKey;
use crate::cache::types::Description;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const DOCUMENT_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Durable storage of descriptions, keyed by cache key
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Whether content for `key` is stored
    async fn exists(&self, key: &CacheKey) -> Result<bool>;

    /// Store content for `key`; durable once this returns `Ok`
    async fn write(&self, key: &CacheKey, description: &[String]) -> Result<()>;

    /// Load content for `key`
    async fn read(&self, key: &CacheKey) -> Result<Description>;

    /// Remove all stored content
    async fn delete_all(&self) -> Result<()>;

    /// Keys that currently have content stored
    async fn list_keys(&self) -> Result<Vec<CacheKey>>;
}

/// On-disk document format
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDescription {
    key: CacheKey,
    paragraphs: Vec<String>,
    fetched_at: DateTime<Utc>,
}

/// File-system backed [`ContentStore`]
#[derive(Debug, Clone)]
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        info!("Using description store at {}", dir.display());
        Ok(Self { dir })
    }

    /// Path of the document holding `key`
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir
            .join(format!("{}.{}", key.storage_id(), DOCUMENT_EXTENSION))
    }

    fn temp_path(&self) -> PathBuf {
        self.dir
            .join(format!(".{}.{}", uuid::Uuid::new_v4(), TEMP_EXTENSION))
    }

    async fn write_document(&self, temp: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(temp, target).await
    }
}

#[async_trait]
impl ContentStore for FsStore {
    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        Ok(fs::try_exists(self.path_for(key)).await?)
    }

    async fn write(&self, key: &CacheKey, description: &[String]) -> Result<()> {
        let document = StoredDescription {
            key: key.clone(),
            paragraphs: description.to_vec(),
            fetched_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&document)?;

        let target = self.path_for(key);
        let temp = self.temp_path();

        if let Err(e) = self.write_document(&temp, &target, &bytes).await {
            // best effort, the temp file may not exist
            let _ = fs::remove_file(&temp).await;
            return Err(CacheError::store(key.as_str(), e));
        }

        debug!("Stored {} paragraphs for {} at {}", description.len(), key, target.display());
        Ok(())
    }

    async fn read(&self, key: &CacheKey) -> Result<Description> {
        let path = self.path_for(key);
        let bytes = fs::read(&path)
            .await
            .map_err(|e| CacheError::store(key.as_str(), format!("{}: {}", path.display(), e)))?;

        let document: StoredDescription = serde_json::from_slice(&bytes)
            .map_err(|e| CacheError::store(key.as_str(), format!("corrupt document: {}", e)))?;

        if &document.key != key {
            return Err(CacheError::store(
                key.as_str(),
                format!("document belongs to '{}'", document.key),
            ));
        }

        Ok(document.paragraphs)
    }

    async fn delete_all(&self) -> Result<()> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0usize;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let ours = path
                .extension()
                .is_some_and(|ext| ext == DOCUMENT_EXTENSION || ext == TEMP_EXTENSION);
            if !ours {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!("Removed {} files from {}", removed, self.dir.display());
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<CacheKey>> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == DOCUMENT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match CacheKey::from_storage_id(stem) {
                Some(key) => keys.push(key),
                None => warn!("Ignoring unrecognized file in cache dir: {}", path.display()),
            }
        }

        Ok(keys)
    }
}
