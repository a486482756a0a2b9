//! Cache entries persisted as one file per key.
//!
//! Compressed blobs are written byte for byte; raw entries are written as
//! JSON. A [`MokaStore`] sits in front so repeated reads stay in memory,
//! while [`PersistentCache::entries`] always lists what is on disk.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::services::cache::{CacheEntry, MokaStore, PersistentCache, RAW_SUFFIX, StoredBlob};

const FILE_EXTENSION: &str = "cache";
const TEMP_EXTENSION: &str = "tmp";

pub struct FileStore {
    dir: PathBuf,
    hot: MokaStore,
}

impl FileStore {
    /// Open (creating if needed) the cache directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>, hot_max_bytes: u64) -> AppResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error("create cache directory", &dir, &e))?;
        tracing::info!(dir = %dir.display(), "Cache directory opened");
        Ok(Self {
            dir,
            hot: MokaStore::new(hot_max_bytes),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{FILE_EXTENSION}", file_stem(key)))
    }

    async fn read_file(&self, key: &str, path: &Path) -> AppResult<Option<StoredBlob>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read cache file", path, &e)),
        };
        Ok(Some(blob_from_bytes(key, bytes)))
    }
}

/// Keys map to file names with anything outside `[A-Za-z0-9._-]` replaced.
fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn blob_from_bytes(key: &str, bytes: Vec<u8>) -> StoredBlob {
    if !key.ends_with(RAW_SUFFIX) {
        return StoredBlob::Compressed(Arc::new(bytes));
    }
    match serde_json::from_slice::<CacheEntry>(&bytes) {
        Ok(entry) => StoredBlob::Raw(Arc::new(entry)),
        Err(e) => StoredBlob::Unreadable(Arc::new(e.to_string())),
    }
}

fn blob_to_bytes(blob: &StoredBlob) -> AppResult<Vec<u8>> {
    match blob {
        StoredBlob::Raw(entry) => serde_json::to_vec(entry.as_ref())
            .map_err(|e| AppError::Internal(format!("Cache encoding failed: {e}"))),
        StoredBlob::Compressed(bytes) => Ok(bytes.as_ref().clone()),
        StoredBlob::Unreadable(reason) => Err(AppError::CacheInvalid(reason.as_ref().clone())),
    }
}

fn io_error(action: &str, path: &Path, e: &std::io::Error) -> AppError {
    AppError::Internal(format!("Failed to {action} {}: {e}", path.display()))
}

#[async_trait]
impl PersistentCache for FileStore {
    async fn get(&self, key: &str) -> AppResult<Option<StoredBlob>> {
        if let Some(blob) = self.hot.get(key).await? {
            return Ok(Some(blob));
        }
        let blob = self.read_file(key, &self.path_for(key)).await?;
        if let Some(blob) = &blob {
            self.hot.set(key, blob.clone()).await?;
        }
        Ok(blob)
    }

    async fn set(&self, key: &str, blob: StoredBlob) -> AppResult<()> {
        let bytes = blob_to_bytes(&blob)?;
        let path = self.path_for(key);
        let temp = path.with_extension(TEMP_EXTENSION);
        tokio::fs::write(&temp, &bytes)
            .await
            .map_err(|e| io_error("write cache file", &temp, &e))?;
        tokio::fs::rename(&temp, &path)
            .await
            .map_err(|e| io_error("replace cache file", &path, &e))?;

        self.hot.set(key, blob).await
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        self.hot.remove(key).await?;
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove cache file", &path, &e)),
        }
    }

    async fn entries(&self) -> AppResult<Vec<(String, StoredBlob)>> {
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error("list cache directory", &self.dir, &e))?;

        let mut entries = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| io_error("list cache directory", &self.dir, &e))?
        {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let key = key.to_string();
            if let Some(blob) = self.read_file(&key, &path).await? {
                entries.push((key, blob));
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_become_safe_file_names() {
        assert_eq!(file_stem("sensor.temp_0a1b-raw"), "sensor.temp_0a1b-raw");
        assert_eq!(file_stem("../etc/passwd"), ".._etc_passwd");
    }

    #[test]
    fn unreadable_raw_file_decodes_as_invalid() {
        let blob = blob_from_bytes("sensor.a_00-raw", b"{ broken".to_vec());
        assert!(matches!(blob.decode(), Err(AppError::CacheInvalid(_))));
        assert!(blob_to_bytes(&blob).is_err());
    }
}
