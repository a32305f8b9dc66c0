//! Flat-directory disk tier.
//!
//! One file per key, named by the key's hex string, no extension. Writes go
//! to a uniquely named temp file first and are renamed into place, so readers
//! never observe a partial entry and concurrent writers of the same key
//! resolve to last-writer-wins.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::key::CacheKey;
use crate::Error;

const TEMP_MARKER: &str = ".tmp-";

/// Disk cache handle.
#[derive(Clone, Debug)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Whether an entry file for `key` is present.
    pub async fn exists(&self, key: &CacheKey) -> bool {
        tokio::fs::try_exists(self.path_for(key)).await.unwrap_or(false)
    }

    /// Read the full entry for `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the entry is missing (including when it vanished
    /// after an `exists` check) or unreadable.
    pub async fn read(&self, key: &CacheKey) -> Result<Vec<u8>, Error> {
        let path = self.path_for(key);
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::io(format!("failed to read cache entry {}", path.display()), e))
    }

    /// Write `bytes` as the entry for `key`, replacing any prior content.
    ///
    /// Creates the cache directory when absent; a directory created
    /// concurrently by another writer is not an error.
    pub async fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), Error> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::io(format!("failed to create cache dir {}", self.root.display()), e))?;

        let path = self.path_for(key);
        let tmp = self.root.join(format!("{key}{TEMP_MARKER}{}", Uuid::new_v4().simple()));

        if let Err(err) = write_file(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::io(format!("failed to move cache entry into {}", path.display()), err));
        }

        tracing::trace!(key = %key, bytes = bytes.len(), "wrote disk cache entry");
        Ok(())
    }

    /// Number of entries currently on disk.
    pub async fn entry_count(&self) -> Result<usize, Error> {
        Ok(self.entry_names().await?.into_iter().filter(|name| CacheKey::is_valid(name)).count())
    }

    /// Delete every entry (and any orphaned temp file) from the cache dir.
    ///
    /// Files that are not cache entries are left alone. Returns the number of
    /// entries removed.
    pub async fn purge(&self) -> Result<usize, Error> {
        let mut removed = 0;
        for name in self.entry_names().await? {
            let is_entry = CacheKey::is_valid(&name);
            let is_temp = name
                .split_once(TEMP_MARKER)
                .is_some_and(|(key, _)| CacheKey::is_valid(key));
            if !is_entry && !is_temp {
                continue;
            }

            match tokio::fs::remove_file(self.root.join(&name)).await {
                Ok(()) if is_entry => removed += 1,
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(format!("failed to remove cache entry {name}"), e)),
            }
        }

        tracing::info!(removed, dir = %self.root.display(), "purged disk cache");
        Ok(removed)
    }

    async fn entry_names(&self) -> Result<Vec<String>, Error> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(format!("failed to list cache dir {}", self.root.display()), e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Error::io(format!("failed to list cache dir {}", self.root.display()), e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let context = || format!("failed to write cache entry {}", path.display());

    let mut file = tokio::fs::File::create(path).await.map_err(|e| Error::io(context(), e))?;
    file.write_all(bytes).await.map_err(|e| Error::io(context(), e))?;
    file.flush().await.map_err(|e| Error::io(context(), e))?;
    Ok(())
}
