//! File-backed cache with time-based expiry.
//!
//! Each key maps to `<dir>/<sha256(key)>.json` holding
//! `{ "key", "created_at", "data" }`. Reads of an expired entry delete it.
//! Reads and writes of the same key are serialized; different keys never
//! contend.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::errors::CacheError;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    created_at: DateTime<Utc>,
    data: serde_json::Value,
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub total_size_bytes: u64,
    pub cache_dir: String,
    pub ttl_hours: f64,
}

type LockMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

pub struct ResultCache {
    dir: PathBuf,
    ttl: Duration,
    locks: LockMap,
}

/// Exclusive access to one key. The map slot is released with the last holder.
struct KeyGuard<'a> {
    locks: &'a LockMap,
    key: String,
    guard: OwnedMutexGuard<()>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one in this guard.
        if Arc::strong_count(OwnedMutexGuard::mutex(&self.guard)) <= 2 {
            locks.remove(&self.key);
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl ResultCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self, CacheError> {
        let dir = dir.into();
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            tokio::fs::create_dir_all(&dir).await.map_err(io_error(&dir))?;
            info!(dir = %dir.display(), "created cache directory");
        }
        Ok(Self {
            dir,
            ttl,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// File backing `key`. Keys are hashed so any string is a safe file name.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{:x}.json", digest))
    }

    async fn lock_key(&self, key: &str) -> KeyGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.to_string()).or_default().clone()
        };
        KeyGuard {
            locks: &self.locks,
            key: key.to_string(),
            guard: lock.lock_owned().await,
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn is_fresh(&self, created_at: DateTime<Utc>) -> bool {
        match (Utc::now() - created_at).to_std() {
            Ok(age) => age < self.ttl,
            // Timestamp in the future: clock skew, treat as new.
            Err(_) => true,
        }
    }

    async fn read_entry(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(path)(e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| CacheError::Malformed {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn remove_file(path: &Path) -> Result<bool, CacheError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(path)(e)),
        }
    }

    /// Fetch a live entry. Expired entries are removed and reported as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let _guard = self.lock_key(key).await;

        let path = self.path_for(key);
        let Some(entry) = Self::read_entry(&path).await? else {
            debug!(key, "cache miss");
            return Ok(None);
        };

        if !self.is_fresh(entry.created_at) {
            info!(key, "cache entry expired");
            Self::remove_file(&path).await?;
            return Ok(None);
        }

        let value = serde_json::from_value(entry.data).map_err(|source| CacheError::Malformed {
            path: path.clone(),
            source,
        })?;
        info!(key, "cache hit");
        Ok(Some(value))
    }

    /// Store `value` under `key`, replacing any existing entry.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let data = serde_json::to_value(value).map_err(CacheError::Encode)?;
        let entry = CacheEntry {
            key: key.to_string(),
            created_at: Utc::now(),
            data,
        };
        let bytes = serde_json::to_vec_pretty(&entry).map_err(CacheError::Encode)?;

        let _guard = self.lock_key(key).await;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(io_error(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_error(&path))?;
        info!(key, "cached entry");
        Ok(())
    }

    /// Remove `key`. Returns whether an entry existed.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let _guard = self.lock_key(key).await;
        let removed = Self::remove_file(&self.path_for(key)).await?;
        if removed {
            info!(key, "deleted cache entry");
        }
        Ok(removed)
    }

    async fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut dir = tokio::fs::read_dir(&self.dir).await.map_err(io_error(&self.dir))?;
        let mut files = Vec::new();
        while let Some(item) = dir.next_entry().await.map_err(io_error(&self.dir))? {
            let path = item.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Delete every expired entry. Unreadable files are logged and skipped.
    pub async fn clear_expired(&self) -> Result<usize, CacheError> {
        let mut cleared = 0;
        for path in self.entry_files().await? {
            let entry = match Self::read_entry(&path).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable cache file");
                    continue;
                }
            };
            if self.is_fresh(entry.created_at) {
                continue;
            }
            let _guard = self.lock_key(&entry.key).await;
            // A concurrent set may have refreshed the entry since the first read.
            match Self::read_entry(&path).await {
                Ok(Some(current)) if !self.is_fresh(current.created_at) => {}
                _ => continue,
            }
            if Self::remove_file(&path).await? {
                cleared += 1;
            }
        }
        if cleared > 0 {
            info!(cleared, "cleared expired cache entries");
        }
        Ok(cleared)
    }

    /// Entry counts and total size. Unreadable entries count as expired.
    pub async fn info(&self) -> Result<CacheInfo, CacheError> {
        let files = self.entry_files().await?;
        let mut info = CacheInfo {
            total_entries: files.len(),
            valid_entries: 0,
            expired_entries: 0,
            total_size_bytes: 0,
            cache_dir: self.dir.display().to_string(),
            ttl_hours: self.ttl.as_secs_f64() / 3600.0,
        };
        for path in files {
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                info.total_size_bytes += meta.len();
            }
            match Self::read_entry(&path).await {
                Ok(Some(entry)) if self.is_fresh(entry.created_at) => info.valid_entries += 1,
                _ => info.expired_entries += 1,
            }
        }
        Ok(info)
    }
}
