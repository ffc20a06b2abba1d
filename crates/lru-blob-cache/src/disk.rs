//! File-backed LRU cache with in-memory recency tracking
//!
//! Each payload lives at `<cache_dir>/blobs/<sha256(key)>` next to a small
//! `<sha256(key)>.meta` record naming its key, so stored payloads can be
//! recovered without any external index. Writes, evictions and removals all
//! happen under the cache lock, so a tracked key always has its file.

use crate::backend::{DurableCache, LruCache};
use crate::error::{LruCacheError, Result};
use crate::types::CacheStats;
use async_trait::async_trait;
use lru::LruCache as RecencyList;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const BLOB_DIR: &str = "blobs";
const META_SUFFIX: &str = ".meta";
const TEMP_SUFFIX: &str = ".tmp";

/// A cache storing each payload as a file under `<cache_dir>/blobs`
pub struct DiskCache {
    /// Key -> payload size, in recency order
    inner: Mutex<DiskInner>,
    blob_dir: PathBuf,
    capacity: usize,
    next_temp_id: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

struct DiskInner {
    /// `None` when the capacity is zero
    entries: Option<RecencyList<String, u64>>,
    total_size: u64,
}

/// Sidecar record written next to every payload
#[derive(Debug, Serialize, Deserialize)]
struct BlobMeta {
    key: String,
    size: u64,
}

impl DiskInner {
    fn pop(&mut self, key: &str) -> Option<u64> {
        let size = self.entries.as_mut()?.pop(key)?;
        self.total_size = self.total_size.saturating_sub(size);
        Some(size)
    }

    fn contains(&self, key: &str) -> bool {
        self.entries
            .as_ref()
            .map_or(false, |lru| lru.contains(key))
    }

    /// Record `key` as most-recently-used, returning the keys pushed out
    fn push(&mut self, key: &str, size: u64) -> Vec<String> {
        let Some(lru) = self.entries.as_mut() else {
            return vec![key.to_string()];
        };

        let mut evicted = Vec::new();
        match lru.push(key.to_string(), size) {
            Some((old_key, old_size)) if old_key == key => {
                self.total_size = self.total_size.saturating_sub(old_size);
            }
            Some((old_key, old_size)) => {
                self.total_size = self.total_size.saturating_sub(old_size);
                evicted.push(old_key);
            }
            None => {}
        }
        self.total_size += size;
        evicted
    }

    fn tracked_names(&self) -> HashSet<String> {
        self.entries
            .as_ref()
            .map(|lru| lru.iter().map(|(key, _)| DiskCache::blob_name(key)).collect())
            .unwrap_or_default()
    }
}

impl DiskCache {
    /// Open a disk cache rooted at `cache_dir`, creating its blob directory.
    ///
    /// The cache starts empty; previously written payloads become visible
    /// again through [`DurableCache::restore`] and
    /// [`DurableCache::recover_untracked`].
    pub async fn open(cache_dir: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let blob_dir = cache_dir.as_ref().join(BLOB_DIR);
        fs::create_dir_all(&blob_dir).await.map_err(|e| {
            LruCacheError::Config(format!(
                "cannot create cache directory {}: {}",
                blob_dir.display(),
                e
            ))
        })?;

        info!(blob_dir = ?blob_dir, capacity, "Disk cache opened");

        Ok(Self {
            inner: Mutex::new(DiskInner {
                entries: NonZeroUsize::new(capacity).map(RecencyList::new),
                total_size: 0,
            }),
            blob_dir,
            capacity,
            next_temp_id: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    /// Generate the payload file name for a key
    pub fn blob_name(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Where a cache rooted at `cache_dir` stores the payload for `key`
    pub fn path_for(cache_dir: impl AsRef<Path>, key: &str) -> PathBuf {
        cache_dir
            .as_ref()
            .join(BLOB_DIR)
            .join(Self::blob_name(key))
    }

    /// Path of the payload file for `key`
    pub fn blob_path(&self, key: &str) -> PathBuf {
        self.blob_dir.join(Self::blob_name(key))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        with_suffix(&self.blob_path(key), META_SUFFIX)
    }

    pub fn blob_dir(&self) -> &Path {
        &self.blob_dir
    }

    fn next_temp_path(&self, path: &Path) -> PathBuf {
        let temp_id = self.next_temp_id.fetch_add(1, Ordering::Relaxed);
        with_suffix(path, &format!(".{}{}", temp_id, TEMP_SUFFIX))
    }

    /// Write to a unique temporary file then rename over `path`
    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let temp_path = self.next_temp_path(path);
        if let Err(e) = fs::write(&temp_path, contents).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn write_blob(&self, key: &str, value: &[u8]) -> Result<()> {
        let meta = serde_json::to_vec(&BlobMeta {
            key: key.to_string(),
            size: value.len() as u64,
        })
        .map_err(|e| LruCacheError::Io(Box::new(e.into())))?;

        self.write_atomic(&self.blob_path(key), value).await?;
        self.write_atomic(&self.meta_path(key), &meta).await
    }

    async fn delete_files(&self, key: &str) {
        remove_file(&self.blob_path(key)).await;
        remove_file(&self.meta_path(key)).await;
    }

    /// Delete the files of keys pushed out of the recency list.
    /// Callers hold the cache lock.
    async fn delete_evicted(&self, evicted: &[String]) {
        for key in evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            self.delete_files(key).await;
            debug!(key = %key, "Evicted least-recently-used disk entry");
        }
    }

    /// Keys and payload sizes of every stored record whose payload is
    /// present, oldest payload first
    async fn stored_records(&self) -> Result<Vec<(String, u64)>> {
        let mut records: Vec<(SystemTime, String, u64)> = Vec::new();
        let mut dir = fs::read_dir(&self.blob_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let is_meta = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(META_SUFFIX))
                .unwrap_or(false);
            if !is_meta {
                continue;
            }

            let meta: BlobMeta = match fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(meta) => meta,
                    Err(e) => {
                        warn!(path = ?path, error = %e, "Skipping unreadable payload record");
                        continue;
                    }
                },
                Err(e) => {
                    warn!(path = ?path, error = %e, "Skipping unreadable payload record");
                    continue;
                }
            };

            match fs::metadata(self.blob_path(&meta.key)).await {
                Ok(info) if info.is_file() && info.len() > 0 => {
                    if info.len() != meta.size {
                        debug!(key = %meta.key, "Payload size differs from its record, using payload");
                    }
                    let modified = info.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    records.push((modified, meta.key, info.len()));
                }
                _ => continue,
            }
        }

        records.sort_by_key(|(modified, _, _)| *modified);
        Ok(records
            .into_iter()
            .map(|(_, key, size)| (key, size))
            .collect())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

async fn remove_file(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = ?path, error = %e, "Failed to remove cached file");
        }
    }
}

#[async_trait]
impl LruCache for DiskCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let tracked = {
            let mut inner = self.inner.lock().await;
            inner
                .entries
                .as_mut()
                .and_then(|lru| lru.get(key))
                .is_some()
        };

        if !tracked {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match fs::read(self.blob_path(key)).await {
            Ok(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Disk cache hit");
                Some(data)
            }
            Err(e) => {
                // Only purge if the file is still gone once writers are excluded
                let mut inner = self.inner.lock().await;
                if fs::metadata(self.blob_path(key)).await.is_err() && inner.pop(key).is_some() {
                    warn!(key, error = %e, "Failed to read cached file, removing entry");
                    remove_file(&self.meta_path(key)).await;
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<Vec<String>> {
        let size = value.len() as u64;

        let mut inner = self.inner.lock().await;
        self.write_blob(key, &value).await?;
        let evicted = inner.push(key, size);
        self.delete_evicted(&evicted).await;
        drop(inner);

        debug!(key, size, "Stored entry in disk cache");
        Ok(evicted)
    }

    async fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let removed = inner.pop(key).is_some();
        if removed {
            self.delete_files(key).await;
        }
        removed
    }

    async fn contains(&self, key: &str) -> bool {
        self.inner.lock().await.contains(key)
    }

    async fn entries(&self) -> Vec<(String, u64)> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .as_ref()
            .map(|lru| {
                lru.iter()
                    .rev()
                    .map(|(key, size)| (key.clone(), *size))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn len(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.entries.as_ref().map_or(0, |lru| lru.len())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            capacity: self.capacity,
            entries: inner.entries.as_ref().map_or(0, |lru| lru.len()),
            total_size: inner.total_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl DurableCache for DiskCache {
    async fn restore(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().await;

        let size = match fs::metadata(self.blob_path(key)).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => meta.len(),
            Ok(_) => return false,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(key, error = %e, "Failed to stat cached file during restore");
                }
                return false;
            }
        };

        let evicted = inner.push(key, size);
        self.delete_evicted(&evicted).await;
        evicted.iter().all(|k| k != key)
    }

    async fn recover_untracked(&self) -> Result<usize> {
        let mut inner = self.inner.lock().await;

        let mut recovered = 0;
        for (key, size) in self.stored_records().await? {
            if inner.contains(&key) {
                continue;
            }
            let evicted = inner.push(&key, size);
            if evicted.iter().all(|k| k != &key) {
                recovered += 1;
            }
            self.delete_evicted(&evicted).await;
        }

        if recovered > 0 {
            info!(recovered, "Recovered untracked cache payloads");
        }
        Ok(recovered)
    }

    async fn prune_orphans(&self) -> Result<usize> {
        let inner = self.inner.lock().await;
        let live = inner.tracked_names();

        let mut removed = 0;
        let mut dir = fs::read_dir(&self.blob_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let keep = entry
                .file_name()
                .to_str()
                .map(|name| {
                    !name.ends_with(TEMP_SUFFIX)
                        && live.contains(name.strip_suffix(META_SUFFIX).unwrap_or(name))
                })
                .unwrap_or(false);
            if !keep {
                remove_file(&entry.path()).await;
                removed += 1;
            }
        }
        drop(inner);

        if removed > 0 {
            info!(removed, "Removed orphaned cache files");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_blob_name_generation() {
        let name1 = DiskCache::blob_name("GET https://example.com/a");
        let name2 = DiskCache::blob_name("GET https://example.com/a");
        let name3 = DiskCache::blob_name("GET https://example.com/b");

        // Same inputs produce same name
        assert_eq!(name1, name2);

        // Different inputs produce different names
        assert_ne!(name1, name3);

        // Names are hex strings (64 chars for SHA256)
        assert_eq!(name1.len(), 64);
        assert!(name1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 1).await.unwrap();

        cache.set("testKey", vec![0x61]).await.unwrap();

        assert_eq!(cache.get("testKey").await, Some(vec![0x61]));
        assert!(cache.blob_path("testKey").exists());
        assert_eq!(DiskCache::path_for(dir.path(), "testKey"), cache.blob_path("testKey"));
    }

    #[tokio::test]
    async fn test_zero_capacity_retains_nothing() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 0).await.unwrap();

        let evicted = cache.set("testKey", vec![0x61]).await.unwrap();

        assert_eq!(evicted, vec!["testKey".to_string()]);
        assert!(cache.get("testKey").await.is_none());
        assert!(!cache.blob_path("testKey").exists());
        assert!(!cache.meta_path("testKey").exists());
    }

    #[tokio::test]
    async fn test_capacity_one_evicts_previous_key() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 1).await.unwrap();

        cache.set("testKey-1", vec![0x61]).await.unwrap();
        cache.set("testKey-2", vec![0x62]).await.unwrap();

        assert!(cache.get("testKey-1").await.is_none());
        assert!(!cache.blob_path("testKey-1").exists());
        assert_eq!(cache.get("testKey-2").await, Some(vec![0x62]));
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_overflow_keeps_most_recent_entries() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 3).await.unwrap();

        for i in 0..4 {
            cache
                .set(&format!("key-{}", i), vec![i as u8 + 1])
                .await
                .unwrap();
        }

        assert!(cache.get("key-0").await.is_none());
        for i in 1..4 {
            assert!(cache.get(&format!("key-{}", i)).await.is_some());
        }
        assert_eq!(cache.len().await, 3);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_payload() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 2).await.unwrap();

        cache.set("key", b"first".to_vec()).await.unwrap();
        cache.set("key", b"second!".to_vec()).await.unwrap();

        assert_eq!(cache.get("key").await, Some(b"second!".to_vec()));
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_size, 7);
    }

    #[tokio::test]
    async fn test_missing_file_is_miss_and_purged() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 2).await.unwrap();

        cache.set("key", b"data".to_vec()).await.unwrap();
        std::fs::remove_file(cache.blob_path("key")).unwrap();

        assert!(cache.get("key").await.is_none());
        assert_eq!(cache.len().await, 0);
        assert!(!cache.contains("key").await);
        assert_eq!(cache.stats().await.total_size, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_overwrites_keep_tracked_files() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(DiskCache::open(dir.path(), 1).await.unwrap());

        for round in 0..50 {
            let mut handles = Vec::new();
            for task in 0..8 {
                let cache = cache.clone();
                let key = if task % 2 == 0 { "x" } else { "y" };
                handles.push(tokio::spawn(async move {
                    cache.set(key, vec![task as u8 + 1]).await.unwrap();
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }

            let entries = cache.entries().await;
            assert_eq!(entries.len(), 1, "round {}", round);
            for (key, _) in entries {
                assert!(cache.blob_path(&key).exists(), "round {}: {} has no file", round, key);
                assert!(cache.get(&key).await.is_some(), "round {}: {} missed", round, key);
            }
        }
    }

    #[tokio::test]
    async fn test_restore_existing_payloads() {
        let dir = tempdir().unwrap();
        {
            let cache = DiskCache::open(dir.path(), 4).await.unwrap();
            cache.set("a", b"alpha".to_vec()).await.unwrap();
            cache.set("b", b"beta".to_vec()).await.unwrap();
        }

        let cache = DiskCache::open(dir.path(), 4).await.unwrap();
        assert!(cache.restore("a").await);
        assert!(cache.restore("b").await);
        assert!(!cache.restore("never-stored").await);

        assert_eq!(
            cache.entries().await,
            vec![("a".to_string(), 5), ("b".to_string(), 4)]
        );
        assert_eq!(cache.get("a").await, Some(b"alpha".to_vec()));
    }

    #[tokio::test]
    async fn test_restore_respects_capacity() {
        let dir = tempdir().unwrap();
        {
            let cache = DiskCache::open(dir.path(), 4).await.unwrap();
            cache.set("a", b"1".to_vec()).await.unwrap();
            cache.set("b", b"2".to_vec()).await.unwrap();
        }

        let cache = DiskCache::open(dir.path(), 1).await.unwrap();
        assert!(cache.restore("a").await);
        assert!(cache.restore("b").await);

        assert_eq!(cache.entries().await, vec![("b".to_string(), 1)]);
        assert!(!cache.blob_path("a").exists());
    }

    #[tokio::test]
    async fn test_recover_untracked_payloads() {
        let dir = tempdir().unwrap();
        {
            let cache = DiskCache::open(dir.path(), 4).await.unwrap();
            cache.set("a", b"alpha".to_vec()).await.unwrap();
            cache.set("b", b"beta".to_vec()).await.unwrap();
        }

        let cache = DiskCache::open(dir.path(), 4).await.unwrap();
        assert!(cache.restore("a").await);
        assert_eq!(cache.recover_untracked().await.unwrap(), 1);

        assert!(cache.contains("b").await);
        assert_eq!(cache.get("b").await, Some(b"beta".to_vec()));
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_recover_skips_records_without_payload() {
        let dir = tempdir().unwrap();
        {
            let cache = DiskCache::open(dir.path(), 4).await.unwrap();
            cache.set("gone", b"data".to_vec()).await.unwrap();
            std::fs::remove_file(cache.blob_path("gone")).unwrap();
        }

        let cache = DiskCache::open(dir.path(), 4).await.unwrap();
        assert_eq!(cache.recover_untracked().await.unwrap(), 0);
        assert_eq!(cache.prune_orphans().await.unwrap(), 1);
        assert!(!cache.meta_path("gone").exists());
    }

    #[tokio::test]
    async fn test_prune_orphans() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 4).await.unwrap();

        cache.set("kept", b"data".to_vec()).await.unwrap();
        std::fs::write(cache.blob_dir().join("stray"), b"x").unwrap();
        std::fs::write(cache.blob_dir().join("partial.0.tmp"), b"x").unwrap();

        assert_eq!(cache.prune_orphans().await.unwrap(), 2);
        assert!(cache.blob_path("kept").exists());
        assert!(cache.meta_path("kept").exists());
        assert!(!cache.blob_dir().join("stray").exists());
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 2).await.unwrap();

        cache.set("key", b"data".to_vec()).await.unwrap();

        assert!(cache.remove("key").await);
        assert!(!cache.blob_path("key").exists());
        assert!(!cache.meta_path("key").exists());
        assert!(!cache.remove("key").await);
    }

    #[tokio::test]
    async fn test_open_fails_on_unusable_directory() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("not-a-dir");
        std::fs::write(&file_path, b"x").unwrap();

        let result = DiskCache::open(&file_path, 1).await;
        assert!(matches!(result, Err(LruCacheError::Config(_))));
    }
}
