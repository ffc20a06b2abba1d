//! The cache invalidator: object caching over the LRU backends with a
//! persisted index

use crate::codec::{Codec, JsonCodec};
use crate::config::InvalidatorConfig;
use crate::error::{InvalidatorError, Result};
use crate::flush::{spawn_worker, FlushScheduler};
use crate::index::{read_index, IndexEntry, IndexMetadata, IndexState, INDEX_FILE};
use lru_blob_cache::{CacheStats, DiskCache, DurableCache, LruCache, MemoryCache};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Statistics about an invalidator and its backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidatorStats {
    pub memory: CacheStats,
    pub disk: CacheStats,
    pub index_entries: usize,
    pub flushes: u64,
    pub flush_failures: u64,
}

/// Caches serializable objects on disk and keeps a durable index of them.
///
/// `set` and `get` go to the disk cache. The memory cache is an independent
/// store unless `read_through` is configured, in which case reads try it
/// first, disk hits populate it, and keys leaving the disk cache leave it
/// too. Index writes happen on a background task; use
/// [`CacheInvalidator::wait_for_flush`] to observe them.
///
/// Lock order is index, then backend. Every operation that changes what the
/// disk cache holds runs under the index lock, so the index always names
/// exactly the keys the disk cache tracks.
pub struct CacheInvalidator<C: Codec = JsonCodec> {
    memory: Arc<dyn LruCache>,
    disk: Arc<dyn DurableCache>,
    index: Arc<Mutex<IndexState>>,
    scheduler: Arc<FlushScheduler>,
    worker: Option<JoinHandle<()>>,
    index_path: PathBuf,
    flush_every: usize,
    read_through: bool,
    codec: C,
}

impl CacheInvalidator<JsonCodec> {
    /// Open a JSON-encoding invalidator. Must be called within a Tokio runtime.
    pub async fn open(config: InvalidatorConfig) -> Result<Self> {
        Self::with_codec(config, JsonCodec).await
    }
}

impl<C: Codec> CacheInvalidator<C> {
    /// Open an invalidator over a [`MemoryCache`] and a [`DiskCache`] in
    /// `cache_dir`, using `codec` for payloads.
    pub async fn with_codec(config: InvalidatorConfig, codec: C) -> Result<Self> {
        config.validate()?;
        ensure_dir(&config.cache_dir).await?;

        let memory = Arc::new(MemoryCache::new(config.memory_capacity));
        let disk = Arc::new(DiskCache::open(&config.cache_dir, config.disk_capacity).await?);
        Self::with_backends(&config, memory, disk, codec).await
    }

    /// Open an invalidator over caller-supplied backends.
    ///
    /// The capacities in `config` are ignored; the backends carry their own.
    /// The index lives in `config.cache_dir`. The disk backend is rebuilt
    /// from a previous index: recorded keys are restored in recency order,
    /// stored payloads the index missed are recovered, and anything left
    /// untracked is deleted. An unreadable index is rebuilt from the stored
    /// payloads alone.
    pub async fn with_backends(
        config: &InvalidatorConfig,
        memory: Arc<dyn LruCache>,
        disk: Arc<dyn DurableCache>,
        codec: C,
    ) -> Result<Self> {
        config.validate()?;
        ensure_dir(&config.cache_dir).await?;
        let index_path = config.cache_dir.join(INDEX_FILE);

        let recorded = match read_index(&index_path).await {
            Ok((entries, _)) => Some(entries),
            Err(e) => {
                warn!(error = %e, path = ?index_path, "Unreadable cache index, rebuilding from stored payloads");
                None
            }
        };

        for entry in recorded.iter().flatten() {
            if !disk.restore(&entry.key).await {
                debug!(key = %entry.key, "Dropping index record without payload");
            }
        }
        if let Err(e) = disk.recover_untracked().await {
            warn!(error = %e, "Failed to recover untracked cache payloads");
        }

        let restored: Vec<IndexEntry> = disk
            .entries()
            .await
            .into_iter()
            .map(|(key, size)| IndexEntry { key, size })
            .collect();

        if let Err(e) = disk.prune_orphans().await {
            warn!(error = %e, "Failed to remove orphaned cache files");
        }

        info!(
            cache_dir = ?config.cache_dir,
            recorded = recorded.as_ref().map_or(0, Vec::len),
            restored = restored.len(),
            "Cache invalidator opened"
        );

        let stale = recorded.as_deref() != Some(&restored[..]);
        let index = Arc::new(Mutex::new(IndexState::new(restored)));
        let scheduler = Arc::new(FlushScheduler::new());
        let worker = spawn_worker(scheduler.clone(), index.clone(), index_path.clone());

        if stale {
            scheduler.request();
        }

        Ok(Self {
            memory,
            disk,
            index,
            scheduler,
            worker: Some(worker),
            index_path,
            flush_every: config.flush_every,
            read_through: config.read_through,
            codec,
        })
    }

    /// Encode `object` and store it under `key`.
    ///
    /// Returns once the payload is on disk and the in-memory index is
    /// updated. On error nothing is recorded.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, object: &T) -> Result<()> {
        let bytes = self.codec.encode(object)?;
        if bytes.is_empty() {
            return Err(InvalidatorError::Serialization(format!(
                "encoded payload for {} is empty",
                key
            )));
        }
        let size = bytes.len() as u64;
        let memory_copy = self.read_through.then(|| bytes.clone());

        let (evicted, flush_due) = {
            let mut index = self.index.lock().await;
            let evicted = self.disk.set(key, bytes).await?;

            index.upsert(key, size);
            for evicted_key in &evicted {
                index.remove(evicted_key);
            }

            if let Some(copy) = memory_copy {
                for evicted_key in &evicted {
                    self.memory.remove(evicted_key).await;
                }
                if !evicted.iter().any(|k| k == key) {
                    self.memory.set(key, copy).await?;
                }
            }

            (evicted, index.record_write(self.flush_every))
        };

        if flush_due {
            self.scheduler.request();
        }

        debug!(key, size, evicted = evicted.len(), "Cached object");
        Ok(())
    }

    /// Fetch and decode the object stored under `key`.
    ///
    /// A miss is [`InvalidatorError::NotFound`]; a payload that does not
    /// decode as `T` is [`InvalidatorError::Deserialization`]. A disk hit
    /// marks the key most-recently-used in the index as well.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        if self.read_through {
            if let Some(bytes) = self.memory.get(key).await {
                return self.codec.decode(&bytes);
            }
        }

        let Some(bytes) = self.disk.get(key).await else {
            let mut index = self.index.lock().await;
            // A concurrent set may have stored it since the miss
            if !self.disk.contains(key).await {
                if index.remove(key) {
                    debug!(key, "Removed index record for missing payload");
                    self.scheduler.request();
                }
                if self.read_through {
                    self.memory.remove(key).await;
                }
            }
            return Err(InvalidatorError::NotFound(key.to_string()));
        };

        let object = {
            let mut index = self.index.lock().await;
            index.touch(key);
            let object = self.codec.decode(&bytes)?;
            if self.read_through && self.disk.contains(key).await {
                self.memory.set(key, bytes).await?;
            }
            object
        };
        Ok(object)
    }

    /// Drop `key` from both caches and the index
    pub async fn invalidate(&self, key: &str) -> bool {
        let (in_memory, on_disk, indexed) = {
            let mut index = self.index.lock().await;
            let in_memory = self.memory.remove(key).await;
            let on_disk = self.disk.remove(key).await;
            (in_memory, on_disk, index.remove(key))
        };

        if indexed {
            self.scheduler.request();
        }
        if in_memory || on_disk {
            debug!(key, "Invalidated cache entry");
        }
        in_memory || on_disk || indexed
    }

    /// Read the persisted index file
    pub async fn read_index(&self) -> Result<(Vec<IndexEntry>, IndexMetadata)> {
        read_index(&self.index_path).await
    }

    /// Wait until every flush requested so far has completed
    pub async fn wait_for_flush(&self) {
        self.scheduler.wait_for_all().await;
    }

    /// Flush the index now and wait for it
    pub async fn flush(&self) {
        self.index.lock().await.reset_writes();
        let generation = self.scheduler.request();
        self.scheduler.wait_for(generation).await;
    }

    /// The in-memory index, least-recently-used first
    pub async fn index_entries(&self) -> Vec<IndexEntry> {
        self.index.lock().await.snapshot()
    }

    pub fn memory_cache(&self) -> &dyn LruCache {
        self.memory.as_ref()
    }

    pub fn disk_cache(&self) -> &dyn DurableCache {
        self.disk.as_ref()
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub async fn stats(&self) -> InvalidatorStats {
        InvalidatorStats {
            memory: self.memory.stats().await,
            disk: self.disk.stats().await,
            index_entries: self.index.lock().await.len(),
            flushes: self.scheduler.flushes(),
            flush_failures: self.scheduler.failures(),
        }
    }

    /// Write a final index and stop the flush worker
    pub async fn close(mut self) {
        let generation = self.scheduler.close();
        self.scheduler.wait_for(generation).await;
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "Index flush worker failed");
            }
        }
        info!(cache_dir = ?self.index_path.parent(), "Cache invalidator closed");
    }
}

async fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).await.map_err(|e| {
        InvalidatorError::Config(format!(
            "cannot create cache directory {}: {}",
            dir.display(),
            e
        ))
    })
}

impl<C: Codec> Drop for CacheInvalidator<C> {
    fn drop(&mut self) {
        // Let the worker write what it has and exit
        if self.worker.is_some() {
            self.scheduler.close();
        }
    }
}
