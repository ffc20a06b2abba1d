//! In-memory LRU cache

use crate::backend::LruCache;
use crate::error::Result;
use crate::types::CacheStats;
use async_trait::async_trait;
use lru::LruCache as RecencyList;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// A cache holding payloads in process memory
pub struct MemoryCache {
    inner: Mutex<MemoryInner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

struct MemoryInner {
    /// `None` when the capacity is zero
    entries: Option<RecencyList<String, Vec<u8>>>,
    total_size: u64,
}

impl MemoryCache {
    /// Create a memory cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                entries: NonZeroUsize::new(capacity).map(RecencyList::new),
                total_size: 0,
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl LruCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let value = {
            let mut inner = self.inner.lock().await;
            inner
                .entries
                .as_mut()
                .and_then(|lru| lru.get(key))
                .cloned()
        };

        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Memory cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<Vec<String>> {
        let size = value.len() as u64;
        let mut inner = self.inner.lock().await;
        let MemoryInner {
            entries,
            total_size,
        } = &mut *inner;

        let Some(lru) = entries.as_mut() else {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Memory cache has zero capacity, evicted on insert");
            return Ok(vec![key.to_string()]);
        };

        let mut evicted = Vec::new();
        match lru.push(key.to_string(), value) {
            Some((old_key, old_value)) if old_key == key => {
                *total_size = total_size.saturating_sub(old_value.len() as u64);
            }
            Some((old_key, old_value)) => {
                *total_size = total_size.saturating_sub(old_value.len() as u64);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %old_key, "Evicted least-recently-used memory entry");
                evicted.push(old_key);
            }
            None => {}
        }
        *total_size += size;

        debug!(key, size, "Stored entry in memory cache");
        Ok(evicted)
    }

    async fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let MemoryInner {
            entries,
            total_size,
        } = &mut *inner;

        match entries.as_mut().and_then(|lru| lru.pop(key)) {
            Some(value) => {
                *total_size = total_size.saturating_sub(value.len() as u64);
                true
            }
            None => false,
        }
    }

    async fn contains(&self, key: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .entries
            .as_ref()
            .map_or(false, |lru| lru.contains(key))
    }

    async fn entries(&self) -> Vec<(String, u64)> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .as_ref()
            .map(|lru| {
                lru.iter()
                    .rev()
                    .map(|(key, value)| (key.clone(), value.len() as u64))
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
