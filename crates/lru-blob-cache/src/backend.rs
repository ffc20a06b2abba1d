//! The capabilities shared by cache backends

use crate::error::Result;
use crate::types::CacheStats;
use async_trait::async_trait;

/// An entry-bounded, least-recently-used byte cache.
///
/// Implementations guard their state internally, so a single instance can be
/// shared across tasks behind an `Arc`.
#[async_trait]
pub trait LruCache: Send + Sync {
    /// Look up `key`, marking it most-recently-used on a hit.
    ///
    /// A miss is a normal outcome and is reported as `None`.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Insert or replace `key`, marking it most-recently-used.
    ///
    /// Returns the keys evicted to stay within capacity. Replacing an existing
    /// key is not an eviction. With a capacity of zero the inserted key itself
    /// is evicted and returned.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<Vec<String>>;

    /// Drop `key`, returning whether it was held
    async fn remove(&self, key: &str) -> bool;

    /// Whether `key` is held, without touching its recency
    async fn contains(&self, key: &str) -> bool;

    /// Held keys and their payload sizes, least-recently-used first
    async fn entries(&self) -> Vec<(String, u64)>;

    /// Number of entries currently held
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Maximum number of entries
    fn capacity(&self) -> usize;

    async fn stats(&self) -> CacheStats;
}

/// A cache whose payloads outlive the process.
///
/// After a restart the backend starts empty; the owner re-registers payloads
/// in recency order with [`DurableCache::restore`], picks up payloads its own
/// records missed with [`DurableCache::recover_untracked`], then clears what
/// is left with [`DurableCache::prune_orphans`].
#[async_trait]
pub trait DurableCache: LruCache {
    /// Re-register a stored payload as most-recently-used.
    ///
    /// Returns `false` when nothing is stored for `key` or it was evicted
    /// straight away.
    async fn restore(&self, key: &str) -> bool;

    /// Register every stored payload not yet tracked, oldest first.
    ///
    /// Returns how many were registered.
    async fn recover_untracked(&self) -> Result<usize>;

    /// Delete stored data no tracked key refers to
    async fn prune_orphans(&self) -> Result<usize>;
}
