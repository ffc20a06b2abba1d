//! Entry-bounded LRU blob caches
//!
//! Provides a shared [`LruCache`] trait with two backends: [`MemoryCache`]
//! keeps payloads in process memory, [`DiskCache`] keeps one file per key
//! under a cache directory. Both are bounded by entry count and evict the
//! least-recently-used entry when full. A capacity of zero retains nothing.

mod backend;
mod disk;
pub mod error;
mod memory;
mod types;

pub use backend::{DurableCache, LruCache};
pub use disk::DiskCache;
pub use error::{LruCacheError, Result};
pub use memory::MemoryCache;
pub use types::CacheStats;
