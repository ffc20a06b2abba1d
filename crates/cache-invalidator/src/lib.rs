//! Proxy cache invalidator
//!
//! Single entry point the proxy uses to cache response objects. Objects are
//! encoded through a [`Codec`] and stored in an entry-bounded LRU disk cache.
//! An index of what the disk cache holds is kept in memory and persisted to
//! `index.json` by a background worker, so the cache survives restarts.

pub mod codec;
pub mod config;
pub mod error;
mod flush;
pub mod index;
pub mod inspect;
pub mod invalidator;

pub use codec::{Codec, JsonCodec};
pub use config::InvalidatorConfig;
pub use error::{InvalidatorError, Result};
pub use index::{read_index, IndexEntry, IndexMetadata, INDEX_FILE, INDEX_VERSION};
pub use inspect::{read_payload, summarize, IndexSummary};
pub use invalidator::{CacheInvalidator, InvalidatorStats};
pub use lru_blob_cache::{CacheStats, DiskCache, DurableCache, LruCache, MemoryCache};
