use crate::error::{InvalidatorError, Result};
use std::env;
use std::path::PathBuf;

/// Configuration for a [`CacheInvalidator`](crate::CacheInvalidator)
#[derive(Debug, Clone)]
pub struct InvalidatorConfig {
    pub cache_dir: PathBuf,
    /// Maximum entries held by the memory cache
    pub memory_capacity: usize,
    /// Maximum entries held by the disk cache
    pub disk_capacity: usize,
    /// Successful writes between index flushes, at least 1
    pub flush_every: usize,
    /// Serve reads from the memory cache first and fill it on disk hits.
    /// The memory copy follows the disk cache: keys evicted from or missing
    /// on disk are dropped from memory too.
    pub read_through: bool,
}

impl Default for InvalidatorConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache/proxy"),
            memory_capacity: 1000,
            disk_capacity: 10_000,
            flush_every: 1,
            read_through: false,
        }
    }
}

impl InvalidatorConfig {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        memory_capacity: usize,
        disk_capacity: usize,
        flush_every: usize,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            memory_capacity,
            disk_capacity,
            flush_every,
            read_through: false,
        }
    }

    /// Parse configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cache_dir = env::var("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let memory_capacity = env::var("MEMORY_CACHE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.memory_capacity);

        let disk_capacity = env::var("DISK_CACHE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.disk_capacity);

        let flush_every = env::var("INDEX_FLUSH_EVERY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.flush_every);

        let read_through = env::var("CACHE_READ_THROUGH")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(defaults.read_through);

        Self {
            cache_dir,
            memory_capacity,
            disk_capacity,
            flush_every,
            read_through,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.flush_every == 0 {
            return Err(InvalidatorError::Config(
                "flush_every must be at least 1".to_string(),
            ));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(InvalidatorError::Config(
                "cache_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
