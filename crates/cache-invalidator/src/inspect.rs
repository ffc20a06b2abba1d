//! Read-only views of a cache directory
//!
//! These never open the caches, so they do not restore, prune or rewrite
//! anything and are safe to point at a directory a running proxy owns.

use crate::error::{InvalidatorError, Result};
use crate::index::{read_index, IndexMetadata, INDEX_FILE};
use lru_blob_cache::DiskCache;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;

/// What the persisted index of a cache directory records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSummary {
    pub metadata: IndexMetadata,
    pub entries: usize,
    pub total_size: u64,
    /// Recorded keys whose payload file is absent
    pub missing_payloads: usize,
}

/// Summarize the index of `cache_dir` without modifying it
pub async fn summarize(cache_dir: &Path) -> Result<IndexSummary> {
    let (entries, metadata) = read_index(&cache_dir.join(INDEX_FILE)).await?;

    let mut missing_payloads = 0;
    for entry in &entries {
        if fs::metadata(DiskCache::path_for(cache_dir, &entry.key))
            .await
            .is_err()
        {
            missing_payloads += 1;
        }
    }

    Ok(IndexSummary {
        metadata,
        total_size: entries.iter().map(|e| e.size).sum(),
        entries: entries.len(),
        missing_payloads,
    })
}

/// Read the stored payload for `key` without touching recency or the index
pub async fn read_payload(cache_dir: &Path, key: &str) -> Result<Vec<u8>> {
    match fs::read(DiskCache::path_for(cache_dir, key)).await {
        Ok(bytes) if !bytes.is_empty() => Ok(bytes),
        Ok(_) => Err(InvalidatorError::NotFound(key.to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(InvalidatorError::NotFound(key.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}
