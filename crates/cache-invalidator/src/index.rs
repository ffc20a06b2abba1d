//! Durable index of what the disk cache holds
//!
//! The index file is a JSON document carrying a format version, the time it
//! was written, and a SHA-256 checksum of its entry list. Entries are ordered
//! least-recently-used first, reads included, so a restart rebuilds the disk
//! cache with the recency it had. Writes go to a temporary file which is
//! synced and then renamed over the index, so a crash mid-write leaves the
//! previous index intact.

use crate::error::{InvalidatorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

pub const INDEX_FILE: &str = "index.json";
pub const INDEX_VERSION: u32 = 1;

/// One cached key and the size of its stored payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: String,
    pub size: u64,
}

/// Format metadata read back from an index file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub version: u32,
    /// `None` when no index file exists yet
    pub written_at: Option<DateTime<Utc>>,
    pub checksum: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    written_at: DateTime<Utc>,
    checksum: String,
    entries: Vec<IndexEntry>,
}

fn checksum(entries: &[IndexEntry]) -> Result<String> {
    let bytes =
        serde_json::to_vec(entries).map_err(|e| InvalidatorError::Serialization(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Read an index file.
///
/// A missing or empty file is a cold start and yields no entries. Records
/// with a zero size are dropped.
pub async fn read_index(path: &Path) -> Result<(Vec<IndexEntry>, IndexMetadata)> {
    let contents = match fs::read(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    if contents.iter().all(u8::is_ascii_whitespace) {
        let metadata = IndexMetadata {
            version: INDEX_VERSION,
            written_at: None,
            checksum: checksum(&[])?,
        };
        return Ok((Vec::new(), metadata));
    }

    let file: IndexFile = serde_json::from_slice(&contents)
        .map_err(|e| InvalidatorError::IndexCorrupt(e.to_string()))?;

    if file.version != INDEX_VERSION {
        return Err(InvalidatorError::IndexVersion(file.version));
    }

    let actual = checksum(&file.entries)?;
    if actual != file.checksum {
        return Err(InvalidatorError::IndexCorrupt(format!(
            "checksum mismatch (expected {}, found {})",
            file.checksum, actual
        )));
    }

    let metadata = IndexMetadata {
        version: file.version,
        written_at: Some(file.written_at),
        checksum: file.checksum,
    };

    let entries = file
        .entries
        .into_iter()
        .filter(|entry| {
            if entry.size == 0 {
                warn!(key = %entry.key, "Dropping zero-size index record");
            }
            entry.size > 0
        })
        .collect();

    Ok((entries, metadata))
}

/// Atomically replace the index file with `entries`
pub async fn write_index(path: &Path, entries: &[IndexEntry]) -> Result<()> {
    let file = IndexFile {
        version: INDEX_VERSION,
        written_at: Utc::now(),
        checksum: checksum(entries)?,
        entries: entries.to_vec(),
    };
    let bytes = serde_json::to_vec_pretty(&file)
        .map_err(|e| InvalidatorError::Serialization(e.to_string()))?;

    let temp_path = path.with_extension("json.tmp");
    let result = async {
        let mut out = fs::File::create(&temp_path).await?;
        out.write_all(&bytes).await?;
        out.sync_all().await?;
        fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}

/// In-memory index owned by the invalidator
#[derive(Debug, Default)]
pub(crate) struct IndexState {
    entries: Vec<IndexEntry>,
    writes_since_flush: usize,
}

impl IndexState {
    pub(crate) fn new(entries: Vec<IndexEntry>) -> Self {
        Self {
            entries,
            writes_since_flush: 0,
        }
    }

    /// Insert or replace `key`, moving it to the most recent end
    pub(crate) fn upsert(&mut self, key: &str, size: u64) {
        self.entries.retain(|entry| entry.key != key);
        self.entries.push(IndexEntry {
            key: key.to_string(),
            size,
        });
    }

    /// Move `key` to the most recent end if it is recorded
    pub(crate) fn touch(&mut self, key: &str) -> bool {
        match self.entries.iter().position(|entry| entry.key == key) {
            Some(pos) if pos + 1 == self.entries.len() => true,
            Some(pos) => {
                let entry = self.entries.remove(pos);
                self.entries.push(entry);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.key != key);
        self.entries.len() != before
    }

    /// Count a write; returns true and resets when `flush_every` is reached
    pub(crate) fn record_write(&mut self, flush_every: usize) -> bool {
        self.writes_since_flush += 1;
        if self.writes_since_flush >= flush_every {
            self.writes_since_flush = 0;
            true
        } else {
            false
        }
    }

    pub(crate) fn reset_writes(&mut self) {
        self.writes_since_flush = 0;
    }

    pub(crate) fn snapshot(&self) -> Vec<IndexEntry> {
        self.entries.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(key: &str, size: u64) -> IndexEntry {
        IndexEntry {
            key: key.to_string(),
            size,
        }
    }

    #[tokio::test]
    async fn test_missing_index_is_cold_start() {
        let dir = tempdir().unwrap();

        let (entries, metadata) = read_index(&dir.path().join(INDEX_FILE)).await.unwrap();

        assert!(entries.is_empty());
        assert_eq!(metadata.version, INDEX_VERSION);
        assert!(metadata.written_at.is_none());
    }

    #[tokio::test]
    async fn test_empty_index_is_cold_start() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        std::fs::write(&path, b"").unwrap();

        let (entries, _) = read_index(&path).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        let written = vec![entry("a", 10), entry("b", 20)];

        write_index(&path, &written).await.unwrap();
        let (entries, metadata) = read_index(&path).await.unwrap();

        assert_eq!(entries, written);
        assert!(metadata.written_at.is_some());
        assert_eq!(metadata.checksum.len(), 64);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_repeated_writes_are_identical() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        let written = vec![entry("a", 10)];

        write_index(&path, &written).await.unwrap();
        let (first, first_meta) = read_index(&path).await.unwrap();
        write_index(&path, &written).await.unwrap();
        let (second, second_meta) = read_index(&path).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first_meta.checksum, second_meta.checksum);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        write_index(&path, &[entry("a", 10)]).await.unwrap();

        let tampered = std::fs::read_to_string(&path)
            .unwrap()
            .replace("\"size\": 10", "\"size\": 11");
        std::fs::write(&path, tampered).unwrap();

        let result = read_index(&path).await;
        assert!(matches!(result, Err(InvalidatorError::IndexCorrupt(_))));
    }

    #[tokio::test]
    async fn test_garbage_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        std::fs::write(&path, b"{\"version\": 1, \"entr").unwrap();

        let result = read_index(&path).await;
        assert!(matches!(result, Err(InvalidatorError::IndexCorrupt(_))));
    }

    #[tokio::test]
    async fn test_unknown_version_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        let json = serde_json::json!({
            "version": 99,
            "written_at": "2026-01-01T00:00:00Z",
            "checksum": "",
            "entries": []
        });
        std::fs::write(&path, json.to_string()).unwrap();

        let result = read_index(&path).await;
        assert!(matches!(result, Err(InvalidatorError::IndexVersion(99))));
    }

    #[tokio::test]
    async fn test_zero_size_records_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        write_index(&path, &[entry("empty", 0), entry("full", 3)])
            .await
            .unwrap();

        let (entries, _) = read_index(&path).await.unwrap();
        assert_eq!(entries, vec![entry("full", 3)]);
    }

    #[test]
    fn test_upsert_moves_key_to_end() {
        let mut state = IndexState::new(vec![entry("a", 1), entry("b", 2)]);

        state.upsert("a", 5);

        assert_eq!(state.snapshot(), vec![entry("b", 2), entry("a", 5)]);
    }

    #[test]
    fn test_touch_moves_recorded_key_to_end() {
        let mut state = IndexState::new(vec![entry("a", 1), entry("b", 2)]);

        assert!(state.touch("a"));
        assert!(!state.touch("missing"));

        assert_eq!(state.snapshot(), vec![entry("b", 2), entry("a", 1)]);
    }

    #[test]
    fn test_remove() {
        let mut state = IndexState::new(vec![entry("a", 1)]);

        assert!(state.remove("a"));
        assert!(!state.remove("a"));
        assert_eq!(state.len(), 0);
    }

    #[test]
    fn test_record_write_threshold() {
        let mut state = IndexState::default();

        assert!(!state.record_write(3));
        assert!(!state.record_write(3));
        assert!(state.record_write(3));
        assert!(!state.record_write(3));

        assert!(state.record_write(1));
    }
}
