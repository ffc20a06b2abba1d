//! Error types for the cache invalidator

use lru_blob_cache::LruCacheError;
use std::fmt;

#[derive(Debug)]
pub enum InvalidatorError {
    /// The key is absent or was evicted
    NotFound(String),
    Serialization(String),
    Deserialization(String),
    Cache(LruCacheError),
    Io(Box<std::io::Error>),
    Config(String),
    IndexVersion(u32),
    IndexCorrupt(String),
}

impl InvalidatorError {
    /// Whether this is a cache miss rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, InvalidatorError::NotFound(_))
    }
}

impl fmt::Display for InvalidatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidatorError::NotFound(key) => write!(f, "Not found in cache: {}", key),
            InvalidatorError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            InvalidatorError::Deserialization(msg) => {
                write!(f, "Deserialization error: {}", msg)
            }
            InvalidatorError::Cache(err) => write!(f, "Cache error: {}", err),
            InvalidatorError::Io(err) => write!(f, "IO error: {}", err),
            InvalidatorError::Config(msg) => write!(f, "Configuration error: {}", msg),
            InvalidatorError::IndexVersion(version) => {
                write!(f, "Unsupported index version: {}", version)
            }
            InvalidatorError::IndexCorrupt(msg) => write!(f, "Corrupt index: {}", msg),
        }
    }
}

impl std::error::Error for InvalidatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InvalidatorError::Cache(err) => Some(err),
            InvalidatorError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<LruCacheError> for InvalidatorError {
    fn from(err: LruCacheError) -> Self {
        match err {
            LruCacheError::Config(msg) => InvalidatorError::Config(msg),
            other => InvalidatorError::Cache(other),
        }
    }
}

impl From<std::io::Error> for InvalidatorError {
    fn from(err: std::io::Error) -> Self {
        InvalidatorError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for InvalidatorError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        InvalidatorError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, InvalidatorError>;
