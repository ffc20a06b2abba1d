//! Error types for the LRU blob caches

use std::fmt;

#[derive(Debug)]
pub enum LruCacheError {
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for LruCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LruCacheError::Io(err) => write!(f, "IO error: {}", err),
            LruCacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for LruCacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LruCacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LruCacheError {
    fn from(err: std::io::Error) -> Self {
        LruCacheError::Io(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, LruCacheError>;
