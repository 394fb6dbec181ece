//! Relay error types

use crate::dispatch::CountResult;
use thiserror::Error;

/// Errors reported by an [`EventStore`](crate::EventStore) and passed through
/// the dispatcher unchanged.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend I/O, pool or task failure
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The operation did not complete within its deadline
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The caller's context was cancelled
    #[error("context cancelled")]
    Cancelled,

    /// The event failed the store's structural checks
    #[error("invalid: {0}")]
    Malformed(String),
}

impl StorageError {
    /// Deadline and cancellation errors come from the context, not the backend.
    pub fn is_context_error(&self) -> bool {
        matches!(self, StorageError::DeadlineExceeded | StorageError::Cancelled)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Unavailable(format!("database error: {}", err))
    }
}

impl From<r2d2::Error> for StorageError {
    fn from(err: r2d2::Error) -> Self {
        StorageError::Unavailable(format!("connection pool error: {}", err))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Unavailable(format!("serialization error: {}", err))
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Unavailable(format!("storage task failed: {}", err))
    }
}

impl From<nostr::Nip01Error> for StorageError {
    fn from(err: nostr::Nip01Error) -> Self {
        StorageError::Malformed(err.to_string())
    }
}

/// A failed count: the sentinel result alongside the store error.
///
/// `result` is always [`CountResult::FAILED`]; inspect `source` first.
#[derive(Error, Debug)]
#[error("count failed: {source}")]
pub struct CountError {
    pub result: CountResult,
    #[source]
    pub source: StorageError,
}

impl CountError {
    pub(crate) fn new(source: StorageError) -> Self {
        Self {
            result: CountResult::FAILED,
            source,
        }
    }
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Relay result type
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_errors() {
        assert!(StorageError::DeadlineExceeded.is_context_error());
        assert!(StorageError::Cancelled.is_context_error());
        assert!(!StorageError::Unavailable("disk".into()).is_context_error());
        assert!(!StorageError::Malformed("id".into()).is_context_error());
    }

    #[test]
    fn test_count_error_carries_sentinel() {
        let err = CountError::new(StorageError::DeadlineExceeded);
        assert_eq!(err.result.count, -1);
        assert!(!err.result.approximate);
        assert_eq!(err.to_string(), "count failed: deadline exceeded");
    }

    #[test]
    fn test_nip01_error_is_malformed() {
        let err: StorageError = nostr::Nip01Error::InvalidEvent("bad id".into()).into();
        assert!(matches!(err, StorageError::Malformed(_)));
    }
}
