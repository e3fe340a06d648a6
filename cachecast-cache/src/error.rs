//! Error types for cache operations.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific errors.
///
/// Errors are `Clone` so that a collapsed fetch can hand the same failure to
/// every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Key not found in the store
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Store connectivity, protocol or timeout failure
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The source of truth failed to produce a value
    #[error("Source fetch failed for '{key}': {message}")]
    SourceFetchFailed {
        /// Cache key being populated
        key: String,
        /// Error reported by the fetch function
        message: String,
    },

    /// The source of truth rejected a write-through
    #[error("Source write failed for '{key}': {message}")]
    SourceWriteFailed {
        /// Cache key being written
        key: String,
        /// Error reported by the write function
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The coordinator has been shut down
    #[error("Cache coordinator is shut down")]
    Closed,
}

impl CacheError {
    /// Whether this is the "key absent" case that strategies treat as a miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }

    /// Whether the store could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheError::StoreUnavailable(_))
    }

    /// Whether the source of truth failed.
    pub fn is_source_failure(&self) -> bool {
        matches!(
            self,
            CacheError::SourceFetchFailed { .. } | CacheError::SourceWriteFailed { .. }
        )
    }

    /// Whether the stored bytes or the value could not be encoded or decoded.
    pub fn is_serialization(&self) -> bool {
        matches!(
            self,
            CacheError::Serialization(_) | CacheError::Deserialization(_)
        )
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::StoreUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert!(CacheError::NotFound("k".into()).is_not_found());
        assert!(CacheError::StoreUnavailable("refused".into()).is_unavailable());
        assert!(
            CacheError::SourceFetchFailed {
                key: "k".into(),
                message: "db down".into()
            }
            .is_source_failure()
        );
        assert!(CacheError::Deserialization("bad".into()).is_serialization());
        assert!(!CacheError::StoreUnavailable("x".into()).is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = CacheError::SourceWriteFailed {
            key: "profile:1".into(),
            message: "constraint violated".into(),
        };
        let display = err.to_string();
        assert!(display.contains("profile:1"));
        assert!(display.contains("constraint violated"));
    }
}
