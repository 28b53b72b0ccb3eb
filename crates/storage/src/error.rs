//! Storage error types and result alias.
//!
//! Every operation in this crate returns [`StorageResult<T>`]. The variants map
//! onto three failure classes that callers handle differently:
//!
//! - [`StorageError::Validation`] - bad or missing input (blank id, negative counter delta, unknown
//!   search mode). Always surfaced to the caller, never retried.
//! - [`StorageError::PathResolution`] - a field accessor could not be turned into a storage path.
//!   This is a programming error and is fatal to the calling operation.
//! - [`StorageError::Unavailable`] / [`StorageError::Timeout`] - the document store or cache could
//!   not be reached. Document-store operations propagate these; the
//!   [`CacheClient`](crate::cache::CacheClient) logs them and downgrades them to a sentinel return.
//!
//! Nothing in this crate retries automatically. Retry policy belongs to the
//! calling business layer.
//!
//! # Example
//!
//! ```
//! use microbase_storage::{StorageError, StorageResult};
//!
//! fn require_id(id: &str) -> StorageResult<&str> {
//!     if id.trim().is_empty() {
//!         return Err(StorageError::validation("id must not be blank"));
//!     }
//!     Ok(id)
//! }
//!
//! assert!(require_id(" ").is_err());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during repository, criteria and cache operations.
///
/// Errors preserve their source chain via the `#[source]` attribute.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Caller supplied bad or missing input.
    #[error("Validation error: {message}")]
    Validation {
        /// Description of what was wrong with the input.
        message: String,
    },

    /// A field accessor could not be resolved to a storage path.
    #[error("Cannot resolve field path segment '{segment}': {reason}")]
    PathResolution {
        /// The offending segment as written by the caller.
        segment: String,
        /// Why the segment was rejected.
        reason: String,
    },

    /// The underlying document store or cache is unreachable.
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Description of the connection failure.
        message: String,
        /// The underlying error that caused this failure.
        #[source]
        source: Option<BoxError>,
    },

    /// The store did not answer within its time limit.
    #[error("Operation timeout")]
    Timeout,

    /// A value could not be encoded for storage or decoded after retrieval.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// A cache key holds a value of a different kind than the operation expects.
    #[error("Wrong value kind for key: {key}")]
    WrongType {
        /// The key holding the mismatched value.
        key: String,
    },

    /// Catch-all for store-specific failures.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },
}

impl StorageError {
    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Creates a new `PathResolution` error for the given segment.
    #[must_use]
    pub fn path_resolution(segment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PathResolution { segment: segment.into(), reason: reason.into() }
    }

    /// Creates a new `Unavailable` error with the given message.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into(), source: None }
    }

    /// Creates a new `Unavailable` error with a message and source error.
    #[must_use]
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `WrongType` error for the given cache key.
    #[must_use]
    pub fn wrong_type(key: impl Into<String>) -> Self {
        Self::WrongType { key: key.into() }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Returns `true` when the failure came from store availability rather
    /// than from the request itself.
    ///
    /// Callers that implement their own retry policy should only consider
    /// transient errors. This crate never retries on its own.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_with_source(err.to_string(), err)
    }
}

/// Errors raised while validating configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric field is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// Smallest accepted value.
        min: String,
        /// Value that was supplied.
        value: String,
    },

    /// A field that must carry text was empty.
    #[error("{field} must not be empty")]
    Empty {
        /// Name of the offending field.
        field: &'static str,
    },

    /// Two fields that must differ carry the same value.
    #[error("{field} must differ from {other}")]
    NotDistinct {
        /// Name of the offending field.
        field: &'static str,
        /// Name of the field it collides with.
        other: &'static str,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::unavailable("down").is_transient());
        assert!(StorageError::timeout().is_transient());
        assert!(!StorageError::validation("bad").is_transient());
        assert!(!StorageError::path_resolution("", "empty").is_transient());
        assert!(!StorageError::wrong_type("k").is_transient());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            StorageError::validation("id must not be blank").to_string(),
            "Validation error: id must not be blank"
        );
        assert_eq!(
            StorageError::path_resolution("a.b", "contains '.'").to_string(),
            "Cannot resolve field path segment 'a.b': contains '.'"
        );
        assert_eq!(
            ConfigError::BelowMinimum { field: "page_size", min: "1".into(), value: "0".into() }
                .to_string(),
            "page_size must be at least 1, got 0"
        );
    }

    #[test]
    fn test_source_chain_preserved() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = StorageError::unavailable_with_source("cache down", io);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_from_serde_json_error() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StorageError = parse.into();
        assert!(matches!(err, StorageError::Serialization { .. }));
    }
}
