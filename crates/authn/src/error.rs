use microbase_storage::StorageError;
use thiserror::Error;

/// Session authentication errors.
///
/// [`SessionAuthority::validate`](crate::SessionAuthority::validate) folds
/// every variant into "no identity"; the variants exist so that
/// [`try_validate`](crate::SessionAuthority::try_validate) can say why a
/// token was turned away.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Token is blank or not shaped `<userId>:<issueTimeMillis>:<nonce>`
    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// User id cannot be embedded in a token
    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    /// A newer login replaced this token
    #[error("Token superseded by a newer session")]
    TokenSuperseded,

    /// The user has no live session
    #[error("Session not found")]
    SessionNotFound,

    /// The session exists but its identity payload is gone or unreadable
    #[error("Session identity missing")]
    MissingIdentity,

    /// Cache failure while reading or writing session state
    #[error("Session storage error: {0}")]
    Storage(
        /// The underlying storage error, preserved for source chain inspection.
        #[source]
        StorageError,
    ),
}

impl AuthError {
    /// Creates an `InvalidTokenFormat` error.
    #[must_use]
    pub fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidTokenFormat(reason.into())
    }

    /// Wraps a session write that the cache could not guarantee.
    #[must_use]
    pub(crate) fn write_not_guaranteed(what: &str) -> Self {
        Self::Storage(StorageError::unavailable(format!("{what} could not be guaranteed")))
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::Storage(err)
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;
