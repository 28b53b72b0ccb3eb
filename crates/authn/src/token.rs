//! Opaque session tokens.
//!
//! A token renders as `<userId>:<issueTimeMillis>:<nonce>`. The user id is
//! recoverable from the token alone, which lets validation find the user's
//! reverse index entry before touching the identity payload.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rand::{Rng, distr::Alphanumeric};

use crate::error::AuthError;

/// Number of random alphanumeric characters in a token nonce.
pub const NONCE_LEN: usize = 16;

const SEPARATOR: char = ':';

/// A parsed session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken {
    user_id: String,
    issued_at_millis: i64,
    nonce: String,
}

impl SessionToken {
    /// Mints a token for `user_id` issued at `issued_at` with a fresh nonce.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidUserId`] if the id is blank or contains the
    /// `:` separator.
    pub fn generate(user_id: &str, issued_at: DateTime<Utc>) -> Result<Self, AuthError> {
        check_user_id(user_id)?;
        let nonce = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        Ok(Self { user_id: user_id.to_owned(), issued_at_millis: issued_at.timestamp_millis(), nonce })
    }

    /// Id of the user the token was issued to.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Issue time in epoch milliseconds.
    #[must_use]
    pub fn issued_at_millis(&self) -> i64 {
        self.issued_at_millis
    }

    /// Issue time, if the embedded millis fall inside chrono's range.
    #[must_use]
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.issued_at_millis)
    }

    /// Random part of the token.
    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }
}

pub(crate) fn check_user_id(user_id: &str) -> Result<(), AuthError> {
    if user_id.trim().is_empty() {
        return Err(AuthError::InvalidUserId("user id must not be blank".into()));
    }
    if user_id.contains(SEPARATOR) {
        return Err(AuthError::InvalidUserId(format!("user id must not contain '{SEPARATOR}'")));
    }
    Ok(())
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}{SEPARATOR}{}", self.user_id, self.issued_at_millis, self.nonce)
    }
}

impl FromStr for SessionToken {
    type Err = AuthError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().is_empty() {
            return Err(AuthError::invalid_format("token is blank"));
        }
        let segments: Vec<&str> = raw.split(SEPARATOR).collect();
        let [user_id, millis, nonce] = segments.as_slice() else {
            return Err(AuthError::invalid_format(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        };
        if [user_id, millis, nonce].iter().any(|segment| segment.trim().is_empty()) {
            return Err(AuthError::invalid_format("token has an empty segment"));
        }
        let issued_at_millis = millis
            .parse::<i64>()
            .map_err(|_| AuthError::invalid_format(format!("issue time '{millis}' is not numeric")))?;

        Ok(Self { user_id: (*user_id).to_owned(), issued_at_millis, nonce: (*nonce).to_owned() })
    }
}
