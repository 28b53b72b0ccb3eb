//! Session authority configuration.

use std::time::Duration;

use microbase_storage::ConfigError;
use serde::{Deserialize, Serialize};

/// Default lifetime of a session: seven days.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default prefix of forward index keys (`token -> identity`).
pub const DEFAULT_TOKEN_KEY_PREFIX: &str = "USER:LOGIN:AUTH_SET:";

/// Default prefix of reverse index keys (`userId -> token`).
pub const DEFAULT_USER_KEY_PREFIX: &str = "USER:LOGIN:AUTH_SET:USER_ID_WITH_TOKEN:";

/// Configuration for [`SessionAuthority`](crate::SessionAuthority).
///
/// ```
/// use std::time::Duration;
///
/// use microbase_authn::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .token_ttl(Duration::from_secs(3600))
///     .revoke_superseded(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.token_ttl(), Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    #[serde(with = "humantime_serde", default = "default_token_ttl")]
    pub(crate) token_ttl: Duration,
    #[serde(default = "default_token_key_prefix")]
    pub(crate) token_key_prefix: String,
    #[serde(default = "default_user_key_prefix")]
    pub(crate) user_key_prefix: String,
    #[serde(default)]
    pub(crate) revoke_superseded: bool,
}

fn default_token_ttl() -> Duration {
    DEFAULT_TOKEN_TTL
}

fn default_token_key_prefix() -> String {
    DEFAULT_TOKEN_KEY_PREFIX.to_owned()
}

fn default_user_key_prefix() -> String {
    DEFAULT_USER_KEY_PREFIX.to_owned()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_ttl: DEFAULT_TOKEN_TTL,
            token_key_prefix: default_token_key_prefix(),
            user_key_prefix: default_user_key_prefix(),
            revoke_superseded: false,
        }
    }
}

#[bon::bon]
impl SessionConfig {
    /// Creates a validated session configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TTL is under one second, a key prefix
    /// is blank, or both prefixes are identical.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_TOKEN_TTL)] token_ttl: Duration,
        #[builder(into, default = default_token_key_prefix())] token_key_prefix: String,
        #[builder(into, default = default_user_key_prefix())] user_key_prefix: String,
        #[builder(default)] revoke_superseded: bool,
    ) -> Result<Self, ConfigError> {
        if token_ttl < Duration::from_secs(1) {
            return Err(ConfigError::BelowMinimum {
                field: "token_ttl",
                min: "1s".into(),
                value: format!("{token_ttl:?}"),
            });
        }
        if token_key_prefix.trim().is_empty() {
            return Err(ConfigError::Empty { field: "token_key_prefix" });
        }
        if user_key_prefix.trim().is_empty() {
            return Err(ConfigError::Empty { field: "user_key_prefix" });
        }
        if token_key_prefix == user_key_prefix {
            return Err(ConfigError::NotDistinct { field: "user_key_prefix", other: "token_key_prefix" });
        }
        Ok(Self { token_ttl, token_key_prefix, user_key_prefix, revoke_superseded })
    }

    /// Lifetime of both index entries of a session.
    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    /// Prefix of forward index keys.
    #[must_use]
    pub fn token_key_prefix(&self) -> &str {
        &self.token_key_prefix
    }

    /// Prefix of reverse index keys.
    #[must_use]
    pub fn user_key_prefix(&self) -> &str {
        &self.user_key_prefix
    }

    /// Whether re-issuing deletes the superseded token's forward entry
    /// instead of letting it expire.
    #[must_use]
    pub fn revoke_superseded(&self) -> bool {
        self.revoke_superseded
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_match_default() {
        assert_eq!(SessionConfig::builder().build().unwrap(), SessionConfig::default());
        assert_eq!(SessionConfig::default().token_ttl(), Duration::from_secs(604_800));
    }

    #[test]
    fn test_rejects_sub_second_ttl() {
        let err = SessionConfig::builder().token_ttl(Duration::from_millis(500)).build().unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "token_ttl", .. }));
    }

    #[test]
    fn test_rejects_blank_or_shared_prefixes() {
        let blank = SessionConfig::builder().token_key_prefix(" ").build().unwrap_err();
        assert_eq!(blank, ConfigError::Empty { field: "token_key_prefix" });

        let shared = SessionConfig::builder()
            .token_key_prefix("S:")
            .user_key_prefix("S:")
            .build()
            .unwrap_err();
        assert_eq!(shared, ConfigError::NotDistinct { field: "user_key_prefix", other: "token_key_prefix" });
    }

    #[test]
    fn test_deserialize_humantime_ttl() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "token_ttl": "2h", "revoke_superseded": true }"#).unwrap();
        assert_eq!(config.token_ttl(), Duration::from_secs(7200));
        assert!(config.revoke_superseded());
        assert_eq!(config.user_key_prefix(), DEFAULT_USER_KEY_PREFIX);
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        assert!(serde_json::from_str::<SessionConfig>(r#"{ "ttl": "2h" }"#).is_err());
    }
}
