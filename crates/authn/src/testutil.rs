//! Shared test utilities for session testing.
//!
//! Feature-gated behind `testutil` to prevent leaking into production builds.
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use microbase_authn::testutil::{memory_authority, sample_user};
//! ```

use std::sync::Arc;

use microbase_storage::{CacheClient, MemoryCache};

use crate::{authority::SessionAuthority, config::SessionConfig, identity::UserIdentity};

/// A [`SessionAuthority`] over a fresh [`MemoryCache`], with the backend
/// returned for direct inspection.
///
/// Must be called inside a Tokio runtime.
#[must_use]
pub fn memory_authority(config: SessionConfig) -> (SessionAuthority<UserIdentity>, MemoryCache) {
    let backend = MemoryCache::new();
    let authority =
        SessionAuthority::builder().cache(CacheClient::new(Arc::new(backend.clone()))).config(config).build();
    (authority, backend)
}

/// A user with every field set, including a password hash.
#[must_use]
pub fn sample_user(id: &str) -> UserIdentity {
    UserIdentity::builder()
        .id(id)
        .name(format!("user-{id}"))
        .pwd("$2b$10$N9qo8uLOickgx2ZMRZoMye")
        .email(format!("user-{id}@example.com"))
        .phone("555-0100")
        .remark("fixture")
        .build()
}

/// Reads the raw reverse index entry for `user_id` under the default key
/// prefix.
pub async fn reverse_entry(backend: &MemoryCache, user_id: &str) -> Option<String> {
    let cache = CacheClient::new(Arc::new(backend.clone()));
    cache.get(&format!("{}{user_id}", crate::config::DEFAULT_USER_KEY_PREFIX)).await
}
