#![allow(clippy::expect_used, clippy::panic)]
//! Session lifecycle over the in-memory cache.

use std::time::Duration;

use microbase_authn::{
    AuthError, SessionConfig,
    testutil::{memory_authority, reverse_entry, sample_user},
};
use rstest::rstest;

// ---------------------------------------------------------------------------
// Issue and validate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn issued_token_resolves_without_secrets() {
    let (authority, _) = memory_authority(SessionConfig::default());
    let token = authority.issue(&sample_user("42")).await.expect("issue");

    assert_eq!(token.user_id(), "42");
    let user = authority.validate(&token.to_string()).await.expect("valid session");
    assert_eq!(user.id, "42");
    assert_eq!(user.email.as_deref(), Some("user-42@example.com"));
    assert_eq!(user.pwd, None, "password must never leave the authority");
}

#[tokio::test]
async fn newer_login_supersedes_older_token() {
    let (authority, backend) = memory_authority(SessionConfig::default());
    let first = authority.issue(&sample_user("42")).await.expect("first login").to_string();
    let second = authority.issue(&sample_user("42")).await.expect("second login").to_string();

    assert_ne!(first, second);
    assert_eq!(reverse_entry(&backend, "42").await.as_deref(), Some(second.as_str()));

    // The first token's identity entry is still cached; the reverse index alone decides.
    assert!(matches!(authority.try_validate(&first).await, Err(AuthError::TokenSuperseded)));
    assert!(authority.validate(&first).await.is_none());
    assert!(authority.validate(&second).await.is_some());
}

#[tokio::test]
async fn sessions_of_different_users_are_independent() {
    let (authority, _) = memory_authority(SessionConfig::default());
    let alice = authority.issue(&sample_user("1")).await.expect("issue").to_string();
    let bob = authority.issue(&sample_user("2")).await.expect("issue").to_string();

    assert_eq!(authority.validate(&alice).await.map(|u| u.id).as_deref(), Some("1"));
    assert_eq!(authority.validate(&bob).await.map(|u| u.id).as_deref(), Some("2"));
}

#[rstest]
#[case::blank("")]
#[case::whitespace("  ")]
#[case::one_segment("42")]
#[case::non_numeric_time("42:soon:abcdefgh")]
#[tokio::test]
async fn malformed_tokens_are_rejected_before_lookup(#[case] token: &str) {
    let (authority, _) = memory_authority(SessionConfig::default());
    authority.issue(&sample_user("42")).await.expect("issue");

    assert!(matches!(authority.try_validate(token).await, Err(AuthError::InvalidTokenFormat(_))));
    assert!(authority.validate(token).await.is_none());
}

#[tokio::test]
async fn well_formed_token_without_session_is_not_found() {
    let (authority, _) = memory_authority(SessionConfig::default());
    let result = authority.try_validate("42:1700000000000:AAAAAAAAAAAAAAAA").await;
    assert!(matches!(result, Err(AuthError::SessionNotFound)));
}

#[tokio::test]
async fn forged_token_for_live_user_is_superseded() {
    let (authority, _) = memory_authority(SessionConfig::default());
    let real = authority.issue(&sample_user("42")).await.expect("issue");

    let forged = format!("42:{}:{}", real.issued_at_millis(), "ZZZZZZZZZZZZZZZZ");
    assert!(matches!(authority.try_validate(&forged).await, Err(AuthError::TokenSuperseded)));
}

#[tokio::test]
async fn unembeddable_user_id_cannot_be_issued() {
    let (authority, backend) = memory_authority(SessionConfig::default());
    let result = authority.issue(&sample_user("a:b")).await;

    assert!(matches!(result, Err(AuthError::InvalidUserId(_))));
    assert_eq!(backend.stored_keys(), 0);
}

// ---------------------------------------------------------------------------
// Revoke
// ---------------------------------------------------------------------------

#[tokio::test]
async fn logout_ends_the_session() {
    let (authority, backend) = memory_authority(SessionConfig::default());
    let token = authority.issue(&sample_user("42")).await.expect("issue").to_string();

    assert!(authority.revoke(&token).await.expect("revoke"));
    assert!(authority.validate(&token).await.is_none());
    assert_eq!(backend.stored_keys(), 0);
}

#[tokio::test]
async fn stale_logout_keeps_newer_session() {
    let (authority, _) = memory_authority(SessionConfig::default());
    let stale = authority.issue(&sample_user("42")).await.expect("issue").to_string();
    let current = authority.issue(&sample_user("42")).await.expect("issue").to_string();

    assert!(!authority.revoke(&stale).await.expect("stale revoke"));
    assert!(authority.validate(&current).await.is_some());
}

#[tokio::test]
async fn revoke_user_drops_current_session() {
    let (authority, _) = memory_authority(SessionConfig::default());
    let token = authority.issue(&sample_user("42")).await.expect("issue").to_string();

    assert!(authority.revoke_user("42").await.expect("revoke user"));
    assert!(!authority.revoke_user("42").await.expect("second revoke is a no-op"));
    assert!(matches!(authority.try_validate(&token).await, Err(AuthError::SessionNotFound)));
}

// ---------------------------------------------------------------------------
// Expiry
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn session_expires_with_its_ttl() {
    let config = SessionConfig::builder().token_ttl(Duration::from_secs(60)).build().expect("config");
    let (authority, _) = memory_authority(config);
    let token = authority.issue(&sample_user("42")).await.expect("issue").to_string();

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(authority.validate(&token).await.is_some());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(matches!(authority.try_validate(&token).await, Err(AuthError::SessionNotFound)));
}

#[tokio::test]
async fn custom_prefixes_are_honoured() {
    let config = SessionConfig::builder()
        .token_key_prefix("T:")
        .user_key_prefix("U:")
        .build()
        .expect("config");
    let (authority, backend) = memory_authority(config);
    let token = authority.issue(&sample_user("42")).await.expect("issue").to_string();

    assert_eq!(reverse_entry(&backend, "42").await, None, "default prefix must be unused");
    assert!(authority.validate(&token).await.is_some());
}
