//! # Microbase Session Authentication
//!
//! Cache-backed session tokens and request-scoped identity for microbase
//! services.
//!
//! This crate provides:
//! - **Session authority**: issue, validate and revoke opaque tokens held in a
//!   [`CacheClient`](microbase_storage::CacheClient)
//! - **Request context**: the resolved identity and caller address, scoped to one request
//! - **Audit attribution**: an [`AuditLogger`](microbase_storage::AuditLogger) decorator that
//!   names the requesting user
//!
//! ## Session lifecycle
//!
//! ```text
//! NoSession --issue--> Active --issue again--> Active (old token Stale)
//!     ^                  |
//!     +---revoke / TTL---+
//! ```
//!
//! A token is valid only while the user's reverse index entry names it. A
//! newer login therefore rejects the older token at once.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use microbase_authn::{RequestContext, SessionAuthority, UserIdentity};
//! use microbase_storage::{CacheClient, MemoryCache};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let authority = SessionAuthority::<UserIdentity>::builder()
//!     .cache(CacheClient::new(Arc::new(MemoryCache::new())))
//!     .build();
//!
//! let token = authority.issue(&UserIdentity::builder().id("7").build()).await?.to_string();
//!
//! let context = authority.enter(Some(&token), None).await;
//! let user = context
//!     .scope(async { RequestContext::<UserIdentity>::current().and_then(|ctx| ctx.user_id().map(str::to_owned)) })
//!     .await;
//! assert_eq!(user.as_deref(), Some("7"));
//! # Ok::<(), microbase_authn::AuthError>(())
//! # }).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod authority;
pub mod config;
pub mod context;
/// Authentication error types.
pub mod error;
pub mod identity;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod token;

pub use audit::{ACTOR_IP_KEY, IdentityAuditLogger};
pub use authority::SessionAuthority;
pub use config::SessionConfig;
pub use context::RequestContext;
pub use error::{AuthError, Result};
pub use identity::{CLIENT_IP_HEADERS, ClientIp, SessionSubject, UserIdentity};
pub use token::SessionToken;
