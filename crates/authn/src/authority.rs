//! Cache-backed session token authority.
//!
//! Each live session is two cache entries sharing one TTL:
//!
//! ```text
//! forward  <token_key_prefix><token>    -> identity payload (JSON)
//! reverse  <user_key_prefix><userId>    -> token
//! ```
//!
//! The reverse entry decides which token is current. A new login overwrites
//! it, which supersedes the previous token at once even though its forward
//! entry lingers until its TTL runs out (unless
//! [`SessionConfig::revoke_superseded`] is set).

use std::{fmt, marker::PhantomData, sync::Arc};

use chrono::{DateTime, Utc};
use microbase_storage::{AuditAction, AuditEvent, AuditLogger, AuditResult, CacheClient, Ttl};
use tracing::{debug, warn};

use crate::{
    config::SessionConfig,
    context::RequestContext,
    error::{AuthError, Result},
    identity::{ClientIp, SessionSubject, UserIdentity},
    token::{SessionToken, check_user_id},
};

/// Issues, validates and revokes session tokens for subjects of type `S`.
///
/// Cheaply cloneable; clones share the cache and audit logger.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use microbase_authn::{SessionAuthority, SessionConfig, UserIdentity};
/// use microbase_storage::{CacheClient, MemoryCache};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let authority = SessionAuthority::<UserIdentity>::builder()
///     .cache(CacheClient::new(Arc::new(MemoryCache::new())))
///     .config(SessionConfig::default())
///     .build();
///
/// let user = UserIdentity::builder().id("7").pwd("hash").build();
/// let token = authority.issue(&user).await?;
///
/// let resolved = authority.validate(&token.to_string()).await.unwrap();
/// assert_eq!(resolved.id, "7");
/// assert_eq!(resolved.pwd, None);
/// # Ok::<(), microbase_authn::AuthError>(())
/// # }).unwrap();
/// ```
pub struct SessionAuthority<S: SessionSubject = UserIdentity> {
    cache: CacheClient,
    config: SessionConfig,
    audit: Option<Arc<dyn AuditLogger>>,
    _subject: PhantomData<fn() -> S>,
}

impl<S: SessionSubject> Clone for SessionAuthority<S> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            config: self.config.clone(),
            audit: self.audit.clone(),
            _subject: PhantomData,
        }
    }
}

impl<S: SessionSubject> fmt::Debug for SessionAuthority<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAuthority")
            .field("config", &self.config)
            .field("audited", &self.audit.is_some())
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl<S: SessionSubject> SessionAuthority<S> {
    /// Creates an authority over `cache`.
    #[builder]
    pub fn new(
        cache: CacheClient,
        #[builder(default)] config: SessionConfig,
        audit: Option<Arc<dyn AuditLogger>>,
    ) -> Self {
        Self { cache, config, audit, _subject: PhantomData }
    }
}

impl<S: SessionSubject> SessionAuthority<S> {
    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn forward_key(&self, token: &str) -> String {
        format!("{}{token}", self.config.token_key_prefix)
    }

    fn reverse_key(&self, user_id: &str) -> String {
        format!("{}{user_id}", self.config.user_key_prefix)
    }

    fn ttl(&self) -> Ttl {
        Ttl::from(self.config.token_ttl)
    }

    /// Issues a new token for `subject`, superseding any previous one.
    ///
    /// Call only after the subject's credentials have been checked. The
    /// forward entry is written first, then the reverse entry.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidUserId`] if the subject's id cannot be embedded in a token.
    /// - [`AuthError::Storage`] if either cache write could not be guaranteed. A forward entry
    ///   written before a failed reverse write is removed again on a best-effort basis.
    #[tracing::instrument(skip_all, fields(user_id = subject.user_id()))]
    pub async fn issue(&self, subject: &S) -> Result<SessionToken> {
        let started = Utc::now();
        let result = self.issue_inner(subject).await;
        self.record_audit(AuditAction::IssueSession, subject.user_id(), started, &result).await;
        result
    }

    async fn issue_inner(&self, subject: &S) -> Result<SessionToken> {
        let user_id = subject.user_id();
        check_user_id(user_id)?;
        let token = SessionToken::generate(user_id, Utc::now())?;
        let rendered = token.to_string();
        let ttl = self.ttl();

        let previous =
            if self.config.revoke_superseded { self.cache.get(&self.reverse_key(user_id)).await } else { None };

        if !self.cache.set_json(&self.forward_key(&rendered), subject, ttl).await {
            return Err(AuthError::write_not_guaranteed("session identity write"));
        }
        if !self.cache.set_with_ttl(&self.reverse_key(user_id), rendered.as_str(), ttl).await {
            self.cache.delete(&[self.forward_key(&rendered)]).await;
            return Err(AuthError::write_not_guaranteed("session index write"));
        }

        if let Some(previous) = previous.filter(|previous| *previous != rendered) {
            debug!(user_id, "deleting superseded session");
            self.cache.delete(&[self.forward_key(&previous)]).await;
        }
        debug!(user_id, "session issued");
        Ok(token)
    }

    /// Resolves a presented token to its identity, with secrets stripped.
    ///
    /// Every rejection, including cache outages, yields `None` and is logged
    /// at `warn`. Use [`try_validate`](Self::try_validate) for the reason.
    #[tracing::instrument(skip_all)]
    pub async fn validate(&self, token: &str) -> Option<S> {
        match self.try_validate(token).await {
            Ok(subject) => Some(subject),
            Err(error) => {
                warn!(error = %error, "session token rejected");
                None
            },
        }
    }

    /// Resolves a presented token to its identity, with secrets stripped.
    ///
    /// The reverse entry of the embedded user id must hold exactly this
    /// token. A live forward entry alone is never enough.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidTokenFormat`] for a blank or malformed token.
    /// - [`AuthError::SessionNotFound`] if the user has no reverse entry.
    /// - [`AuthError::TokenSuperseded`] if the reverse entry names another token.
    /// - [`AuthError::MissingIdentity`] if the forward entry is gone or cannot be decoded.
    pub async fn try_validate(&self, token: &str) -> Result<S> {
        let parsed: SessionToken = token.parse()?;

        let current = self.cache.get(&self.reverse_key(parsed.user_id())).await;
        match current {
            None => return Err(AuthError::SessionNotFound),
            Some(current) if current != token => return Err(AuthError::TokenSuperseded),
            Some(_) => {},
        }

        let payload = self.cache.get(&self.forward_key(token)).await.ok_or(AuthError::MissingIdentity)?;
        let mut subject: S = serde_json::from_str(&payload).map_err(|error| {
            warn!(error = %error, "undecodable session identity");
            AuthError::MissingIdentity
        })?;
        subject.desensitize();
        Ok(subject)
    }

    /// Ends the session behind `token` (logout).
    ///
    /// The reverse entry is removed only while it still names this token, so
    /// logging out with a stale token never ends a newer session. Returns
    /// whether `token` was the user's current session.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidTokenFormat`] for a blank or malformed token.
    /// - [`AuthError::Storage`] if a delete could not be guaranteed.
    #[tracing::instrument(skip_all)]
    pub async fn revoke(&self, token: &str) -> Result<bool> {
        let parsed: SessionToken = token.parse()?;
        let started = Utc::now();
        let result = self.revoke_inner(&parsed, token).await;
        self.record_audit(AuditAction::RevokeSession, parsed.user_id(), started, &result).await;
        result
    }

    async fn revoke_inner(&self, parsed: &SessionToken, token: &str) -> Result<bool> {
        let reverse_key = self.reverse_key(parsed.user_id());
        let current = self.cache.get(&reverse_key).await.is_some_and(|current| current == token);

        let mut keys = vec![self.forward_key(token)];
        if current {
            keys.push(reverse_key);
        }
        if !self.cache.delete(&keys).await {
            return Err(AuthError::write_not_guaranteed("session delete"));
        }
        debug!(user_id = parsed.user_id(), current, "session revoked");
        Ok(current)
    }

    /// Ends whatever session `user_id` currently holds.
    ///
    /// Returns whether the user had a session.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidUserId`] for an id that cannot own a token.
    /// - [`AuthError::Storage`] if a delete could not be guaranteed.
    #[tracing::instrument(skip(self))]
    pub async fn revoke_user(&self, user_id: &str) -> Result<bool> {
        check_user_id(user_id)?;
        let started = Utc::now();
        let result = self.revoke_user_inner(user_id).await;
        self.record_audit(AuditAction::RevokeSession, user_id, started, &result).await;
        result
    }

    async fn revoke_user_inner(&self, user_id: &str) -> Result<bool> {
        let reverse_key = self.reverse_key(user_id);
        let Some(token) = self.cache.get(&reverse_key).await else {
            return Ok(false);
        };
        if !self.cache.delete(&[self.forward_key(&token), reverse_key]).await {
            return Err(AuthError::write_not_guaranteed("session delete"));
        }
        Ok(true)
    }

    /// Builds the context for one incoming request.
    ///
    /// A missing or rejected token yields a context without identity. The
    /// context is always fresh; nothing carries over from earlier requests.
    pub async fn enter(&self, token: Option<&str>, ip: Option<ClientIp>) -> RequestContext<S> {
        let identity = match token {
            Some(token) => self.validate(token).await,
            None => None,
        };
        RequestContext::new(identity, ip)
    }

    async fn record_audit<R>(
        &self,
        action: AuditAction,
        user_id: &str,
        started_at: DateTime<Utc>,
        result: &Result<R>,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        let event = AuditEvent::builder()
            .started_at(started_at)
            .actor(user_id)
            .action(action)
            .resource(format!("sessions/{user_id}"))
            .result(AuditResult::from_result(result))
            .build();
        audit.log(&event).await;
    }
}
