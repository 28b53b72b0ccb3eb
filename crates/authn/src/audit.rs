//! Audit events attributed to the requesting user.

use std::{fmt, marker::PhantomData};

use async_trait::async_trait;
use microbase_storage::{ACTOR_EMAIL_KEY, ACTOR_NAME_KEY, AuditEvent, AuditLogger};

use crate::{
    context::RequestContext,
    identity::{SessionSubject, UserIdentity},
};

/// Metadata key carrying the caller's address.
pub const ACTOR_IP_KEY: &str = "actor.ip";

/// Decorates an [`AuditLogger`], attributing events to the identity of the
/// current [`RequestContext`].
///
/// Events that already name an actor keep it. Metadata keys already present
/// are never overwritten. Outside a request scope events pass through as-is.
pub struct IdentityAuditLogger<L, S = UserIdentity> {
    inner: L,
    _subject: PhantomData<fn() -> S>,
}

impl<L, S> IdentityAuditLogger<L, S> {
    /// Wraps `inner`.
    pub fn new(inner: L) -> Self {
        Self { inner, _subject: PhantomData }
    }

    /// The wrapped logger.
    pub fn inner(&self) -> &L {
        &self.inner
    }
}

impl<L: fmt::Debug, S> fmt::Debug for IdentityAuditLogger<L, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityAuditLogger").field("inner", &self.inner).finish()
    }
}

fn attribute<S: SessionSubject>(event: &AuditEvent, context: &RequestContext<S>) -> AuditEvent {
    let mut event = event.clone();
    if let Some(subject) = context.identity() {
        if event.actor.is_none() {
            event.actor = Some(subject.user_id().to_owned());
        }
        if let Some(name) = subject.display_name() {
            event.metadata.entry(ACTOR_NAME_KEY.to_owned()).or_insert_with(|| name.to_owned());
        }
        if let Some(email) = subject.email() {
            event.metadata.entry(ACTOR_EMAIL_KEY.to_owned()).or_insert_with(|| email.to_owned());
        }
    }
    if let Some(ip) = context.ip() {
        event.metadata.entry(ACTOR_IP_KEY.to_owned()).or_insert_with(|| ip.to_string());
    }
    event
}

#[async_trait]
impl<L: AuditLogger, S: SessionSubject> AuditLogger for IdentityAuditLogger<L, S> {
    async fn log(&self, event: &AuditEvent) {
        match RequestContext::<S>::with_current(|context| attribute(event, context)) {
            Some(attributed) => self.inner.log(&attributed).await,
            None => self.inner.log(event).await,
        }
    }
}
