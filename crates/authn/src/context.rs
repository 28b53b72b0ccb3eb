//! Request-scoped identity.
//!
//! A [`RequestContext`] is installed for the duration of one request with
//! [`scope`](RequestContext::scope) and read anywhere below it with
//! [`current`](RequestContext::current). The context lives in a Tokio task
//! local, so it is removed when the scoped future completes, returns an
//! error, panics or is dropped. Tasks spawned from inside a scope do not
//! inherit it.

use std::{any::Any, fmt, future::Future, sync::Arc};

use crate::identity::{ClientIp, SessionSubject};

tokio::task_local! {
    static CURRENT: Arc<dyn Any + Send + Sync>;
}

/// Identity and caller address for the request being handled.
#[derive(Clone)]
pub struct RequestContext<S: SessionSubject> {
    identity: Option<S>,
    ip: Option<ClientIp>,
}

impl<S: SessionSubject> fmt::Debug for RequestContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("user_id", &self.user_id())
            .field("ip", &self.ip)
            .finish()
    }
}

impl<S: SessionSubject> RequestContext<S> {
    /// Creates a context.
    #[must_use]
    pub fn new(identity: Option<S>, ip: Option<ClientIp>) -> Self {
        Self { identity, ip }
    }

    /// The resolved identity, `None` for anonymous requests.
    #[must_use]
    pub fn identity(&self) -> Option<&S> {
        self.identity.as_ref()
    }

    /// Id of the resolved identity.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(SessionSubject::user_id)
    }

    /// The caller's address.
    #[must_use]
    pub fn ip(&self) -> Option<&ClientIp> {
        self.ip.as_ref()
    }

    /// Runs `fut` with this context installed.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(Arc::new(self), fut).await
    }

    /// Runs `f` with this context installed, synchronously.
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(Arc::new(self), f)
    }

    /// A copy of the installed context, `None` outside a scope.
    #[must_use]
    pub fn current() -> Option<Self> {
        Self::with_current(Clone::clone)
    }

    /// Applies `f` to the installed context without cloning it.
    ///
    /// Returns `None` outside a scope, or when the installed context holds a
    /// different subject type.
    pub fn with_current<R>(f: impl FnOnce(&Self) -> R) -> Option<R> {
        CURRENT.try_with(|installed| (**installed).downcast_ref::<Self>().map(f)).ok().flatten()
    }
}
