// Middleware composition

use crate::context::Context;
use crate::error::Error;
use crate::handler::{Handler, HandlerFuture};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// A function from "next handler" to "handler".
///
/// Middleware may run code before and after calling `next`, or
/// short-circuit by not calling it at all.
///
/// ```
/// use trellis_core::{Handler, MiddlewareFunc};
///
/// let timing = MiddlewareFunc::from_fn(|c, next| Box::pin(async move {
///     let started = std::time::Instant::now();
///     let result = next.call(c).await;
///     tracing::debug!(elapsed = ?started.elapsed(), "request finished");
///     result
/// }));
/// ```
#[derive(Clone)]
pub struct MiddlewareFunc(Arc<dyn Fn(Handler) -> Handler + Send + Sync>);

impl MiddlewareFunc {
    pub fn new<F>(wrap: F) -> Self
    where
        F: Fn(Handler) -> Handler + Send + Sync + 'static,
    {
        Self(Arc::new(wrap))
    }

    /// Build middleware from an async function receiving the context and
    /// the next handler.
    pub fn from_fn<F>(func: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context, Handler) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        Self::new(move |next| {
            let func = func.clone();
            Handler::new(move |c| func(c, next.clone()))
        })
    }

    pub fn from_middleware<M: Middleware>(middleware: M) -> Self {
        let middleware = Arc::new(middleware);
        Self::new(move |next| {
            let middleware = middleware.clone();
            Handler::new(move |c| {
                let middleware = middleware.clone();
                let next = next.clone();
                Box::pin(async move { middleware.handle(c, next).await })
            })
        })
    }

    pub fn wrap(&self, next: Handler) -> Handler {
        (self.0)(next)
    }
}

impl fmt::Debug for MiddlewareFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MiddlewareFunc")
    }
}

/// Struct-based middleware, for interceptors that carry configuration.
///
/// Convert with [`MiddlewareFunc::from_middleware`].
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, c: &mut Context, next: Handler) -> Result<(), Error>;
}

/// Wrap `handler` so that `middleware[0]` runs first and `middleware[n-1]`
/// runs last, immediately before the handler.
pub fn compose(handler: Handler, middleware: &[MiddlewareFunc]) -> Handler {
    if !middleware.is_empty() {
        trace!(middleware_count = middleware.len(), "Composing middleware chain");
    }
    middleware
        .iter()
        .rev()
        .fold(handler, |next, m| m.wrap(next))
}
