// Request handlers

use crate::context::Context;
use crate::error::{Error, HttpError};
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Future returned by a handler, borrowing the context for its lifetime.
pub type HandlerFuture<'a> = BoxFuture<'a, Result<(), Error>>;

type HandlerFn = dyn for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync;

/// A cloneable, type-erased request handler.
///
/// Returning `Ok(())` means the response was written through the context;
/// returning `Err` hands the error to the application's error handler.
///
/// ```
/// use trellis_core::{Handler, StatusCode};
///
/// let hello = Handler::new(|c| Box::pin(async move {
///     c.string(StatusCode::OK, "hello")
/// }));
///
/// let named = Handler::named("users.show", |c| Box::pin(async move {
///     let id = c.param("id").to_string();
///     c.string(StatusCode::OK, id)
/// }));
/// assert_eq!(named.name(), Some("users.show"));
/// ```
#[derive(Clone)]
pub struct Handler {
    func: Arc<HandlerFn>,
    name: Option<Arc<str>>,
}

impl Handler {
    pub fn new<F>(func: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            name: None,
        }
    }

    /// Create a handler with a stable name, used for route listing and
    /// [`App::reverse`](crate::App::reverse).
    pub fn named<F>(name: impl Into<Arc<str>>, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            name: Some(name.into()),
        }
    }

    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn call<'a>(&self, c: &'a mut Context) -> HandlerFuture<'a> {
        (self.func)(c)
    }

    /// True when both handles point at the same underlying function.
    pub fn same_as(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn not_found<'a>(_: &'a mut Context) -> HandlerFuture<'a> {
    Box::pin(async { Err(Error::Http(HttpError::not_found())) })
}

fn method_not_allowed<'a>(_: &'a mut Context) -> HandlerFuture<'a> {
    Box::pin(async { Err(Error::Http(HttpError::method_not_allowed())) })
}

/// The not-found sentinel. Every call returns a clone of the same handler.
pub fn not_found_handler() -> Handler {
    static NOT_FOUND: OnceLock<Handler> = OnceLock::new();
    NOT_FOUND
        .get_or_init(|| Handler::named("NotFoundHandler", not_found))
        .clone()
}

/// The method-not-allowed sentinel.
pub fn method_not_allowed_handler() -> Handler {
    static METHOD_NOT_ALLOWED: OnceLock<Handler> = OnceLock::new();
    METHOD_NOT_ALLOWED
        .get_or_init(|| Handler::named("MethodNotAllowedHandler", method_not_allowed))
        .clone()
}
