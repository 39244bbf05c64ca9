//! Route groups.
//!
//! A [`Group`] registers routes under a common path prefix and wraps them in
//! shared middleware. Groups nest: prefixes concatenate and the parent's
//! middleware runs before the child's.
//!
//! ```
//! use trellis_core::{App, Handler, MiddlewareFunc, StatusCode};
//!
//! let auth = MiddlewareFunc::from_fn(|c, next| Box::pin(async move { next.call(c).await }));
//! let list = Handler::named("admin.users", |c| Box::pin(async move {
//!     c.string(StatusCode::OK, "users")
//! }));
//!
//! let mut app = App::new();
//! let mut api = app.group("/api", &[]);
//! let mut admin = api.group("/admin", &[auth]);
//! admin.get("/users", list).unwrap();
//!
//! assert_eq!(app.reverse("admin.users", &[]).as_deref(), Some("/api/admin/users"));
//! ```

use crate::app::{App, METHODS};
use crate::error::Result;
use crate::handler::Handler;
use crate::middleware::MiddlewareFunc;
use crate::router::Route;
use http::Method;

pub struct Group<'a> {
    app: &'a mut App,
    prefix: String,
    middleware: Vec<MiddlewareFunc>,
}

impl<'a> Group<'a> {
    pub(crate) fn new(app: &'a mut App, prefix: String, middleware: Vec<MiddlewareFunc>) -> Self {
        Self {
            app,
            prefix,
            middleware,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Append middleware for routes registered from now on.
    pub fn use_middleware(&mut self, middleware: MiddlewareFunc) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// A sub-group; its prefix and middleware extend this group's.
    pub fn group(&mut self, prefix: &str, middleware: &[MiddlewareFunc]) -> Group<'_> {
        let mut combined = self.middleware.clone();
        combined.extend_from_slice(middleware);
        Group {
            app: &mut *self.app,
            prefix: format!("{}{}", self.prefix, prefix),
            middleware: combined,
        }
    }

    pub fn add(
        &mut self,
        method: Method,
        path: &str,
        handler: Handler,
        middleware: &[MiddlewareFunc],
    ) -> Result<Route> {
        let mut combined = self.middleware.clone();
        combined.extend_from_slice(middleware);
        let full_path = format!("{}{}", self.prefix, path);
        self.app.add(method, &full_path, handler, &combined)
    }

    pub fn connect(&mut self, path: &str, handler: Handler) -> Result<Route> {
        self.add(Method::CONNECT, path, handler, &[])
    }

    pub fn delete(&mut self, path: &str, handler: Handler) -> Result<Route> {
        self.add(Method::DELETE, path, handler, &[])
    }

    pub fn get(&mut self, path: &str, handler: Handler) -> Result<Route> {
        self.add(Method::GET, path, handler, &[])
    }

    pub fn head(&mut self, path: &str, handler: Handler) -> Result<Route> {
        self.add(Method::HEAD, path, handler, &[])
    }

    pub fn options(&mut self, path: &str, handler: Handler) -> Result<Route> {
        self.add(Method::OPTIONS, path, handler, &[])
    }

    pub fn patch(&mut self, path: &str, handler: Handler) -> Result<Route> {
        self.add(Method::PATCH, path, handler, &[])
    }

    pub fn post(&mut self, path: &str, handler: Handler) -> Result<Route> {
        self.add(Method::POST, path, handler, &[])
    }

    pub fn put(&mut self, path: &str, handler: Handler) -> Result<Route> {
        self.add(Method::PUT, path, handler, &[])
    }

    pub fn trace(&mut self, path: &str, handler: Handler) -> Result<Route> {
        self.add(Method::TRACE, path, handler, &[])
    }

    pub fn any(
        &mut self,
        path: &str,
        handler: Handler,
        middleware: &[MiddlewareFunc],
    ) -> Result<Vec<Route>> {
        self.match_methods(&METHODS, path, handler, middleware)
    }

    pub fn match_methods(
        &mut self,
        methods: &[Method],
        path: &str,
        handler: Handler,
        middleware: &[MiddlewareFunc],
    ) -> Result<Vec<Route>> {
        let mut combined = self.middleware.clone();
        combined.extend_from_slice(middleware);
        let full_path = format!("{}{}", self.prefix, path);
        self.app
            .match_methods(methods, &full_path, handler, &combined)
    }
}

#[cfg(test)]
mod tests {
    use crate::{App, Handler, StatusCode};

    fn ok() -> Handler {
        Handler::new(|c| Box::pin(async move { c.no_content(StatusCode::OK) }))
    }

    #[test]
    fn test_prefixes_concatenate() {
        let mut app = App::new();
        {
            let mut v1 = app.group("/api/v1", &[]);
            v1.get("/status", ok()).unwrap();
            let mut users = v1.group("/users", &[]);
            users.get("/:id", ok()).unwrap();
            users.any("/bulk", ok(), &[]).unwrap();
        }
        let paths: Vec<_> = app.routes().into_iter().map(|r| r.path).collect();
        assert!(paths.contains(&"/api/v1/status".to_string()));
        assert!(paths.contains(&"/api/v1/users/:id".to_string()));
        assert_eq!(paths.iter().filter(|p| *p == "/api/v1/users/bulk").count(), 9);
    }
}
