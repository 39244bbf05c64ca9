//! The application: route registration and request dispatch.
//!
//! ```
//! use trellis_core::{App, Handler, StatusCode};
//!
//! let mut app = App::new();
//! app.get("/users/:id", Handler::named("users.show", |c| Box::pin(async move {
//!     let id = c.param("id").to_string();
//!     c.string(StatusCode::OK, id)
//! })))
//! .unwrap();
//!
//! assert_eq!(app.reverse("users.show", &["42"]).as_deref(), Some("/users/42"));
//! ```

use crate::config::Config;
use crate::context::Context;
use crate::envelope::STATUS_FAILED;
use crate::error::{Error, HttpError, Result, ValidationErrors};
use crate::group::Group;
use crate::handler::Handler;
use crate::middleware::{MiddlewareFunc, compose};
use crate::pool::{ContextPool, DEFAULT_MAX_IDLE, PooledContext};
use crate::router::{Route, Router};
use crate::validation::{DefaultValidator, Validator};
use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

/// Central error handler, invoked with every error a chain returns.
pub type ErrorHandler = Arc<dyn Fn(Error, &mut Context) + Send + Sync>;

/// Every method `App::any` registers.
pub const METHODS: [Method; 9] = [
    Method::CONNECT,
    Method::DELETE,
    Method::GET,
    Method::HEAD,
    Method::OPTIONS,
    Method::PATCH,
    Method::POST,
    Method::PUT,
    Method::TRACE,
];

/// State every context of an application sees.
#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) router: Router,
    pub(crate) premiddleware: Vec<MiddlewareFunc>,
    pub(crate) middleware: Vec<MiddlewareFunc>,
    pub(crate) validator: Option<Arc<dyn Validator>>,
    pub(crate) error_handler: ErrorHandler,
}

pub struct App {
    shared: Arc<Shared>,
    pool: ContextPool,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let router = Router::new(config.duplicate_routes);
        Self {
            shared: Arc::new(Shared {
                config,
                router,
                premiddleware: Vec::new(),
                middleware: Vec::new(),
                validator: Some(Arc::new(DefaultValidator)),
                error_handler: Arc::new(default_error_handler),
            }),
            pool: ContextPool::new(DEFAULT_MAX_IDLE),
        }
    }

    /// Build from `.env` and the process environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self::with_config(Config::load()?))
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn router(&self) -> &Router {
        &self.shared.router
    }

    fn shared_mut(&mut self) -> &mut Shared {
        Arc::make_mut(&mut self.shared)
    }

    // ===== Registration =====

    /// Add middleware that runs before routing.
    ///
    /// Pre-middleware sees every request, including ones that end in 404,
    /// and may rewrite the request before the router looks at it.
    pub fn pre(&mut self, middleware: MiddlewareFunc) -> &mut Self {
        self.shared_mut().premiddleware.push(middleware);
        self
    }

    /// Add middleware that runs after routing, around every handler.
    pub fn use_middleware(&mut self, middleware: MiddlewareFunc) -> &mut Self {
        self.shared_mut().middleware.push(middleware);
        self
    }

    pub fn set_error_handler<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Error, &mut Context) + Send + Sync + 'static,
    {
        self.shared_mut().error_handler = Arc::new(handler);
        self
    }

    pub fn set_validator<V: Validator + 'static>(&mut self, validator: V) -> &mut Self {
        self.shared_mut().validator = Some(Arc::new(validator));
        self
    }

    /// Unregister the validator; `Context::validate` then fails with
    /// [`Error::ValidatorNotRegistered`].
    pub fn clear_validator(&mut self) -> &mut Self {
        self.shared_mut().validator = None;
        self
    }

    /// Register `handler` for `method` and `path`, wrapped in route-level
    /// `middleware` (first entry outermost).
    pub fn add(
        &mut self,
        method: Method,
        path: &str,
        handler: Handler,
        middleware: &[MiddlewareFunc],
    ) -> Result<Route> {
        let chain = compose(handler.clone(), middleware);
        let route = self
            .shared_mut()
            .router
            .insert(method, path, chain, handler)?;
        debug!(method = %route.method, path = %route.path, name = %route.name, "Route registered");
        Ok(route)
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

    /// Register `handler` for every standard method.
    pub fn any(
        &mut self,
        path: &str,
        handler: Handler,
        middleware: &[MiddlewareFunc],
    ) -> Result<Vec<Route>> {
        self.match_methods(&METHODS, path, handler, middleware)
    }

    /// Register `handler` for each of `methods`.
    ///
    /// Under the reject policy nothing is registered if any of the methods
    /// is already taken.
    pub fn match_methods(
        &mut self,
        methods: &[Method],
        path: &str,
        handler: Handler,
        middleware: &[MiddlewareFunc],
    ) -> Result<Vec<Route>> {
        if self.shared.router.policy() == crate::config::DuplicateRoutePolicy::Reject {
            if let Some(taken) = methods
                .iter()
                .find(|m| self.shared.router.contains(m, path))
            {
                return Err(Error::DuplicateRoute {
                    method: taken.clone(),
                    path: path.to_string(),
                });
            }
        }
        methods
            .iter()
            .map(|m| self.add(m.clone(), path, handler.clone(), middleware))
            .collect()
    }

    /// Open a route group under `prefix` with its own middleware.
    pub fn group(&mut self, prefix: &str, middleware: &[MiddlewareFunc]) -> Group<'_> {
        Group::new(self, prefix.to_string(), middleware.to_vec())
    }

    // ===== Introspection =====

    /// Registered routes, sorted by path.
    pub fn routes(&self) -> Vec<Route> {
        self.shared.router.sorted_routes()
    }

    pub fn reverse(&self, name: &str, params: &[&str]) -> Option<String> {
        self.shared.router.reverse(name, params)
    }

    pub fn uri(&self, handler: &Handler, params: &[&str]) -> Option<String> {
        self.shared.router.uri(handler, params)
    }

    /// Log the route table in development mode.
    pub fn debug_routes(&self) {
        if !self.shared.config.dev_mode {
            return;
        }
        info!("{:-<120}", "");
        info!("{:<10} | {:<50} | {:<54}", "METHOD", "URL PATH", "REQ. HANDLER");
        info!("{:-<120}", "");
        for route in self.routes().iter().filter(|r| !r.path.contains('*')) {
            info!("{:<10} | {:<50} | {:<54}", route.method, route.path, route.name);
        }
        info!("{:-<120}", "");
    }

    // ===== Contexts =====

    /// A fresh context outside the pool, mostly useful in tests.
    pub fn new_context(&self, request: Request<Bytes>) -> Context {
        let mut c = Context::new(self.shared.clone());
        c.reset(request);
        c
    }

    /// Check a context out of the pool, reset for `request`.
    pub fn acquire_context(&self, request: Request<Bytes>) -> PooledContext<'_> {
        self.pool.acquire(&self.shared, request)
    }

    pub fn idle_contexts(&self) -> usize {
        self.pool.idle()
    }

    // ===== Dispatch =====

    /// Run `request` through the middleware chain and router.
    pub async fn serve(&self, request: Request<Bytes>) -> http::Response<Full<Bytes>> {
        let mut c = self.acquire_context(request);
        self.dispatch(&mut c).await;
        c.take_response()
    }

    /// Collect a streaming body, bounded by `Config::max_body_size`, and
    /// dispatch. Oversized bodies are answered with 413 through the error
    /// handler.
    pub async fn serve_incoming<B>(&self, request: Request<B>) -> http::Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = request.into_parts();
        match Limited::new(body, self.shared.config.max_body_size)
            .collect()
            .await
        {
            Ok(collected) => {
                self.serve(Request::from_parts(parts, collected.to_bytes()))
                    .await
            }
            Err(err) => {
                let mut c = self.acquire_context(Request::from_parts(parts, Bytes::new()));
                let http_error = if err.is::<http_body_util::LengthLimitError>() {
                    HttpError::payload_too_large()
                } else {
                    debug!(error = %err, "Failed to read request body");
                    HttpError::bad_request("Failed to read request body")
                };
                c.error(http_error.into());
                c.take_response()
            }
        }
    }

    async fn dispatch(&self, c: &mut Context) {
        let result = if self.shared.premiddleware.is_empty() {
            route_and_call(c).await
        } else {
            compose(routing_handler().clone(), &self.shared.premiddleware)
                .call(c)
                .await
        };
        if let Err(err) = result {
            c.error(err);
        }
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("config", &self.shared.config)
            .field("routes", &self.shared.router.len())
            .field("premiddleware", &self.shared.premiddleware.len())
            .field("middleware", &self.shared.middleware.len())
            .field("pool", &self.pool)
            .finish()
    }
}

/// Find the route for the context's current request, wrap it in the
/// service middleware and run it.
async fn route_and_call(c: &mut Context) -> Result<()> {
    let shared = c.shared.clone();
    let method = c.request().method().clone();
    let path = c.request().uri().path().to_owned();
    shared.router.find(&method, &path, c);
    let handler = compose(c.handler().clone(), &shared.middleware);
    handler.call(c).await
}

fn routing_handler() -> &'static Handler {
    static ROUTING: OnceLock<Handler> = OnceLock::new();
    ROUTING.get_or_init(|| Handler::named("Router", |c| Box::pin(route_and_call(c))))
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: &'static str,
    message: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a ValidationErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    internal: Option<String>,
}

/// The error handler installed by default.
///
/// Responds with `{"status":"failed","message":...}`, adding `errors` for
/// validation failures. Does nothing once the response is committed.
///
/// In dev mode the internal cause of an [`HttpError`] is appended to a
/// string message, or reported under `internal` when the message is
/// structured.
pub fn default_error_handler(err: Error, c: &mut Context) {
    let dev_mode = c.config().dev_mode;

    let (code, message, errors, detail) = match &err {
        Error::Http(he) => {
            let mut message = he.message.clone();
            let mut detail = None;
            if let Some(internal) = &he.internal {
                warn!(code = he.code.as_u16(), internal = %internal, "Request failed");
                if dev_mode {
                    if let Value::String(text) = &message {
                        message = Value::String(format!("{}, {}", text, internal));
                    } else {
                        detail = Some(internal.to_string());
                    }
                }
            }
            (he.code, message, None, detail)
        }
        Error::Validation(v) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            reason(StatusCode::UNPROCESSABLE_ENTITY),
            Some(v),
            None,
        ),
        other => {
            error!(error = %other, path = %c.path(), "Unhandled error");
            let message = if dev_mode {
                Value::String(other.to_string())
            } else {
                reason(StatusCode::INTERNAL_SERVER_ERROR)
            };
            (StatusCode::INTERNAL_SERVER_ERROR, message, None, None)
        }
    };

    if c.response().committed() {
        debug!(code = code.as_u16(), "Response already committed, error not written");
        return;
    }

    let body = ErrorBody {
        status: STATUS_FAILED,
        message,
        errors,
        internal: detail,
    };
    let written = if c.request().method() == Method::HEAD {
        c.no_content(code)
    } else {
        c.json(code, &body)
    };
    if let Err(e) = written {
        error!(error = %e, "Failed to write error response");
    }
}

fn reason(code: StatusCode) -> Value {
    Value::String(code.canonical_reason().unwrap_or_default().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicateRoutePolicy;
    use crate::error::ValidationErrors;
    use serde_json::json;

    fn ok(body: &'static str) -> Handler {
        Handler::new(move |c| Box::pin(async move { c.string(StatusCode::OK, body) }))
    }

    fn get(uri: &str) -> Request<Bytes> {
        Request::get(uri).body(Bytes::new()).unwrap()
    }

    async fn body_bytes(res: http::Response<Full<Bytes>>) -> Bytes {
        res.into_body().collect().await.unwrap().to_bytes()
    }

    fn json_body(res: &http::Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = futures_util::FutureExt::now_or_never(res.body().clone().collect())
            .unwrap()
            .unwrap()
            .to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_not_found_and_method_not_allowed() {
        let mut app = App::new();
        app.get("/users", ok("list")).unwrap();

        let res = app.serve(get("/nope")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(&res), json!({"status": "failed", "message": "Not Found"}));

        let res = app
            .serve(Request::delete("/users").body(Bytes::new()).unwrap())
            .await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_validation_error_is_422() {
        let mut app = App::new();
        app.post(
            "/users",
            Handler::new(|_c| {
                Box::pin(async move {
                    Err(Error::from(ValidationErrors::new().with("email", "required")))
                })
            }),
        )
        .unwrap();

        let res = app
            .serve(Request::post("/users").body(Bytes::new()).unwrap())
            .await;
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            json_body(&res),
            json!({
                "status": "failed",
                "message": "Unprocessable Entity",
                "errors": {"email": "required"}
            })
        );
    }

    #[tokio::test]
    async fn test_internal_errors_hidden_outside_dev_mode() {
        let failing = || Handler::new(|_c| Box::pin(async move { Err(Error::internal("db down")) }));

        let mut app = App::new();
        app.get("/", failing()).unwrap();
        let res = app.serve(get("/")).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(&res)["message"], "Internal Server Error");

        let mut dev = App::with_config(Config::new().with_dev_mode(true));
        dev.get("/", failing()).unwrap();
        let res = dev.serve(get("/")).await;
        assert_eq!(json_body(&res)["message"], "Internal server error: db down");
    }

    #[tokio::test]
    async fn test_http_error_internal_appended_in_dev_mode() {
        let handler = || {
            Handler::new(|_c| {
                Box::pin(async move {
                    Err(Error::from(
                        HttpError::bad_request("bad input")
                            .with_internal(std::io::Error::other("parse failed")),
                    ))
                })
            })
        };

        let mut app = App::new();
        app.get("/", handler()).unwrap();
        assert_eq!(json_body(&app.serve(get("/")).await)["message"], "bad input");

        let mut dev = App::with_config(Config::new().with_dev_mode(true));
        dev.get("/", handler()).unwrap();
        assert_eq!(
            json_body(&dev.serve(get("/")).await)["message"],
            "bad input, parse failed"
        );
    }

    #[tokio::test]
    async fn test_structured_message_reports_internal_separately() {
        let handler = || {
            Handler::new(|_c| {
                Box::pin(async move {
                    Err(Error::from(
                        HttpError::bad_request(json!({"field": "age"}))
                            .with_internal(std::io::Error::other("not a number")),
                    ))
                })
            })
        };

        let mut app = App::new();
        app.get("/", handler()).unwrap();
        let body = json_body(&app.serve(get("/")).await);
        assert_eq!(body["message"], json!({"field": "age"}));
        assert!(body.get("internal").is_none());

        let mut dev = App::with_config(Config::new().with_dev_mode(true));
        dev.get("/", handler()).unwrap();
        let body = json_body(&dev.serve(get("/")).await);
        assert_eq!(body["message"], json!({"field": "age"}));
        assert_eq!(body["internal"], "not a number");
    }

    #[tokio::test]
    async fn test_committed_response_is_not_overwritten() {
        let mut app = App::new();
        app.get(
            "/",
            Handler::new(|c| {
                Box::pin(async move {
                    c.string(StatusCode::ACCEPTED, "partial")?;
                    Err(Error::internal("late failure"))
                })
            }),
        )
        .unwrap();

        let res = app.serve(get("/")).await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_head_error_has_empty_body() {
        let app = App::new();
        let res = app
            .serve(Request::head("/missing").body(Bytes::new()).unwrap())
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(body_bytes(res).await.is_empty());
    }

    #[tokio::test]
    async fn test_custom_error_handler() {
        let mut app = App::new();
        app.set_error_handler(|err, c| {
            let _ = c.string(err.status_code(), "custom");
        });
        let res = app.serve(get("/missing")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_bytes(res).await, "custom");
    }

    #[test]
    fn test_duplicate_routes() {
        let mut app = App::new();
        app.get("/a", ok("1")).unwrap();
        assert!(matches!(
            app.get("/a", ok("2")),
            Err(Error::DuplicateRoute { .. })
        ));

        let mut app =
            App::with_config(Config::new().with_duplicate_routes(DuplicateRoutePolicy::Replace));
        app.get("/a", ok("1")).unwrap();
        assert!(app.get("/a", ok("2")).is_ok());
        assert_eq!(app.routes().len(), 1);
    }

    #[test]
    fn test_any_registers_every_method_or_nothing() {
        let mut app = App::new();
        let routes = app.any("/all", ok("any"), &[]).unwrap();
        assert_eq!(routes.len(), METHODS.len());

        let mut app = App::new();
        app.post("/all", ok("post")).unwrap();
        assert!(app.any("/all", ok("any"), &[]).is_err());
        assert_eq!(app.routes().len(), 1);
    }

    #[test]
    fn test_routes_sorted_by_path() {
        let mut app = App::new();
        app.get("/b", ok("b")).unwrap();
        app.get("/a", ok("a")).unwrap();
        app.post("/a", ok("a")).unwrap();
        let paths: Vec<_> = app.routes().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/a", "/a", "/b"]);
    }

    #[test]
    fn test_uri_by_handler_identity() {
        let mut app = App::new();
        let show = ok("show");
        app.get("/users/:id/files/*", show.clone()).unwrap();
        assert_eq!(
            app.uri(&show, &["7", "a/b.txt"]).as_deref(),
            Some("/users/7/files/a/b.txt")
        );
        assert_eq!(app.uri(&ok("other"), &[]), None);
    }

    #[tokio::test]
    async fn test_validator_not_registered() {
        struct Always;
        impl crate::Validate for Always {
            fn validate(&self) -> std::result::Result<(), ValidationErrors> {
                Ok(())
            }
        }

        let mut app = App::new();
        app.clear_validator();
        let c = app.new_context(get("/"));
        assert!(matches!(c.validate(&Always), Err(Error::ValidatorNotRegistered)));
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let mut app = App::with_config(Config::new().with_max_body_size(4));
        app.post("/", ok("ok")).unwrap();
        let res = app
            .serve_incoming(
                Request::post("/")
                    .body(Full::new(Bytes::from_static(b"way too long")))
                    .unwrap(),
            )
            .await;
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_contexts_return_to_pool() {
        let mut app = App::new();
        app.get("/", ok("ok")).unwrap();
        for _ in 0..3 {
            app.serve(get("/")).await;
        }
        assert_eq!(app.idle_contexts(), 1);
    }

    async fn explode(_c: &mut Context) -> Result<()> {
        panic!("handler exploded")
    }

    #[tokio::test]
    async fn test_context_returns_to_pool_after_panic() {
        use futures_util::FutureExt;
        use std::panic::AssertUnwindSafe;

        let mut app = App::new();
        app.get("/", Handler::new(|c| Box::pin(explode(c)))).unwrap();

        let outcome = AssertUnwindSafe(app.serve(get("/"))).catch_unwind().await;
        assert!(outcome.is_err());
        assert_eq!(app.idle_contexts(), 1);
    }

    #[tokio::test]
    async fn test_context_returns_to_pool_when_cancelled() {
        let mut app = App::new();
        app.get(
            "/",
            Handler::new(|_c| Box::pin(std::future::pending::<Result<()>>())),
        )
        .unwrap();

        let serving = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            app.serve(get("/")),
        )
        .await;
        assert!(serving.is_err());
        assert_eq!(app.idle_contexts(), 1);
    }
}
