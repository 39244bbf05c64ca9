// Core of the Trellis HTTP framework
// Routing, the pooled request context, middleware composition, dispatch and
// the server lifecycle.

pub mod app;
pub mod binder;
pub mod config;
pub mod context;
pub mod cookie;
pub mod envelope;
pub mod error;
pub mod group;
pub mod handler;
pub mod logging;
pub mod middleware;
pub mod pool;
pub mod response;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod tls;
pub mod validation;

// Re-export commonly used types
pub use app::{App, ErrorHandler, METHODS, default_error_handler};
pub use binder::{Binder, DefaultBinder};
pub use config::{Config, DuplicateRoutePolicy};
pub use context::{ConnectionInfo, Context, QueryParams};
pub use cookie::{Cookie, SameSite};
pub use envelope::Envelope;
pub use error::{Error, HttpError, Result, ValidationErrors};
pub use group::Group;
pub use handler::{Handler, HandlerFuture, method_not_allowed_handler, not_found_handler};
pub use middleware::{Middleware, MiddlewareFunc, compose};
pub use pool::PooledContext;
pub use response::Response;
pub use router::{Resolution, Route, Router};
pub use server::Server;
pub use tls::{
    ACME_TLS_ALPN, CertificateProvider, DirectoryCertProvider, TlsConfig, certified_key,
    certified_key_from_pem,
};
pub use validation::{DefaultValidator, Validate, Validator};

pub use http::{Method, StatusCode};
