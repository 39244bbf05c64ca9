// Trellis - a small HTTP dispatch core for Rust
//
// A priority router, pooled request contexts, two-phase middleware, route
// groups and a server with graceful shutdown over plain TCP and TLS.

// Re-export core functionality
pub use trellis_core::*;

// Re-export optional crates
#[cfg(feature = "middleware")]
pub use trellis_middleware as middleware;

#[cfg(feature = "acme")]
pub use trellis_acme as acme;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        App, Config, Context, Envelope, Error, Group, Handler, HttpError, Method, Middleware,
        MiddlewareFunc, Result, Server, StatusCode, ValidationErrors,
    };

    #[cfg(feature = "middleware")]
    pub use crate::middleware::{cors, gzip, logger, recover, request_id, secure};
}
