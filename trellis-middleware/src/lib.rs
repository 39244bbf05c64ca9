//! Stock middleware for Trellis applications.
//!
//! Every middleware comes in two flavours: a zero-argument constructor
//! using the defaults (`cors()`, `gzip()`, ...) and a `*_with` variant
//! taking its config struct.
//!
//! ```
//! use trellis_core::App;
//! use trellis_middleware::{cors, gzip, logger, recover, request_id, secure};
//!
//! let mut app = App::new();
//! app.pre(request_id());
//! app.use_middleware(logger())
//!     .use_middleware(recover())
//!     .use_middleware(secure())
//!     .use_middleware(cors())
//!     .use_middleware(gzip());
//! ```

pub mod cors;
pub mod gzip;
pub mod logger;
pub mod recover;
pub mod request_id;
pub mod secure;

pub use cors::{CorsConfig, cors, cors_with};
pub use gzip::{GzipConfig, GzipMiddleware, gzip, gzip_with};
pub use logger::{LoggerConfig, logger, logger_with};
pub use recover::{RecoverConfig, recover, recover_with};
pub use request_id::{RequestIdConfig, X_REQUEST_ID, request_id, request_id_with};
pub use secure::{SecureConfig, secure, secure_with};

use std::sync::Arc;
use trellis_core::Context;

/// Decides per request whether a middleware steps aside.
pub type Skipper = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

pub(crate) fn skipped(skipper: &Option<Skipper>, c: &Context) -> bool {
    skipper.as_ref().is_some_and(|skip| skip(c))
}
