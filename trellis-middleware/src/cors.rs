//! Cross-Origin Resource Sharing
//!
//! # Quick Start
//!
//! ```
//! use trellis_middleware::cors::{CorsConfig, cors_with};
//!
//! let cors = cors_with(
//!     CorsConfig::new()
//!         .allow_origins(["https://example.com"])
//!         .allow_credentials(true)
//!         .max_age(3600),
//! );
//! ```

use crate::{Skipper, skipped};
use http::header::{self, HeaderValue};
use http::{Method, StatusCode};
use std::fmt;
use std::sync::Arc;
use trellis_core::{Context, Error, MiddlewareFunc};

#[derive(Clone)]
pub struct CorsConfig {
    pub skipper: Option<Skipper>,
    /// `*` matches any origin.
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<Method>,
    /// Empty means echo `Access-Control-Request-Headers` on preflight.
    pub allow_headers: Vec<String>,
    pub allow_credentials: bool,
    pub expose_headers: Vec<String>,
    /// Preflight cache lifetime in seconds; 0 omits the header.
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            skipper: None,
            allow_origins: vec!["*".to_string()],
            allow_methods: vec![
                Method::GET,
                Method::HEAD,
                Method::PUT,
                Method::PATCH,
                Method::POST,
                Method::DELETE,
            ],
            allow_headers: Vec::new(),
            allow_credentials: false,
            expose_headers: Vec::new(),
            max_age: 600,
        }
    }
}

impl CorsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skipper<F>(mut self, skipper: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.skipper = Some(Arc::new(skipper));
        self
    }

    pub fn allow_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.allow_methods = methods.into_iter().collect();
        self
    }

    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    pub fn expose_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expose_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = seconds;
        self
    }

    /// The `Access-Control-Allow-Origin` value for `origin`, if allowed.
    ///
    /// A wildcard combined with credentials echoes the request origin,
    /// since browsers reject `*` on credentialed requests.
    fn allowed_origin<'o>(&'o self, origin: &'o str) -> Option<&'o str> {
        if origin.is_empty() {
            return None;
        }
        self.allow_origins.iter().find_map(|allowed| {
            if allowed == "*" {
                Some(if self.allow_credentials { origin } else { "*" })
            } else if allowed == origin {
                Some(allowed.as_str())
            } else {
                None
            }
        })
    }
}

impl fmt::Debug for CorsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorsConfig")
            .field("skipper", &self.skipper.is_some())
            .field("allow_origins", &self.allow_origins)
            .field("allow_methods", &self.allow_methods)
            .field("allow_headers", &self.allow_headers)
            .field("allow_credentials", &self.allow_credentials)
            .field("expose_headers", &self.expose_headers)
            .field("max_age", &self.max_age)
            .finish()
    }
}

/// Joined header values, computed once per middleware.
struct Prepared {
    config: CorsConfig,
    allow_methods: String,
    allow_headers: String,
    expose_headers: String,
}

pub fn cors() -> MiddlewareFunc {
    cors_with(CorsConfig::default())
}

pub fn cors_with(mut config: CorsConfig) -> MiddlewareFunc {
    let defaults = CorsConfig::default();
    if config.allow_origins.is_empty() {
        config.allow_origins = defaults.allow_origins;
    }
    if config.allow_methods.is_empty() {
        config.allow_methods = defaults.allow_methods;
    }

    let prepared = Arc::new(Prepared {
        allow_methods: config
            .allow_methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(","),
        allow_headers: config.allow_headers.join(","),
        expose_headers: config.expose_headers.join(","),
        config,
    });

    MiddlewareFunc::from_fn(move |c, next| {
        let prepared = prepared.clone();
        Box::pin(async move {
            if skipped(&prepared.config.skipper, c) {
                return next.call(c).await;
            }
            if c.method() == Method::OPTIONS {
                preflight(&prepared, c)?;
                if !c.response().committed() {
                    return next.call(c).await;
                }
                Ok(())
            } else {
                simple(&prepared, c)?;
                next.call(c).await
            }
        })
    })
}

fn value(s: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(s).map_err(|e| Error::internal(format!("invalid CORS header value: {}", e)))
}

fn simple(prepared: &Prepared, c: &mut Context) -> Result<(), Error> {
    let origin = c.header(header::ORIGIN).unwrap_or_default().to_string();
    let allowed = prepared.config.allowed_origin(&origin).map(value).transpose()?;

    let response = c.response_mut();
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Origin"));
    let Some(allowed) = allowed else {
        return Ok(());
    };

    response.set_header(header::ACCESS_CONTROL_ALLOW_ORIGIN, allowed);
    if prepared.config.allow_credentials {
        response.set_header(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
    if !prepared.expose_headers.is_empty() {
        response.set_header(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            value(&prepared.expose_headers)?,
        );
    }
    Ok(())
}

/// Answer an allowed preflight with 204. Disallowed preflights are left
/// uncommitted for the rest of the chain.
fn preflight(prepared: &Prepared, c: &mut Context) -> Result<(), Error> {
    let origin = c.header(header::ORIGIN).unwrap_or_default().to_string();
    let requested_headers = c
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .unwrap_or_default()
        .to_string();
    let allowed = prepared.config.allowed_origin(&origin).map(value).transpose()?;

    let response = c.response_mut();
    let vary = response.headers_mut();
    vary.append(header::VARY, HeaderValue::from_static("Origin"));
    vary.append(
        header::VARY,
        HeaderValue::from_static("Access-Control-Request-Method"),
    );
    vary.append(
        header::VARY,
        HeaderValue::from_static("Access-Control-Request-Headers"),
    );
    let Some(allowed) = allowed else {
        return Ok(());
    };

    response.set_header(header::ACCESS_CONTROL_ALLOW_ORIGIN, allowed);
    response.set_header(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        value(&prepared.allow_methods)?,
    );
    if prepared.config.allow_credentials {
        response.set_header(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
    if !prepared.allow_headers.is_empty() {
        response.set_header(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            value(&prepared.allow_headers)?,
        );
    } else if !requested_headers.is_empty() {
        response.set_header(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            value(&requested_headers)?,
        );
    }
    if prepared.config.max_age > 0 {
        response.set_header(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from(prepared.config.max_age),
        );
    }
    c.no_content(StatusCode::NO_CONTENT)
}
