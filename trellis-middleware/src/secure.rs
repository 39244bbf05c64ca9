//! Security response headers
//!
//! Sets `X-XSS-Protection`, `X-Content-Type-Options`, `X-Frame-Options`,
//! `Strict-Transport-Security` and `Content-Security-Policy`. An empty value
//! in [`SecureConfig`] leaves the matching header off.

use crate::{Skipper, skipped};
use http::header::{self, HeaderName, HeaderValue};
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use trellis_core::{Context, MiddlewareFunc};

#[derive(Clone)]
pub struct SecureConfig {
    pub skipper: Option<Skipper>,
    pub xss_protection: String,
    pub content_type_nosniff: String,
    pub x_frame_options: String,
    /// Seconds; 0 disables HSTS.
    pub hsts_max_age: u64,
    pub hsts_exclude_subdomains: bool,
    pub content_security_policy: String,
}

impl Default for SecureConfig {
    fn default() -> Self {
        Self {
            skipper: None,
            xss_protection: "1; mode=block".to_string(),
            content_type_nosniff: "nosniff".to_string(),
            x_frame_options: "SAMEORIGIN".to_string(),
            hsts_max_age: 0,
            hsts_exclude_subdomains: false,
            content_security_policy: String::new(),
        }
    }
}

impl SecureConfig {
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

    pub fn xss_protection(mut self, value: impl Into<String>) -> Self {
        self.xss_protection = value.into();
        self
    }

    pub fn content_type_nosniff(mut self, value: impl Into<String>) -> Self {
        self.content_type_nosniff = value.into();
        self
    }

    pub fn x_frame_options(mut self, value: impl Into<String>) -> Self {
        self.x_frame_options = value.into();
        self
    }

    pub fn hsts_max_age(mut self, seconds: u64) -> Self {
        self.hsts_max_age = seconds;
        self
    }

    pub fn hsts_exclude_subdomains(mut self, exclude: bool) -> Self {
        self.hsts_exclude_subdomains = exclude;
        self
    }

    pub fn content_security_policy(mut self, policy: impl Into<String>) -> Self {
        self.content_security_policy = policy.into();
        self
    }

    fn hsts_value(&self) -> String {
        if self.hsts_exclude_subdomains {
            format!("max-age={}", self.hsts_max_age)
        } else {
            format!("max-age={}; includeSubdomains", self.hsts_max_age)
        }
    }
}

impl fmt::Debug for SecureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureConfig")
            .field("skipper", &self.skipper.is_some())
            .field("xss_protection", &self.xss_protection)
            .field("content_type_nosniff", &self.content_type_nosniff)
            .field("x_frame_options", &self.x_frame_options)
            .field("hsts_max_age", &self.hsts_max_age)
            .field("hsts_exclude_subdomains", &self.hsts_exclude_subdomains)
            .field("content_security_policy", &self.content_security_policy)
            .finish()
    }
}

/// Header values rendered once, when the middleware is built.
struct Rendered {
    always: Vec<(HeaderName, HeaderValue)>,
    hsts: Option<HeaderValue>,
}

fn render(name: &HeaderName, value: &str) -> Option<HeaderValue> {
    if value.is_empty() {
        return None;
    }
    match HeaderValue::from_str(value) {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(header = %name, value, "Ignoring invalid security header value");
            None
        }
    }
}

impl Rendered {
    fn new(config: &SecureConfig) -> Self {
        let always = [
            (header::X_XSS_PROTECTION, config.xss_protection.as_str()),
            (header::X_CONTENT_TYPE_OPTIONS, config.content_type_nosniff.as_str()),
            (header::X_FRAME_OPTIONS, config.x_frame_options.as_str()),
            (
                header::CONTENT_SECURITY_POLICY,
                config.content_security_policy.as_str(),
            ),
        ]
        .into_iter()
        .filter_map(|(name, value)| render(&name, value).map(|v| (name, v)))
        .collect();

        let hsts = if config.hsts_max_age > 0 {
            render(&header::STRICT_TRANSPORT_SECURITY, &config.hsts_value())
        } else {
            None
        };

        Self { always, hsts }
    }
}

pub fn secure() -> MiddlewareFunc {
    secure_with(SecureConfig::default())
}

pub fn secure_with(config: SecureConfig) -> MiddlewareFunc {
    let rendered = Arc::new(Rendered::new(&config));
    let skipper = config.skipper;
    MiddlewareFunc::from_fn(move |c, next| {
        let rendered = rendered.clone();
        let skipper = skipper.clone();
        Box::pin(async move {
            if skipped(&skipper, c) {
                return next.call(c).await;
            }

            let over_tls = c.is_tls() || c.header("x-forwarded-proto") == Some("https");
            let response = c.response_mut();
            for (name, value) in &rendered.always {
                response.set_header(name.clone(), value.clone());
            }
            if over_tls {
                if let Some(hsts) = &rendered.hsts {
                    response.set_header(header::STRICT_TRANSPORT_SECURITY, hsts.clone());
                }
            }
            next.call(c).await
        })
    })
}
