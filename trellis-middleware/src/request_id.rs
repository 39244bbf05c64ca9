//! X-Request-ID propagation

use crate::{Skipper, skipped};
use http::header::{HeaderName, HeaderValue};
use std::fmt;
use std::sync::Arc;
use trellis_core::{Context, Error, MiddlewareFunc};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

pub type Generator = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Clone)]
pub struct RequestIdConfig {
    pub skipper: Option<Skipper>,
    pub generator: Generator,
}

impl Default for RequestIdConfig {
    fn default() -> Self {
        Self {
            skipper: None,
            generator: Arc::new(|| uuid::Uuid::new_v4().simple().to_string()),
        }
    }
}

impl RequestIdConfig {
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

    pub fn generator<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.generator = Arc::new(generator);
        self
    }
}

impl fmt::Debug for RequestIdConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestIdConfig")
            .field("skipper", &self.skipper.is_some())
            .finish_non_exhaustive()
    }
}

pub fn request_id() -> MiddlewareFunc {
    request_id_with(RequestIdConfig::default())
}

/// Echo the incoming `X-Request-ID`, or mint one, on the response.
pub fn request_id_with(config: RequestIdConfig) -> MiddlewareFunc {
    let config = Arc::new(config);
    MiddlewareFunc::from_fn(move |c, next| {
        let config = config.clone();
        Box::pin(async move {
            if skipped(&config.skipper, c) {
                return next.call(c).await;
            }

            let id = match c.request().headers().get(&X_REQUEST_ID) {
                Some(existing) if !existing.is_empty() => existing.clone(),
                _ => HeaderValue::from_str(&(config.generator)())
                    .map_err(|e| Error::internal(format!("invalid request id: {}", e)))?,
            };
            c.response_mut().set_header(X_REQUEST_ID, id);
            next.call(c).await
        })
    })
}
