//! Access logging
//!
//! Emits one `tracing` event per request once the rest of the chain has
//! finished. Errors are handed to the application's error handler first so
//! the logged status is the one the client receives.

use crate::{Skipper, skipped};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use trellis_core::{Context, MiddlewareFunc};

#[derive(Clone, Default)]
pub struct LoggerConfig {
    pub skipper: Option<Skipper>,
}

impl LoggerConfig {
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
}

impl fmt::Debug for LoggerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerConfig")
            .field("skipper", &self.skipper.is_some())
            .finish()
    }
}

pub fn logger() -> MiddlewareFunc {
    logger_with(LoggerConfig::default())
}

/// The returned middleware consumes errors: it reports them through
/// [`Context::error`] and resolves to `Ok(())`.
pub fn logger_with(config: LoggerConfig) -> MiddlewareFunc {
    let config = Arc::new(config);
    MiddlewareFunc::from_fn(move |c, next| {
        let config = config.clone();
        Box::pin(async move {
            if skipped(&config.skipper, c) {
                return next.call(c).await;
            }

            let start = Instant::now();
            let result = next.call(c).await;
            let failed = result.is_err();
            if let Err(err) = result {
                c.error(err);
            }
            let latency = start.elapsed();

            let request = c.request();
            let method = request.method().clone();
            let path = request.uri().path().to_string();
            let query = request.uri().query().unwrap_or_default().to_string();
            let user_agent = c.header(http::header::USER_AGENT).unwrap_or_default().to_string();
            let status = c.response().status().as_u16();
            let bytes = c.response().size();
            let ip = c.real_ip();

            if failed {
                warn!(
                    method = %method,
                    path = %path,
                    query = %query,
                    status,
                    bytes,
                    latency = ?latency,
                    ip = %ip,
                    user_agent = %user_agent,
                    "{}/{}", method, status
                );
            } else {
                info!(
                    method = %method,
                    path = %path,
                    query = %query,
                    status,
                    bytes,
                    latency = ?latency,
                    ip = %ip,
                    user_agent = %user_agent,
                    "{}/{}", method, status
                );
            }
            Ok(())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trellis_core::{App, Error, Handler, HttpError, StatusCode, default_error_handler};

    fn get(uri: &str) -> Request<Bytes> {
        Request::get(uri).body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn test_error_is_handled_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut app = App::new();
        app.set_error_handler(move |err, c| {
            counter.fetch_add(1, Ordering::SeqCst);
            default_error_handler(err, c);
        });
        app.use_middleware(logger());
        app.get(
            "/missing",
            Handler::new(|_c| Box::pin(async { Err(Error::from(HttpError::not_found())) })),
        )
        .unwrap();

        let response = app.serve(get("/missing?x=1")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_successful_request_passes_through() {
        let mut app = App::new();
        app.use_middleware(logger());
        app.get(
            "/",
            Handler::new(|c| Box::pin(async move { c.string(StatusCode::CREATED, "made") })),
        )
        .unwrap();

        let response = app.serve(get("/")).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_skipped_requests_keep_their_error() {
        let app = App::new();
        let mut c = app.new_context(get("/"));
        let chain = trellis_core::compose(
            Handler::new(|_c| Box::pin(async { Err(Error::from(StatusCode::IM_A_TEAPOT)) })),
            &[logger_with(LoggerConfig::new().skipper(|_| true))],
        );
        let err = chain.call(&mut c).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::IM_A_TEAPOT);
    }
}
