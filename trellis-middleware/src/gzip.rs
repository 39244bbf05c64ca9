//! Gzip response compression
//!
//! Responses are buffered, so compression happens after the rest of the
//! chain has written the body.

use crate::{Skipper, skipped};
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::StatusCode;
use http::header::{self, HeaderValue};
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use tracing::trace;
use trellis_core::{Context, Error, Handler, Middleware, MiddlewareFunc, Response};

const GZIP: &str = "gzip";

#[derive(Clone)]
pub struct GzipConfig {
    pub skipper: Option<Skipper>,
    /// 0-9, or -1 for the library default.
    pub level: i32,
    /// Bodies shorter than this are sent as is.
    pub min_length: usize,
}

impl Default for GzipConfig {
    fn default() -> Self {
        Self {
            skipper: None,
            level: -1,
            min_length: 0,
        }
    }
}

impl GzipConfig {
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

    pub fn level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn min_length(mut self, bytes: usize) -> Self {
        self.min_length = bytes;
        self
    }

    fn compression(&self) -> Compression {
        match u32::try_from(self.level) {
            Ok(level) => Compression::new(level.min(9)),
            Err(_) => Compression::default(),
        }
    }
}

impl fmt::Debug for GzipConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipConfig")
            .field("skipper", &self.skipper.is_some())
            .field("level", &self.level)
            .field("min_length", &self.min_length)
            .finish()
    }
}

pub fn gzip() -> MiddlewareFunc {
    gzip_with(GzipConfig::default())
}

pub fn gzip_with(config: GzipConfig) -> MiddlewareFunc {
    MiddlewareFunc::from_middleware(GzipMiddleware::new(config))
}

/// Struct form of [`gzip_with`].
#[derive(Debug, Clone)]
pub struct GzipMiddleware {
    config: GzipConfig,
}

impl GzipMiddleware {
    pub fn new(config: GzipConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Middleware for GzipMiddleware {
    async fn handle(&self, c: &mut Context, next: Handler) -> Result<(), Error> {
        if skipped(&self.config.skipper, c) || !accepts_gzip(c) {
            return next.call(c).await;
        }

        c.response_mut()
            .headers_mut()
            .append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        next.call(c).await?;

        let response = c.response_mut();
        if !should_compress(response, self.config.min_length) {
            return Ok(());
        }
        let compressed = compress(response.body(), self.config.compression())?;
        trace!(
            original = response.size(),
            compressed = compressed.len(),
            "Compressed response body"
        );
        response.replace_body(compressed);
        response.set_header(header::CONTENT_ENCODING, HeaderValue::from_static(GZIP));
        response.headers_mut().remove(header::CONTENT_LENGTH);
        Ok(())
    }
}

fn accepts_gzip(c: &Context) -> bool {
    c.request()
        .headers()
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(GZIP))
}

fn should_compress(response: &Response, min_length: usize) -> bool {
    let status = response.status();
    !response.body().is_empty()
        && response.size() >= min_length
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
        && !response.headers().contains_key(header::CONTENT_ENCODING)
}

fn compress(body: &[u8], level: Compression) -> Result<Vec<u8>, Error> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), level);
    encoder.write_all(body)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use flate2::read::GzDecoder;
    use http::Request;
    use http_body_util::BodyExt;
    use std::io::Read;
    use trellis_core::{App, HttpError};

    fn app(config: GzipConfig) -> App {
        let mut app = App::new();
        app.use_middleware(gzip_with(config));
        app.get(
            "/",
            Handler::new(|c| Box::pin(async move { c.string(StatusCode::OK, "test") })),
        )
        .unwrap();
        app.get(
            "/empty",
            Handler::new(|c| Box::pin(async move { c.no_content(StatusCode::NO_CONTENT) })),
        )
        .unwrap();
        app.get(
            "/missing",
            Handler::new(|_c| Box::pin(async { Err(Error::from(HttpError::not_found())) })),
        )
        .unwrap();
        app
    }

    fn get(uri: &str, accept_gzip: bool) -> Request<Bytes> {
        let mut builder = Request::get(uri);
        if accept_gzip {
            builder = builder.header("Accept-Encoding", "gzip, deflate");
        }
        builder.body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn test_without_accept_encoding() {
        let response = app(GzipConfig::default()).serve(get("/", false)).await;
        assert!(!response.headers().contains_key("content-encoding"));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"test");
    }

    #[tokio::test]
    async fn test_compresses_body() {
        let response = app(GzipConfig::default()).serve(get("/", true)).await;
        assert_eq!(response.headers()["content-encoding"], "gzip");
        assert_eq!(response.headers()["vary"], "Accept-Encoding");
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let mut decoded = String::new();
        GzDecoder::new(body.as_ref())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "test");
    }

    #[tokio::test]
    async fn test_no_content_is_left_alone() {
        let response = app(GzipConfig::default()).serve(get("/empty", true)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!response.headers().contains_key("content-encoding"));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_error_responses_are_not_encoded() {
        let response = app(GzipConfig::default()).serve(get("/missing", true)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!response.headers().contains_key("content-encoding"));
    }

    #[tokio::test]
    async fn test_min_length() {
        let response = app(GzipConfig::new().min_length(1024)).serve(get("/", true)).await;
        assert!(!response.headers().contains_key("content-encoding"));
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(GzipConfig::default().compression(), Compression::default());
        assert_eq!(GzipConfig::new().level(12).compression(), Compression::best());
        assert_eq!(GzipConfig::new().level(1).compression(), Compression::fast());
    }
}
