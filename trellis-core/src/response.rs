// Buffered response writer

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use std::fmt;
use tracing::warn;

type BeforeHook = Box<dyn FnOnce(&mut Response) + Send + Sync>;
type AfterHook = Box<dyn Fn(&Response) + Send + Sync>;

/// Outbound response owned by a [`Context`](crate::Context).
///
/// The status line is written once: the first `write_header` (or the first
/// body write, which implies 200) commits it. Later header writes are
/// ignored with a warning while body writes keep appending.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    size: usize,
    committed: bool,
    before: Vec<BeforeHook>,
    after: Vec<AfterHook>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            size: 0,
            committed: false,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Set `name` only if the response does not already carry it.
    pub fn set_header_if_absent(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.entry(name).or_insert(value);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Bytes written so far.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn committed(&self) -> bool {
        self.committed
    }

    /// Register a hook that runs just before the status line is committed.
    pub fn before<F>(&mut self, hook: F)
    where
        F: FnOnce(&mut Response) + Send + Sync + 'static,
    {
        self.before.push(Box::new(hook));
    }

    /// Register a hook that runs after every body write.
    pub fn after<F>(&mut self, hook: F)
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.after.push(Box::new(hook));
    }

    pub fn write_header(&mut self, code: StatusCode) {
        if self.committed {
            warn!(
                current = self.status.as_u16(),
                attempted = code.as_u16(),
                "Response already committed"
            );
            return;
        }
        self.status = code;
        for hook in std::mem::take(&mut self.before) {
            hook(self);
        }
        self.committed = true;
    }

    /// Append body bytes, committing a 200 status first if needed.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if !self.committed {
            self.write_header(StatusCode::OK);
        }
        self.body.extend_from_slice(data);
        self.size += data.len();
        for hook in &self.after {
            hook(self);
        }
        data.len()
    }

    /// Swap the buffered body for `body`, e.g. after compressing it.
    pub fn replace_body(&mut self, body: impl Into<Bytes>) {
        let body = body.into();
        self.body.clear();
        self.body.extend_from_slice(&body);
        self.size = body.len();
    }

    pub(crate) fn reset(&mut self) {
        self.status = StatusCode::OK;
        self.headers.clear();
        self.body.clear();
        self.size = 0;
        self.committed = false;
        self.before.clear();
        self.after.clear();
    }

    /// Move the buffered response out, leaving this writer empty.
    pub(crate) fn take(&mut self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body.split().freeze()));
        *res.status_mut() = self.status;
        *res.headers_mut() = std::mem::take(&mut self.headers);
        res
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("size", &self.size)
            .field("committed", &self.committed)
            .finish_non_exhaustive()
    }
}
