//! Per-request context.
//!
//! A [`Context`] carries everything a handler needs for one request: the
//! inbound request, the buffered [`Response`], resolved path parameters,
//! a lazily parsed query map, a typed key/value store and the standard
//! [`Envelope`].
//!
//! Contexts are pooled. The dispatcher resets one at the start of every
//! request, so nothing set by a previous request is visible.

use crate::app::Shared;
use crate::binder::{Binder, DefaultBinder, MIME_APPLICATION_FORM};
use crate::config::Config;
use crate::cookie::Cookie;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::handler::{Handler, not_found_handler};
use crate::response::Response;
use crate::validation::Validate;
use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::{Method, Request, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const MIME_APPLICATION_JSON_UTF8: &str = "application/json; charset=UTF-8";
pub const MIME_APPLICATION_JAVASCRIPT_UTF8: &str = "application/javascript; charset=UTF-8";
pub const MIME_TEXT_PLAIN_UTF8: &str = "text/plain; charset=UTF-8";
pub const MIME_TEXT_HTML_UTF8: &str = "text/html; charset=UTF-8";
pub const MIME_TEXT_CSV: &str = "text/csv";

/// Query parameters, keyed by name, values in order of appearance.
pub type QueryParams = HashMap<String, Vec<String>>;

/// Connection details the server attaches to each request's extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub remote_addr: SocketAddr,
    pub tls: bool,
}

pub struct Context {
    request: Request<Bytes>,
    response: Response,
    pub(crate) path: String,
    pub(crate) pnames: Vec<String>,
    pub(crate) pvalues: Vec<String>,
    query: OnceLock<QueryParams>,
    store: HashMap<String, Box<dyn Any + Send + Sync>>,
    pub(crate) handler: Handler,
    pub(crate) shared: Arc<Shared>,
    envelope: Envelope,
}

impl Context {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            request: Request::new(Bytes::new()),
            response: Response::new(),
            path: String::new(),
            pnames: Vec::new(),
            pvalues: Vec::new(),
            query: OnceLock::new(),
            store: HashMap::new(),
            handler: not_found_handler(),
            shared,
            envelope: Envelope::new(),
        }
    }

    /// Bind the context to a new request, clearing all per-request state.
    ///
    /// Parameter vectors are truncated rather than reallocated.
    pub fn reset(&mut self, request: Request<Bytes>) {
        self.request = request;
        self.response.reset();
        self.path.clear();
        self.pnames.clear();
        self.pvalues.clear();
        self.query.take();
        self.store.clear();
        self.handler = not_found_handler();
        self.envelope.reset();
    }

    pub(crate) fn rebind(&mut self, shared: &Arc<Shared>) {
        if !Arc::ptr_eq(&self.shared, shared) {
            self.shared = shared.clone();
        }
    }

    // ===== Request =====

    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    /// Mutable access to the request. The query cache is dropped, so a
    /// rewritten URI is parsed afresh.
    pub fn request_mut(&mut self) -> &mut Request<Bytes> {
        self.query.take();
        &mut self.request
    }

    pub fn set_request(&mut self, request: Request<Bytes>) {
        self.request = request;
        self.query.take();
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.request.headers().get(name).and_then(|v| v.to_str().ok())
    }

    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.request.extensions().get::<ConnectionInfo>()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.connection_info().map(|info| info.remote_addr)
    }

    pub fn is_tls(&self) -> bool {
        self.connection_info().is_some_and(|info| info.tls)
    }

    pub fn is_websocket(&self) -> bool {
        self.header(header::UPGRADE)
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }

    /// `https` or `http`, honoring the usual proxy headers.
    pub fn scheme(&self) -> &str {
        if self.is_tls() {
            return "https";
        }
        if let Some(scheme) = self.header("x-forwarded-proto") {
            return scheme;
        }
        if let Some(scheme) = self.header("x-forwarded-protocol") {
            return scheme;
        }
        if self.header("x-forwarded-ssl") == Some("on") {
            return "https";
        }
        if let Some(scheme) = self.header("x-url-scheme") {
            return scheme;
        }
        "http"
    }

    /// Client address from `X-Forwarded-For`, then `X-Real-IP`, then the peer.
    pub fn real_ip(&self) -> String {
        if let Some(forwarded) = self.header("x-forwarded-for") {
            if let Some(first) = forwarded.split(',').next() {
                return first.trim().to_string();
            }
        }
        if let Some(ip) = self.header("x-real-ip") {
            return ip.to_string();
        }
        self.remote_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default()
    }

    // ===== Routing =====

    /// The registered pattern that matched, empty before routing.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// Raw (still percent-encoded) value of path parameter `name`, or `""`.
    pub fn param(&self, name: &str) -> &str {
        self.pnames
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.pvalues.get(i))
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Percent-decoded value of path parameter `name`.
    pub fn param_decoded(&self, name: &str) -> Result<String> {
        urlencoding::decode(self.param(name))
            .map(|v| v.into_owned())
            .map_err(|e| crate::error::HttpError::bad_request(e.to_string()).into())
    }

    pub fn param_names(&self) -> &[String] {
        &self.pnames
    }

    pub fn param_values(&self) -> &[String] {
        &self.pvalues
    }

    pub fn set_params(&mut self, names: &[&str], values: &[&str]) {
        self.pnames.clear();
        self.pnames.extend(names.iter().map(|n| n.to_string()));
        self.pvalues.clear();
        self.pvalues.extend(values.iter().map(|v| v.to_string()));
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn set_handler(&mut self, handler: Handler) {
        self.handler = handler;
    }

    // ===== Query, form and cookies =====

    pub fn query_string(&self) -> &str {
        self.request.uri().query().unwrap_or_default()
    }

    /// All query parameters, parsed on first access.
    pub fn query_params(&self) -> &QueryParams {
        self.query.get_or_init(|| parse_pairs(self.query_string().as_bytes()))
    }

    /// First value of query parameter `name`.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params()
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// First value of `name` from a urlencoded body, falling back to the query.
    pub fn form_value(&self, name: &str) -> Option<String> {
        let is_form = self
            .header(header::CONTENT_TYPE)
            .is_some_and(|ct| ct.starts_with(MIME_APPLICATION_FORM));
        if is_form {
            let form = parse_pairs(self.request.body());
            if let Some(value) = form.get(name).and_then(|v| v.first()) {
                return Some(value.clone());
            }
        }
        self.query_param(name).map(str::to_string)
    }

    pub fn cookies(&self) -> Vec<Cookie> {
        self.request
            .headers()
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(Cookie::parse_header)
            .collect()
    }

    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        self.cookies().into_iter().find(|c| c.name == name)
    }

    pub fn set_cookie(&mut self, cookie: &Cookie) -> Result<()> {
        let value = header_value(&cookie.to_string())?;
        self.response.headers_mut().append(header::SET_COOKIE, value);
        Ok(())
    }

    // ===== Store =====

    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.store.insert(key.into(), Box::new(value));
    }

    /// Typed lookup; `None` when the key is missing or holds another type.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.store.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.store.remove(key).is_some()
    }

    // ===== Binding and validation =====

    pub fn bind<T: DeserializeOwned>(&self) -> Result<T> {
        DefaultBinder.bind(self)
    }

    pub fn bind_with<B: Binder, T: DeserializeOwned>(&self, binder: &B) -> Result<T> {
        binder.bind(self)
    }

    /// Run the application's validator against `target`.
    pub fn validate<T: Validate>(&self, target: &T) -> Result<()> {
        match &self.shared.validator {
            Some(validator) => validator.validate(target),
            None => Err(Error::ValidatorNotRegistered),
        }
    }

    /// Bind then validate.
    pub fn bind_valid<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        let value: T = self.bind()?;
        self.validate(&value)?;
        Ok(value)
    }

    // ===== Application =====

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn reverse(&self, name: &str, params: &[&str]) -> Option<String> {
        self.shared.router.reverse(name, params)
    }

    /// Hand `err` to the application's error handler.
    pub fn error(&mut self, err: Error) {
        let handler = self.shared.error_handler.clone();
        handler(err, self);
    }

    // ===== Response =====

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn write_content_type(&mut self, content_type: &str) -> Result<()> {
        if !self.response.headers().contains_key(header::CONTENT_TYPE) {
            let value = header_value(content_type)?;
            self.response.set_header(header::CONTENT_TYPE, value);
        }
        Ok(())
    }

    pub fn blob(&mut self, code: StatusCode, content_type: &str, data: &[u8]) -> Result<()> {
        self.write_content_type(content_type)?;
        self.response.write_header(code);
        self.response.write(data);
        Ok(())
    }

    pub fn string(&mut self, code: StatusCode, s: impl AsRef<str>) -> Result<()> {
        self.blob(code, MIME_TEXT_PLAIN_UTF8, s.as_ref().as_bytes())
    }

    pub fn html(&mut self, code: StatusCode, html: impl AsRef<str>) -> Result<()> {
        self.blob(code, MIME_TEXT_HTML_UTF8, html.as_ref().as_bytes())
    }

    /// Serialize `value` as JSON. Output is indented when the request
    /// carries a `pretty` query flag or the app runs in development mode.
    pub fn json<T: Serialize + ?Sized>(&mut self, code: StatusCode, value: &T) -> Result<()> {
        if self.shared.config.dev_mode || self.query_params().contains_key("pretty") {
            return self.json_pretty(code, value, "  ");
        }
        let body = serde_json::to_vec(value)?;
        self.json_blob(code, &body)
    }

    pub fn json_pretty<T: Serialize + ?Sized>(
        &mut self,
        code: StatusCode,
        value: &T,
        indent: &str,
    ) -> Result<()> {
        let mut body = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
        let mut serializer = serde_json::Serializer::with_formatter(&mut body, formatter);
        value.serialize(&mut serializer)?;
        self.json_blob(code, &body)
    }

    pub fn json_blob(&mut self, code: StatusCode, data: &[u8]) -> Result<()> {
        self.blob(code, MIME_APPLICATION_JSON_UTF8, data)
    }

    pub fn jsonp<T: Serialize + ?Sized>(
        &mut self,
        code: StatusCode,
        callback: &str,
        value: &T,
    ) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.jsonp_blob(code, callback, &body)
    }

    pub fn jsonp_blob(&mut self, code: StatusCode, callback: &str, data: &[u8]) -> Result<()> {
        self.write_content_type(MIME_APPLICATION_JAVASCRIPT_UTF8)?;
        self.response.write_header(code);
        self.response.write(callback.as_bytes());
        self.response.write(b"(");
        self.response.write(data);
        self.response.write(b");");
        Ok(())
    }

    /// Send `data` as a CSV attachment named `filename`.
    pub fn csv(&mut self, filename: &str, data: &[u8]) -> Result<()> {
        self.write_content_type(MIME_TEXT_CSV)?;
        let disposition = header_value(&format!("attachment;filename={}", filename))?;
        self.response
            .set_header(header::CONTENT_DISPOSITION, disposition);
        self.response.write(data);
        Ok(())
    }

    /// Copy `reader` into the response body. The status is committed before
    /// the first read, so a read error leaves a partially written response.
    pub async fn stream<R>(&mut self, code: StatusCode, content_type: &str, mut reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.write_content_type(content_type)?;
        self.response.write_header(code);
        let mut chunk = vec![0u8; 8 * 1024];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            self.response.write(&chunk[..n]);
        }
        Ok(())
    }

    pub fn no_content(&mut self, code: StatusCode) -> Result<()> {
        self.response.write_header(code);
        Ok(())
    }

    /// Redirect to `url`. `code` must be in 300..=308; nothing is written
    /// otherwise.
    pub fn redirect(&mut self, code: StatusCode, url: &str) -> Result<()> {
        if !(300..=308).contains(&code.as_u16()) {
            return Err(Error::InvalidRedirectCode(code.as_u16()));
        }
        let location = header_value(url)?;
        self.response.set_header(header::LOCATION, location);
        self.response.write_header(code);
        Ok(())
    }

    /// Send the envelope, marking it failed when `outcome` is an error.
    ///
    /// HEAD and OPTIONS requests get 204 with no body.
    pub fn serve(&mut self, outcome: Result<()>) -> Result<()> {
        self.envelope.succeed();
        if let Err(err) = &outcome {
            self.envelope.set_error(err);
        }

        if self.request.method() == Method::HEAD || self.request.method() == Method::OPTIONS {
            return self.no_content(StatusCode::NO_CONTENT);
        }

        let envelope = std::mem::take(&mut self.envelope);
        let result = self.json(envelope.code, &envelope);
        self.envelope = envelope;
        result
    }

    pub(crate) fn take_response(&mut self) -> http::Response<http_body_util::Full<Bytes>> {
        self.response.take()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("path", &self.path)
            .field("pnames", &self.pnames)
            .field("pvalues", &self.pvalues)
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::internal(format!("invalid header value: {:?}", value)))
}

fn parse_pairs(input: &[u8]) -> QueryParams {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(input).unwrap_or_default();
    let mut params = QueryParams::new();
    for (key, value) in pairs {
        params.entry(key).or_default().push(value);
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::App;
    use crate::error::{HttpError, ValidationErrors};
    use serde_json::json;

    fn get(app: &App, uri: &str) -> Context {
        app.new_context(Request::get(uri).body(Bytes::new()).unwrap())
    }

    #[test]
    fn test_param_lookup() {
        let app = App::new();
        let mut c = get(&app, "/");
        c.set_params(&["uid", "fid"], &["1", "2"]);
        assert_eq!(c.param("uid"), "1");
        assert_eq!(c.param("fid"), "2");
        assert_eq!(c.param("missing"), "");
    }

    #[test]
    fn test_param_decoded() {
        let app = App::new();
        let mut c = get(&app, "/");
        c.set_params(&["id"], &["with%2Fslash"]);
        assert_eq!(c.param_decoded("id").unwrap(), "with/slash");
    }

    #[test]
    fn test_query_params() {
        let app = App::new();
        let c = get(&app, "/?tag=a&tag=b&q=rust+lang&flag");
        assert_eq!(c.query_param("q"), Some("rust lang"));
        assert_eq!(c.query_params()["tag"], vec!["a", "b"]);
        assert_eq!(c.query_param("flag"), Some(""));
        assert_eq!(c.query_param("none"), None);
        assert_eq!(c.query_string(), "tag=a&tag=b&q=rust+lang&flag");
    }

    #[test]
    fn test_store_is_typed() {
        let app = App::new();
        let mut c = get(&app, "/");
        c.set("user_id", 42u64);
        assert_eq!(c.get::<u64>("user_id"), Some(&42));
        assert_eq!(c.get::<String>("user_id"), None);
        assert!(c.remove("user_id"));
        assert_eq!(c.get::<u64>("user_id"), None);
    }

    #[test]
    fn test_rewritten_uri_refreshes_query() {
        let app = App::new();
        let mut c = get(&app, "/search?q=old");
        assert_eq!(c.query_param("q"), Some("old"));

        *c.request_mut().uri_mut() = "/search?q=new&page=2".parse().unwrap();
        assert_eq!(c.query_param("q"), Some("new"));
        assert_eq!(c.query_param("page"), Some("2"));
    }

    #[test]
    fn test_reset_clears_everything() {
        let app = App::new();
        let mut c = get(&app, "/?a=1");
        c.set_path("/users/:id");
        c.set_params(&["id", "x"], &["1", "2"]);
        c.set("k", "v");
        assert_eq!(c.query_param("a"), Some("1"));
        c.string(StatusCode::CREATED, "done").unwrap();

        c.reset(Request::get("/other").body(Bytes::new()).unwrap());

        assert_eq!(c.path(), "");
        assert!(c.param_names().is_empty());
        assert!(c.param_values().is_empty());
        assert_eq!(c.get::<&str>("k"), None);
        assert_eq!(c.query_param("a"), None);
        assert!(!c.response().committed());
        assert!(c.response().body().is_empty());
        assert!(c.handler().same_as(&not_found_handler()));
    }

    #[test]
    fn test_string_and_content_type_only_if_unset() {
        let app = App::new();
        let mut c = get(&app, "/");
        c.response_mut()
            .set_header(header::CONTENT_TYPE, HeaderValue::from_static("text/x-custom"));
        c.string(StatusCode::OK, "hi").unwrap();
        assert_eq!(c.response().headers()[header::CONTENT_TYPE], "text/x-custom");
        assert_eq!(c.response().body(), b"hi");
    }

    #[test]
    fn test_second_write_keeps_status_appends_body() {
        let app = App::new();
        let mut c = get(&app, "/");
        c.string(StatusCode::CREATED, "a").unwrap();
        c.string(StatusCode::BAD_REQUEST, "b").unwrap();
        assert_eq!(c.response().status(), StatusCode::CREATED);
        assert_eq!(c.response().body(), b"ab");
    }

    #[test]
    fn test_json_compact_and_pretty() {
        let app = App::new();
        let mut c = get(&app, "/");
        c.json(StatusCode::OK, &json!({"a": 1})).unwrap();
        assert_eq!(c.response().body(), br#"{"a":1}"#);
        assert_eq!(
            c.response().headers()[header::CONTENT_TYPE],
            MIME_APPLICATION_JSON_UTF8
        );

        let mut c = get(&app, "/?pretty");
        c.json(StatusCode::OK, &json!({"a": 1})).unwrap();
        assert_eq!(c.response().body(), b"{\n  \"a\": 1\n}");
    }

    #[test]
    fn test_json_pretty_in_dev_mode() {
        let app = App::with_config(Config::new().with_dev_mode(true));
        let mut c = get(&app, "/");
        c.json(StatusCode::OK, &json!({"a": 1})).unwrap();
        assert_eq!(c.response().body(), b"{\n  \"a\": 1\n}");
    }

    #[test]
    fn test_jsonp() {
        let app = App::new();
        let mut c = get(&app, "/");
        c.jsonp(StatusCode::OK, "cb", &json!([1])).unwrap();
        assert_eq!(c.response().body(), b"cb([1]);");
        assert_eq!(
            c.response().headers()[header::CONTENT_TYPE],
            MIME_APPLICATION_JAVASCRIPT_UTF8
        );
    }

    #[test]
    fn test_csv_attachment() {
        let app = App::new();
        let mut c = get(&app, "/");
        c.csv("report.csv", b"a,b\n1,2\n").unwrap();
        assert_eq!(c.response().status(), StatusCode::OK);
        assert_eq!(
            c.response().headers()[header::CONTENT_DISPOSITION],
            "attachment;filename=report.csv"
        );
    }

    #[tokio::test]
    async fn test_stream() {
        let app = App::new();
        let mut c = get(&app, "/");
        let data: &[u8] = b"streamed bytes";
        c.stream(StatusCode::OK, "application/octet-stream", data)
            .await
            .unwrap();
        assert_eq!(c.response().body(), b"streamed bytes");
    }

    #[test]
    fn test_redirect() {
        let app = App::new();
        let mut c = get(&app, "/");
        c.redirect(StatusCode::MOVED_PERMANENTLY, "/new").unwrap();
        assert_eq!(c.response().status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(c.response().headers()[header::LOCATION], "/new");
    }

    #[test]
    fn test_invalid_redirect_code_writes_nothing() {
        let app = App::new();
        let mut c = get(&app, "/");
        let err = c.redirect(StatusCode::OK, "/new").unwrap_err();
        assert!(matches!(err, Error::InvalidRedirectCode(200)));
        assert!(!c.response().committed());
        assert!(c.response().headers().get(header::LOCATION).is_none());
    }

    #[test]
    fn test_serve_success_envelope() {
        let app = App::new();
        let mut c = get(&app, "/");
        c.envelope_mut().set_data(&vec!["a", "b"]).unwrap();
        c.envelope_mut().set_total(2);
        c.serve(Ok(())).unwrap();

        assert_eq!(c.response().status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(c.response().body()).unwrap();
        assert_eq!(body, json!({"status": "success", "data": ["a", "b"], "total": 2}));
    }

    #[test]
    fn test_serve_validation_failure() {
        let app = App::new();
        let mut c = get(&app, "/");
        c.serve(Err(ValidationErrors::new().with("name", "required").into()))
            .unwrap();

        assert_eq!(c.response().status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: serde_json::Value = serde_json::from_slice(c.response().body()).unwrap();
        assert_eq!(body["errors"], json!({"name": "required"}));
        assert_eq!(body["status"], "failed");
    }

    #[test]
    fn test_serve_head_and_options_are_empty() {
        let app = App::new();
        for method in [Method::HEAD, Method::OPTIONS] {
            let mut c = app.new_context(
                Request::builder()
                    .method(method)
                    .uri("/")
                    .body(Bytes::new())
                    .unwrap(),
            );
            c.envelope_mut().set_data(&json!({"big": "payload"})).unwrap();
            c.serve(Err(HttpError::not_found().into())).unwrap();
            assert_eq!(c.response().status(), StatusCode::NO_CONTENT);
            assert!(c.response().body().is_empty());
        }
    }

    #[test]
    fn test_cookies() {
        let app = App::new();
        let mut c = app.new_context(
            Request::get("/")
                .header(header::COOKIE, "session=abc; theme=dark")
                .body(Bytes::new())
                .unwrap(),
        );
        assert_eq!(c.cookie("theme").map(|c| c.value), Some("dark".to_string()));
        assert_eq!(c.cookies().len(), 2);

        c.set_cookie(&Cookie::new("seen", "1").path("/")).unwrap();
        assert_eq!(c.response().headers()[header::SET_COOKIE], "seen=1; Path=/");
    }

    #[test]
    fn test_scheme_and_real_ip() {
        let app = App::new();
        let c = app.new_context(
            Request::get("/")
                .header("x-forwarded-proto", "https")
                .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
                .body(Bytes::new())
                .unwrap(),
        );
        assert_eq!(c.scheme(), "https");
        assert_eq!(c.real_ip(), "203.0.113.9");
        assert!(!c.is_tls());

        let mut plain = get(&app, "/");
        plain.request_mut().extensions_mut().insert(ConnectionInfo {
            remote_addr: "192.0.2.1:5000".parse().unwrap(),
            tls: true,
        });
        assert_eq!(plain.scheme(), "https");
        assert_eq!(plain.real_ip(), "192.0.2.1");
    }

    #[test]
    fn test_form_value() {
        let app = App::new();
        let c = app.new_context(
            Request::post("/?b=query")
                .header(header::CONTENT_TYPE, MIME_APPLICATION_FORM)
                .body(Bytes::from_static(b"a=form"))
                .unwrap(),
        );
        assert_eq!(c.form_value("a").as_deref(), Some("form"));
        assert_eq!(c.form_value("b").as_deref(), Some("query"));
    }

    #[test]
    fn test_is_websocket() {
        let app = App::new();
        let c = app.new_context(
            Request::get("/ws")
                .header(header::UPGRADE, "WebSocket")
                .body(Bytes::new())
                .unwrap(),
        );
        assert!(c.is_websocket());
    }
}
