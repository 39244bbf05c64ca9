// Error types for the Trellis dispatch core

use http::{Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error with an explicit HTTP status code.
///
/// Handlers return it to choose the status and message the client sees.
/// The optional internal cause is logged by the error handler and only
/// reaches the client in development mode.
#[derive(Debug, Clone)]
pub struct HttpError {
    pub code: StatusCode,
    pub message: Value,
    pub internal: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl HttpError {
    /// Create an error whose message is the canonical reason phrase.
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            message: Value::String(code.canonical_reason().unwrap_or_default().to_string()),
            internal: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<Value>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_internal<E>(mut self, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.internal = Some(Arc::new(err));
        self
    }

    pub fn bad_request(message: impl Into<Value>) -> Self {
        Self::new(StatusCode::BAD_REQUEST).with_message(message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED)
    }

    pub fn unsupported_media_type() -> Self {
        Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE)
    }

    pub fn payload_too_large() -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE)
    }

    pub fn internal_server_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Message rendered as plain text (strings are not quoted).
    pub fn message_text(&self) -> String {
        match &self.message {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code={}, message={}", self.code.as_u16(), self.message_text())?;
        if let Some(internal) = &self.internal {
            write!(f, ", internal={}", internal)?;
        }
        Ok(())
    }
}

impl std::error::Error for HttpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.internal
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Field-by-field validation failure, always surfaced as 422.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message for `field`. A later message for the same field wins.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.insert(field.into(), message.into());
    }

    pub fn with(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.add(field, message);
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `Ok(())` when nothing was recorded, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), Error> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("validation failed")?;
        for (i, (field, message)) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}: {}", sep, field, message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("invalid redirect status code: {0}")]
    InvalidRedirectCode(u16),

    #[error("validator not registered")]
    ValidatorNotRegistered,

    #[error("route already registered: {method} {path}")]
    DuplicateRoute { method: Method, path: String },

    #[error("invalid route pattern {path:?}: {reason}")]
    InvalidRoute { path: String, reason: &'static str },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("server closed")]
    ServerClosed,

    #[error("shutdown deadline elapsed with {0} connection(s) still active")]
    ShutdownTimeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl Error {
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    /// Status code the default error handler responds with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Http(e) => e.code,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl From<StatusCode> for Error {
    fn from(code: StatusCode) -> Self {
        Error::Http(HttpError::new(code))
    }
}
