// Error types for certificate issuance

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AcmeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ACME server error: {0}")]
    Problem(Problem),

    #[error("Invalid directory: {0}")]
    InvalidDirectory(String),

    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error("Order failed: {0}")]
    OrderFailed(String),

    #[error("Challenge failed: {0}")]
    ChallengeFailed(String),

    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Host not allowed: {0}")]
    HostNotAllowed(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error(transparent)]
    Tls(#[from] trellis_core::Error),
}

impl From<rcgen::Error> for AcmeError {
    fn from(err: rcgen::Error) -> Self {
        AcmeError::Certificate(err.to_string())
    }
}

/// RFC 7807 problem document returned by ACME servers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub status: Option<u16>,
}

impl Problem {
    /// The server rejected the request nonce; the request may be retried with a fresh one.
    pub fn is_bad_nonce(&self) -> bool {
        self.kind.ends_with(":badNonce")
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({}): {}", self.kind, status, self.detail),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}

pub type Result<T> = std::result::Result<T, AcmeError>;
