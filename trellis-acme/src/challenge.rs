// Authorizations, challenges and the responses published while one is pending

use crate::error::Result;
use parking_lot::RwLock;
use rcgen::{CertificateParams, CustomExtension, KeyPair};
use ring::digest;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::CertifiedKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use trellis_core::{HttpError, Method, MiddlewareFunc, StatusCode};

/// Path prefix HTTP-01 validation requests arrive under.
pub const HTTP01_PREFIX: &str = "/.well-known/acme-challenge/";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authorization {
    pub identifier: crate::order::Identifier,

    pub status: AuthorizationStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    #[serde(default)]
    pub challenges: Vec<Challenge>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wildcard: Option<bool>,
}

impl Authorization {
    pub fn challenge(&self, kind: &str) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c.challenge_type == kind)
    }

    /// First error reported by any of the challenges.
    pub fn error_detail(&self) -> Option<String> {
        self.challenges
            .iter()
            .find_map(|c| c.error.as_ref())
            .map(|e| match e.get("detail").and_then(|d| d.as_str()) {
                Some(detail) => detail.to_string(),
                None => e.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub challenge_type: String,

    pub url: String,

    pub status: ChallengeStatus,

    #[serde(default)]
    pub token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// Challenge responses currently offered to the CA.
///
/// HTTP-01 responses are keyed by token and TLS-ALPN-01 certificates by
/// domain. Entries live as long as the [`Published`] handle returned when
/// they were added.
#[derive(Debug, Default)]
pub struct Challenges {
    http01: RwLock<HashMap<String, String>>,
    tls_alpn01: RwLock<HashMap<String, Arc<CertifiedKey>>>,
}

impl Challenges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn http01(&self, token: &str) -> Option<String> {
        self.http01.read().get(token).cloned()
    }

    pub fn tls_alpn01(&self, domain: &str) -> Option<Arc<CertifiedKey>> {
        self.tls_alpn01
            .read()
            .get(&domain.to_ascii_lowercase())
            .cloned()
    }

    pub fn publish_http01(
        self: &Arc<Self>,
        token: impl Into<String>,
        key_authorization: impl Into<String>,
    ) -> Published {
        let token = token.into();
        self.http01
            .write()
            .insert(token.clone(), key_authorization.into());
        Published {
            store: self.clone(),
            entry: Entry::Http01(token),
        }
    }

    pub fn publish_tls_alpn01(self: &Arc<Self>, domain: &str, key: Arc<CertifiedKey>) -> Published {
        let domain = domain.to_ascii_lowercase();
        self.tls_alpn01.write().insert(domain.clone(), key);
        Published {
            store: self.clone(),
            entry: Entry::TlsAlpn01(domain),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.http01.read().is_empty() && self.tls_alpn01.read().is_empty()
    }
}

#[derive(Debug)]
enum Entry {
    Http01(String),
    TlsAlpn01(String),
}

/// Withdraws a published challenge response when dropped.
#[derive(Debug)]
pub struct Published {
    store: Arc<Challenges>,
    entry: Entry,
}

impl Drop for Published {
    fn drop(&mut self) {
        match &self.entry {
            Entry::Http01(token) => {
                self.store.http01.write().remove(token);
            }
            Entry::TlsAlpn01(domain) => {
                self.store.tls_alpn01.write().remove(domain);
            }
        }
    }
}

/// Self-signed certificate for `domain` carrying the acmeIdentifier
/// extension over the SHA-256 of `key_authorization` (RFC 8737).
pub fn tls_alpn01_certificate(domain: &str, key_authorization: &str) -> Result<Arc<CertifiedKey>> {
    let digest = digest::digest(&digest::SHA256, key_authorization.as_bytes());
    let mut params = CertificateParams::new(vec![domain.to_string()])?;
    params.custom_extensions = vec![CustomExtension::new_acme_identifier(digest.as_ref())];

    let key = KeyPair::generate()?;
    let cert = params.self_signed(&key)?;
    let private = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
    Ok(trellis_core::certified_key(vec![cert.der().clone()], private)?)
}

/// Answers HTTP-01 validation requests from `challenges` and passes every
/// other request on. Register it with `App::pre` on the port 80 listener.
pub fn http01_middleware(challenges: Arc<Challenges>) -> MiddlewareFunc {
    MiddlewareFunc::from_fn(move |c, next| {
        let challenges = challenges.clone();
        Box::pin(async move {
            let token = if c.method() == Method::GET || c.method() == Method::HEAD {
                c.request()
                    .uri()
                    .path()
                    .strip_prefix(HTTP01_PREFIX)
                    .map(str::to_string)
            } else {
                None
            };
            let Some(token) = token else {
                return next.call(c).await;
            };

            match challenges.http01(&token) {
                Some(key_authorization) => {
                    debug!(token = %token, "Answered HTTP-01 validation");
                    c.blob(
                        StatusCode::OK,
                        "application/octet-stream",
                        key_authorization.as_bytes(),
                    )
                }
                None => Err(HttpError::not_found().into()),
            }
        })
    })
}
