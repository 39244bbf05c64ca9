// ACME accounts and request signing

use crate::error::{AcmeError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, KeyPair};
use ring::{digest, hmac};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::path::Path;
use tracing::info;

const ACCOUNT_KEY_FILE: &str = "account.der";

pub(crate) fn b64(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// P-256 key identifying an ACME account. Every request to the CA is signed
/// with it as a flattened JWS.
pub struct AccountKey {
    pair: EcdsaKeyPair,
    pkcs8: Vec<u8>,
    rng: SystemRandom,
}

impl AccountKey {
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|e| AcmeError::InvalidKey(e.to_string()))?;
        Self::from_pkcs8(document.as_ref())
    }

    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self> {
        let rng = SystemRandom::new();
        let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
            .map_err(|e| AcmeError::InvalidKey(e.to_string()))?;
        Ok(Self {
            pair,
            pkcs8: pkcs8.to_vec(),
            rng,
        })
    }

    /// Read the account key from `dir`, creating and storing a new one when
    /// none exists yet.
    pub async fn load_or_generate(dir: &Path) -> Result<Self> {
        let path = dir.join(ACCOUNT_KEY_FILE);
        match tokio::fs::read(&path).await {
            Ok(pkcs8) => Self::from_pkcs8(&pkcs8),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let key = Self::generate()?;
                tokio::fs::create_dir_all(dir).await?;
                tokio::fs::write(&path, key.pkcs8()).await?;
                info!(path = %path.display(), "Generated ACME account key");
                Ok(key)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn pkcs8(&self) -> &[u8] {
        &self.pkcs8
    }

    fn coordinates(&self) -> (String, String) {
        // Uncompressed SEC1 point: 0x04 || x || y
        let point = self.pair.public_key().as_ref();
        (b64(&point[1..33]), b64(&point[33..65]))
    }

    pub fn jwk(&self) -> Value {
        let (x, y) = self.coordinates();
        json!({"crv": "P-256", "kty": "EC", "x": x, "y": y})
    }

    /// RFC 7638 thumbprint of the public key.
    pub fn thumbprint(&self) -> String {
        let (x, y) = self.coordinates();
        let canonical = format!(r#"{{"crv":"P-256","kty":"EC","x":"{}","y":"{}"}}"#, x, y);
        b64(digest::digest(&digest::SHA256, canonical.as_bytes()))
    }

    /// Value a challenge must present for `token`.
    pub fn key_authorization(&self, token: &str) -> String {
        format!("{}.{}", token, self.thumbprint())
    }

    /// Sign a request body. Without `kid` the public key is embedded, which
    /// only newAccount accepts. A `None` payload produces a POST-as-GET.
    pub fn sign(
        &self,
        url: &str,
        nonce: &str,
        kid: Option<&str>,
        payload: Option<&Value>,
    ) -> Result<Value> {
        let mut protected = json!({"alg": "ES256", "nonce": nonce, "url": url});
        match kid {
            Some(kid) => protected["kid"] = json!(kid),
            None => protected["jwk"] = self.jwk(),
        }

        let protected = b64(serde_json::to_vec(&protected)?);
        let payload = match payload {
            Some(payload) => b64(serde_json::to_vec(payload)?),
            None => String::new(),
        };
        let signature = self
            .pair
            .sign(&self.rng, format!("{}.{}", protected, payload).as_bytes())
            .map_err(|e| AcmeError::InvalidKey(e.to_string()))?;

        Ok(json!({
            "protected": protected,
            "payload": payload,
            "signature": b64(signature.as_ref()),
        }))
    }

    /// External account binding: the account key signed with the CA-issued
    /// HMAC key.
    pub fn external_binding(&self, kid: &str, hmac_key: &str, url: &str) -> Result<Value> {
        let secret = URL_SAFE_NO_PAD.decode(hmac_key.trim_end_matches('='))?;
        let key = hmac::Key::new(hmac::HMAC_SHA256, &secret);

        let protected = b64(serde_json::to_vec(&json!({"alg": "HS256", "kid": kid, "url": url}))?);
        let payload = b64(serde_json::to_vec(&self.jwk())?);
        let tag = hmac::sign(&key, format!("{}.{}", protected, payload).as_bytes());

        Ok(json!({
            "protected": protected,
            "payload": payload,
            "signature": b64(tag.as_ref()),
        }))
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKey")
            .field("thumbprint", &self.thumbprint())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub status: AccountStatus,

    #[serde(default)]
    pub contact: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orders: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AccountStatus {
    Valid,
    Deactivated,
    Revoked,
}

/// Body of a newAccount request.
#[derive(Debug, Clone, Serialize)]
pub struct AccountCreate {
    pub contact: Vec<String>,

    #[serde(rename = "termsOfServiceAgreed")]
    pub terms_of_service_agreed: bool,

    #[serde(rename = "externalAccountBinding", skip_serializing_if = "Option::is_none")]
    pub external_account_binding: Option<Value>,
}

impl AccountCreate {
    /// Contacts are given as plain addresses and sent as `mailto:` URIs.
    pub fn new(emails: &[String], terms_of_service_agreed: bool) -> Self {
        Self {
            contact: emails.iter().map(|e| format!("mailto:{}", e)).collect(),
            terms_of_service_agreed,
            external_account_binding: None,
        }
    }

    pub fn with_eab(mut self, eab: Value) -> Self {
        self.external_account_binding = Some(eab);
        self
    }
}
