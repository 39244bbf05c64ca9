// ACME protocol client (RFC 8555)

use crate::account::{Account, AccountCreate, AccountKey, AccountStatus, b64};
use crate::challenge::{Authorization, AuthorizationStatus, ChallengeStatus, Challenges, tls_alpn01_certificate};
use crate::config::{AcmeConfig, ChallengeType};
use crate::directory::Directory;
use crate::error::{AcmeError, Problem, Result};
use crate::order::{NewOrder, Order, OrderStatus};
use rcgen::{CertificateParams, KeyPair};
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};

const JOSE_JSON: &str = "application/jose+json";
const JSON: &str = "application/json";
const PEM_CHAIN: &str = "application/pem-certificate-chain";
const REPLAY_NONCE: &str = "replay-nonce";

/// Talks to one ACME server on behalf of one account.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use trellis_acme::{AcmeClient, AcmeConfig, Challenges};
///
/// # async fn example() -> trellis_acme::Result<()> {
/// let config = AcmeConfig::lets_encrypt_staging(
///     vec!["admin@example.com".to_string()],
///     vec!["example.com".to_string()],
/// )
/// .with_accept_tos(true);
///
/// let challenges = Arc::new(Challenges::new());
/// let mut client = AcmeClient::new(config).await?;
/// let key = rcgen::KeyPair::generate()?;
/// let chain_pem = client.order_certificate("example.com", &challenges, &key).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AcmeClient {
    config: AcmeConfig,
    http: reqwest::Client,
    directory: Directory,
    key: AccountKey,
    account_url: Option<String>,
    nonce: Option<String>,
}

impl AcmeClient {
    /// Fetch the directory and load (or create) the account key.
    pub async fn new(config: AcmeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .user_agent(concat!("trellis-acme/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let directory = Self::fetch_directory(&http, &config.directory_url).await?;
        let key = AccountKey::load_or_generate(&config.account_dir).await?;

        Ok(Self {
            config,
            http,
            directory,
            key,
            account_url: None,
            nonce: None,
        })
    }

    async fn fetch_directory(http: &reqwest::Client, url: &str) -> Result<Directory> {
        let response = http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AcmeError::InvalidDirectory(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn config(&self) -> &AcmeConfig {
        &self.config
    }

    pub fn account_key(&self) -> &AccountKey {
        &self.key
    }

    /// Set once [`register_account`](Self::register_account) succeeded.
    pub fn account_url(&self) -> Option<&str> {
        self.account_url.as_deref()
    }

    async fn nonce(&mut self) -> Result<String> {
        if let Some(nonce) = self.nonce.take() {
            return Ok(nonce);
        }
        let response = self.http.head(&self.directory.new_nonce).send().await?;
        replay_nonce(&response)
            .ok_or_else(|| AcmeError::InvalidDirectory("newNonce sent no Replay-Nonce".to_string()))
    }

    /// Signed POST. A rejected nonce is retried once with the fresh nonce the
    /// error response carried.
    async fn post(
        &mut self,
        url: &str,
        payload: Option<&Value>,
        accept: &str,
    ) -> Result<reqwest::Response> {
        let mut retried = false;
        loop {
            let nonce = self.nonce().await?;
            let body = self
                .key
                .sign(url, &nonce, self.account_url.as_deref(), payload)?;
            let response = self
                .http
                .post(url)
                .header(CONTENT_TYPE, JOSE_JSON)
                .header(ACCEPT, accept)
                .body(serde_json::to_vec(&body)?)
                .send()
                .await?;
            self.nonce = replay_nonce(&response);

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let mut problem = response.json::<Problem>().await.unwrap_or_default();
            problem.status.get_or_insert(status.as_u16());
            if problem.is_bad_nonce() && !retried {
                debug!(url = %url, "Retrying with fresh nonce");
                retried = true;
                continue;
            }
            return Err(AcmeError::Problem(problem));
        }
    }

    async fn post_as_get<T: DeserializeOwned>(&mut self, url: &str) -> Result<T> {
        Ok(self.post(url, None, JSON).await?.json().await?)
    }

    /// Create the account, or look up the existing one for this key.
    pub async fn register_account(&mut self) -> Result<String> {
        if let Some(url) = &self.account_url {
            return Ok(url.clone());
        }
        if !self.config.accept_tos {
            return Err(AcmeError::InvalidAccount(
                "the CA's terms of service have not been accepted".to_string(),
            ));
        }

        let mut create = AccountCreate::new(&self.config.contact_email, true);
        match (&self.config.eab_kid, &self.config.eab_hmac_key) {
            (Some(kid), Some(hmac_key)) => {
                let binding = self
                    .key
                    .external_binding(kid, hmac_key, &self.directory.new_account)?;
                create = create.with_eab(binding);
            }
            _ if self.directory.requires_external_account() => {
                return Err(AcmeError::InvalidAccount(
                    "the CA requires external account binding".to_string(),
                ));
            }
            _ => {}
        }

        let url = self.directory.new_account.clone();
        let response = self
            .post(&url, Some(&serde_json::to_value(&create)?), JSON)
            .await?;
        let account_url = location(&response)?;
        let account: Account = response.json().await?;
        if account.status != AccountStatus::Valid {
            return Err(AcmeError::InvalidAccount(format!(
                "{} is {:?}",
                account_url, account.status
            )));
        }

        info!(account = %account_url, "ACME account ready");
        self.account_url = Some(account_url.clone());
        Ok(account_url)
    }

    /// Returns the order URL along with the order.
    pub async fn new_order(&mut self, domains: &[String]) -> Result<(String, Order)> {
        let url = self.directory.new_order.clone();
        let payload = serde_json::to_value(NewOrder::for_domains(domains.iter().cloned()))?;
        let response = self.post(&url, Some(&payload), JSON).await?;
        let order_url = location(&response)?;
        Ok((order_url, response.json().await?))
    }

    /// Prove control of the domain behind one authorization, publishing the
    /// configured challenge type in `challenges` until the CA has decided.
    async fn authorize(&mut self, url: &str, challenges: &Arc<Challenges>) -> Result<()> {
        let authorization: Authorization = self.post_as_get(url).await?;
        match authorization.status {
            AuthorizationStatus::Valid => return Ok(()),
            AuthorizationStatus::Pending => {}
            status => {
                return Err(AcmeError::AuthorizationFailed(format!(
                    "{} is {:?}",
                    authorization.identifier.value, status
                )));
            }
        }

        let kind = self.config.challenge_type;
        let domain = authorization.identifier.value.clone();
        let challenge = authorization
            .challenge(kind.as_str())
            .cloned()
            .ok_or_else(|| {
                AcmeError::ChallengeFailed(format!("{} offers no {} challenge", domain, kind.as_str()))
            })?;

        let key_authorization = self.key.key_authorization(&challenge.token);
        let _published = match kind {
            ChallengeType::Http01 => {
                challenges.publish_http01(challenge.token.clone(), key_authorization)
            }
            ChallengeType::TlsAlpn01 => challenges
                .publish_tls_alpn01(&domain, tls_alpn01_certificate(&domain, &key_authorization)?),
        };

        if challenge.status == ChallengeStatus::Pending {
            self.post(&challenge.url, Some(&json!({})), JSON).await?;
        }
        debug!(domain = %domain, challenge = kind.as_str(), "Challenge submitted");
        self.poll_authorization(url).await
    }

    async fn poll_authorization(&mut self, url: &str) -> Result<()> {
        for _ in 0..self.config.poll_attempts {
            let authorization: Authorization = self.post_as_get(url).await?;
            match authorization.status {
                AuthorizationStatus::Valid => return Ok(()),
                AuthorizationStatus::Pending => tokio::time::sleep(self.config.poll_interval).await,
                status => {
                    return Err(AcmeError::AuthorizationFailed(format!(
                        "{} is {:?}: {}",
                        authorization.identifier.value,
                        status,
                        authorization.error_detail().unwrap_or_default()
                    )));
                }
            }
        }
        Err(AcmeError::Timeout("authorization"))
    }

    async fn poll_order(&mut self, url: &str, until: OrderStatus) -> Result<Order> {
        for _ in 0..self.config.poll_attempts {
            let order: Order = self.post_as_get(url).await?;
            if order.status == until {
                return Ok(order);
            }
            if order.status == OrderStatus::Invalid {
                return Err(AcmeError::OrderFailed(format!(
                    "{} is invalid: {}",
                    url,
                    order.error.map(|e| e.to_string()).unwrap_or_default()
                )));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
        Err(AcmeError::Timeout("order"))
    }

    /// Run a whole order for `domain` and return the issued chain as PEM.
    /// The certificate is bound to `cert_key`.
    pub async fn order_certificate(
        &mut self,
        domain: &str,
        challenges: &Arc<Challenges>,
        cert_key: &KeyPair,
    ) -> Result<String> {
        self.register_account().await?;

        let (order_url, order) = self.new_order(&[domain.to_string()]).await?;
        info!(domain = %domain, order = %order_url, "Certificate ordered");
        for authorization in &order.authorizations {
            self.authorize(authorization, challenges).await?;
        }

        let order = match order.status {
            OrderStatus::Ready => order,
            _ => self.poll_order(&order_url, OrderStatus::Ready).await?,
        };

        let csr = CertificateParams::new(vec![domain.to_string()])?.serialize_request(cert_key)?;
        self.post(&order.finalize, Some(&json!({"csr": b64(csr.der())})), JSON)
            .await?;
        let order = self.poll_order(&order_url, OrderStatus::Valid).await?;

        let certificate = order.certificate.ok_or_else(|| {
            AcmeError::OrderFailed(format!("{} is valid without a certificate URL", order_url))
        })?;
        Ok(self.post(&certificate, None, PEM_CHAIN).await?.text().await?)
    }
}

fn replay_nonce(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(REPLAY_NONCE)?
        .to_str()
        .ok()
        .map(str::to_string)
}

fn location(response: &reqwest::Response) -> Result<String> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| AcmeError::InvalidDirectory(format!("{} sent no Location", response.url())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_directory_unreachable() {
        let http = reqwest::Client::new();
        let result = AcmeClient::fetch_directory(&http, "http://127.0.0.1:1/directory").await;
        assert!(matches!(result, Err(AcmeError::Http(_))));
    }

    #[tokio::test]
    async fn test_new_fails_without_directory() {
        let config = AcmeConfig::new(
            "http://127.0.0.1:1/directory",
            vec!["admin@example.com".to_string()],
            vec!["example.com".to_string()],
        );
        assert!(AcmeClient::new(config).await.is_err());
    }
}
