// Certificate provider that issues through ACME on first use

use crate::challenge::{Challenges, http01_middleware};
use crate::client::AcmeClient;
use crate::config::AcmeConfig;
use crate::error::{AcmeError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rcgen::KeyPair;
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trellis_core::{CertificateProvider, MiddlewareFunc, certified_key_from_pem};

#[derive(Clone)]
struct Issued {
    key: Arc<CertifiedKey>,
    not_after: DateTime<Utc>,
}

/// Serves certificates for the configured domains, issuing or renewing them
/// through ACME when a handshake needs one.
///
/// Certificates are kept in memory and in `cache_dir` as `<host>.crt` and
/// `<host>.key`, the layout [`DirectoryCertProvider`](trellis_core::DirectoryCertProvider)
/// reads. Issuance is serialized; a handshake arriving during issuance waits
/// for it.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use trellis_acme::{AcmeCertProvider, AcmeConfig};
/// use trellis_core::{App, Server};
///
/// # async fn example() -> trellis_core::Result<()> {
/// let config = AcmeConfig::lets_encrypt_production(
///     vec!["admin@example.com".to_string()],
///     vec!["example.com".to_string()],
/// )
/// .with_accept_tos(true);
///
/// let provider = Arc::new(AcmeCertProvider::new(config));
/// let server = Server::new(App::new());
/// server.start_auto_tls("0.0.0.0:443", provider).await
/// # }
/// ```
pub struct AcmeCertProvider {
    config: AcmeConfig,
    challenges: Arc<Challenges>,
    cache: RwLock<HashMap<String, Issued>>,
    client: Mutex<Option<AcmeClient>>,
}

impl AcmeCertProvider {
    pub fn new(config: AcmeConfig) -> Self {
        Self {
            config,
            challenges: Arc::new(Challenges::new()),
            cache: RwLock::new(HashMap::new()),
            client: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AcmeConfig {
        &self.config
    }

    pub fn challenges(&self) -> Arc<Challenges> {
        self.challenges.clone()
    }

    /// HTTP-01 responder for the port 80 listener.
    pub fn http01_middleware(&self) -> MiddlewareFunc {
        http01_middleware(self.challenges())
    }

    /// Expiry of the certificate currently held for `host`.
    pub fn expires(&self, host: &str) -> Option<DateTime<Utc>> {
        self.cache
            .read()
            .get(&host.to_ascii_lowercase())
            .map(|issued| issued.not_after)
    }

    fn renewal_due(&self, not_after: DateTime<Utc>) -> bool {
        let window = chrono::Duration::days(i64::from(self.config.renew_before_days));
        Utc::now() + window >= not_after
    }

    fn cached(&self, host: &str) -> Option<Issued> {
        self.cache.read().get(host).cloned()
    }

    fn fresh(&self, host: &str) -> Option<Arc<CertifiedKey>> {
        self.cached(host)
            .filter(|issued| !self.renewal_due(issued.not_after))
            .map(|issued| issued.key)
    }

    fn cache_path(&self, host: &str, ext: &str) -> PathBuf {
        self.config.cache_dir.join(format!("{}.{}", host, ext))
    }

    /// A certificate for `server_name` that is not yet due for renewal,
    /// issuing one if needed. When renewal fails, a certificate that has not
    /// expired yet is still returned.
    pub async fn ensure(&self, server_name: &str) -> Result<Arc<CertifiedKey>> {
        let host = server_name.to_ascii_lowercase();
        if !self.config.allows(&host) {
            return Err(AcmeError::HostNotAllowed(host));
        }
        if let Some(key) = self.fresh(&host) {
            return Ok(key);
        }

        let mut slot = self.client.lock().await;
        // Issued while waiting for the lock
        if let Some(key) = self.fresh(&host) {
            return Ok(key);
        }

        if self.cached(&host).is_none() {
            match self.load_from_disk(&host).await {
                Ok(Some(issued)) => {
                    debug!(host = %host, expires = %issued.not_after, "Loaded cached certificate");
                    self.cache.write().insert(host.clone(), issued.clone());
                    if !self.renewal_due(issued.not_after) {
                        return Ok(issued.key);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(host = %host, error = %e, "Ignoring unreadable cached certificate"),
            }
        }

        let client = match slot.take() {
            Some(client) => Ok(client),
            None => AcmeClient::new(self.config.clone()).await,
        };
        let issued = match client {
            Ok(mut client) => {
                let issued = self.issue(&mut client, &host).await;
                *slot = Some(client);
                issued
            }
            Err(e) => Err(e),
        };

        match issued {
            Ok(key) => Ok(key),
            Err(e) => match self.cached(&host) {
                Some(current) if current.not_after > Utc::now() => {
                    warn!(
                        host = %host,
                        error = %e,
                        expires = %current.not_after,
                        "Renewal failed, keeping current certificate"
                    );
                    Ok(current.key)
                }
                _ => Err(e),
            },
        }
    }

    async fn issue(&self, client: &mut AcmeClient, host: &str) -> Result<Arc<CertifiedKey>> {
        let key_path = self.cache_path(host, "key");
        let cert_key = match self.reusable_key(&key_path).await? {
            Some(key) => key,
            None => KeyPair::generate()?,
        };

        info!(host = %host, "Requesting certificate");
        let chain = client
            .order_certificate(host, &self.challenges, &cert_key)
            .await?;
        let key_pem = cert_key.serialize_pem();
        let key = certified_key_from_pem(chain.as_bytes(), key_pem.as_bytes())?;
        let not_after = not_after(chain.as_bytes())?;

        tokio::fs::create_dir_all(&self.config.cache_dir).await?;
        tokio::fs::write(&key_path, &key_pem).await?;
        tokio::fs::write(self.cache_path(host, "crt"), &chain).await?;

        info!(host = %host, expires = %not_after, "Certificate issued");
        self.cache.write().insert(
            host.to_string(),
            Issued {
                key: key.clone(),
                not_after,
            },
        );
        Ok(key)
    }

    async fn reusable_key(&self, path: &Path) -> Result<Option<KeyPair>> {
        if !self.config.reuse_key {
            return Ok(None);
        }
        match tokio::fs::read_to_string(path).await {
            Ok(pem) => Ok(Some(KeyPair::from_pem(&pem)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_from_disk(&self, host: &str) -> Result<Option<Issued>> {
        let chain = match tokio::fs::read(self.cache_path(host, "crt")).await {
            Ok(chain) => chain,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let key = tokio::fs::read(self.cache_path(host, "key")).await?;
        Ok(Some(Issued {
            key: certified_key_from_pem(&chain, &key)?,
            not_after: not_after(&chain)?,
        }))
    }

    /// Check every configured domain each `every`, renewing certificates
    /// that entered the renewal window.
    pub fn spawn_renewal(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let provider = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                for host in &provider.config.domains {
                    if let Err(e) = provider.ensure(host).await {
                        warn!(host = %host, error = %e, "Certificate renewal failed");
                    }
                }
            }
        })
    }
}

#[async_trait]
impl CertificateProvider for AcmeCertProvider {
    async fn certificate(&self, server_name: &str) -> Option<Arc<CertifiedKey>> {
        match self.ensure(server_name).await {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(host = %server_name, error = %e, "No certificate available");
                None
            }
        }
    }

    fn challenge_certificate(&self, server_name: &str) -> Option<Arc<CertifiedKey>> {
        self.challenges.tls_alpn01(server_name)
    }
}

impl fmt::Debug for AcmeCertProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcmeCertProvider")
            .field("directory", &self.config.directory_url)
            .field("domains", &self.config.domains)
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

/// Expiry of the leaf certificate in a PEM chain.
pub fn not_after(chain_pem: &[u8]) -> Result<DateTime<Utc>> {
    let leaf = rustls_pemfile::certs(&mut &chain_pem[..])
        .next()
        .ok_or_else(|| AcmeError::Certificate("empty certificate chain".to_string()))??;
    let (_, cert) = x509_parser::parse_x509_certificate(leaf.as_ref())
        .map_err(|e| AcmeError::Certificate(e.to_string()))?;
    DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .ok_or_else(|| AcmeError::Certificate("expiry out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../trellis-core/tests/fixtures");

    fn fixture(name: &str) -> Vec<u8> {
        std::fs::read(Path::new(FIXTURES).join(name)).unwrap()
    }

    /// Provider whose CA cannot be reached, with the fixture pair cached.
    fn offline_provider(cache: &Path) -> AcmeCertProvider {
        std::fs::write(cache.join("localhost.crt"), fixture("localhost.crt")).unwrap();
        std::fs::write(cache.join("localhost.key"), fixture("localhost.key")).unwrap();
        let config = AcmeConfig::new(
            "http://127.0.0.1:1/directory",
            vec!["admin@example.com".to_string()],
            vec!["localhost".to_string()],
        )
        .with_cache_dir(cache)
        .with_account_dir(cache.join("accounts"))
        .with_accept_tos(true);
        AcmeCertProvider::new(config)
    }

    #[test]
    fn test_not_after_reads_leaf() {
        let expiry = not_after(&fixture("localhost.crt")).unwrap();
        assert!(expiry.year() >= 2126);
    }

    #[test]
    fn test_not_after_rejects_empty_chain() {
        assert!(matches!(not_after(b""), Err(AcmeError::Certificate(_))));
    }

    #[tokio::test]
    async fn test_serves_cached_certificate_without_ca() {
        let dir = tempfile::tempdir().unwrap();
        let provider = offline_provider(dir.path());

        let key = provider.certificate("LOCALHOST").await.unwrap();
        let again = provider.certificate("localhost").await.unwrap();
        assert!(Arc::ptr_eq(&key, &again));
        assert!(provider.expires("localhost").is_some());
        assert!(!dir.path().join("accounts").exists());
    }

    #[tokio::test]
    async fn test_refuses_unconfigured_host() {
        let dir = tempfile::tempdir().unwrap();
        let provider = offline_provider(dir.path());

        assert!(matches!(
            provider.ensure("evil.example").await,
            Err(AcmeError::HostNotAllowed(_))
        ));
        assert!(provider.certificate("evil.example").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_renewal_keeps_current_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = offline_provider(dir.path());
        // Everything is inside the window, so a renewal is attempted and fails
        provider.config.renew_before_days = 100 * 366;

        let key = provider.ensure("localhost").await.unwrap();
        assert_eq!(key.cert.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_certificate_without_ca_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = AcmeConfig::new(
            "http://127.0.0.1:1/directory",
            vec!["admin@example.com".to_string()],
            vec!["example.com".to_string()],
        )
        .with_cache_dir(dir.path());
        let provider = AcmeCertProvider::new(config);

        assert!(provider.ensure("example.com").await.is_err());
        assert!(provider.challenge_certificate("example.com").is_none());
    }
}
