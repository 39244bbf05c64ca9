//! TLS configuration for the HTTPS listener.
//!
//! Certificates come either from a fixed PEM key pair ([`TlsConfig::from_pem_files`])
//! or on demand, per SNI host name, from a [`CertificateProvider`]. On-demand
//! handshakes read the ClientHello first, so a provider may take its time
//! (for instance to have a certificate issued) before the handshake resumes.

use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use rustls::crypto::CryptoProvider;
use rustls::server::{Acceptor, ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{
    ServerConfig,
    pki_types::{CertificateDer, PrivateKeyDer},
};
use rustls_pemfile::{certs, private_key};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::{fs::File, io::BufReader, path::Path, path::PathBuf, sync::Arc};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::{LazyConfigAcceptor, TlsAcceptor};
use tracing::{debug, warn};

/// ALPN protocol a CA uses for TLS-ALPN-01 validation handshakes (RFC 8737).
pub const ACME_TLS_ALPN: &[u8] = b"acme-tls/1";

/// ALPN identifiers, most preferred first.
pub fn alpn_protocols(http2: bool) -> Vec<Vec<u8>> {
    if http2 {
        vec![b"h2".to_vec(), b"http/1.1".to_vec()]
    } else {
        vec![b"http/1.1".to_vec()]
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Pair a certificate chain with its private key for use in a handshake.
pub fn certified_key(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<CertifiedKey>> {
    let signing_key = crypto_provider()
        .key_provider
        .load_private_key(key)
        .map_err(|e| Error::TlsConfig(format!("Unsupported private key: {}", e)))?;
    let certified = CertifiedKey::new(certs, signing_key);
    certified
        .keys_match()
        .map_err(|e| Error::TlsConfig(format!("Certificate does not match key: {}", e)))?;
    Ok(Arc::new(certified))
}

/// Like [`certified_key`], from PEM text.
pub fn certified_key_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<CertifiedKey>> {
    certified_key(parse_certs(cert_pem)?, parse_private_key(key_pem)?)
}

/// rustls server configuration, ready to wrap accepted sockets.
#[derive(Clone, Debug)]
pub struct TlsConfig {
    pub server_config: Arc<ServerConfig>,
}

impl TlsConfig {
    /// Load a certificate chain and private key from PEM files.
    pub fn from_pem_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        http2: bool,
    ) -> Result<Self> {
        let certs = load_certs(cert_path.as_ref())?;
        let key = load_private_key(key_path.as_ref())?;
        Self::from_parts(certs, key, http2)
    }

    pub fn from_pem_bytes(cert_pem: &[u8], key_pem: &[u8], http2: bool) -> Result<Self> {
        let certs = parse_certs(cert_pem)?;
        let key = parse_private_key(key_pem)?;
        Self::from_parts(certs, key, http2)
    }

    fn from_parts(
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        http2: bool,
    ) -> Result<Self> {
        let mut config = ServerConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::TlsConfig(format!("Failed to select protocol versions: {}", e)))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::TlsConfig(format!("Failed to create TLS config: {}", e)))?;
        config.alpn_protocols = alpn_protocols(http2);
        Ok(Self {
            server_config: Arc::new(config),
        })
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.server_config.clone())
    }
}

/// Supplies a certificate for a TLS handshake, keyed by SNI host name.
#[async_trait]
pub trait CertificateProvider: Send + Sync + fmt::Debug {
    /// `None` aborts the handshake.
    async fn certificate(&self, server_name: &str) -> Option<Arc<CertifiedKey>>;

    /// Certificate answering a TLS-ALPN-01 validation handshake for
    /// `server_name`, while one is pending.
    fn challenge_certificate(&self, _server_name: &str) -> Option<Arc<CertifiedKey>> {
        None
    }
}

#[derive(Debug)]
struct Fixed(Arc<CertifiedKey>);

impl ResolvesServerCert for Fixed {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.0.clone())
    }
}

/// Handshakes that ask a [`CertificateProvider`] once the ClientHello is in.
pub(crate) struct OnDemandTls {
    provider: Arc<dyn CertificateProvider>,
    crypto: Arc<CryptoProvider>,
    alpn: Vec<Vec<u8>>,
}

impl OnDemandTls {
    pub(crate) fn new(provider: Arc<dyn CertificateProvider>, http2: bool) -> Self {
        Self {
            provider,
            crypto: crypto_provider(),
            alpn: alpn_protocols(http2),
        }
    }

    fn server_config(&self, key: Arc<CertifiedKey>, alpn: Vec<Vec<u8>>) -> io::Result<Arc<ServerConfig>> {
        let mut config = ServerConfig::builder_with_provider(self.crypto.clone())
            .with_safe_default_protocol_versions()
            .map_err(io::Error::other)?
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(Fixed(key)));
        config.alpn_protocols = alpn;
        Ok(Arc::new(config))
    }

    /// `Ok(None)` means the connection only carried a validation handshake.
    async fn accept(&self, stream: TcpStream) -> io::Result<Option<TlsStream<TcpStream>>> {
        let start = LazyConfigAcceptor::new(Acceptor::default(), stream).await?;
        let (name, validation) = {
            let hello = start.client_hello();
            let name = hello.server_name().map(str::to_ascii_lowercase);
            let validation = hello
                .alpn()
                .is_some_and(|mut protocols| protocols.any(|p| p == ACME_TLS_ALPN));
            (name, validation)
        };
        let Some(name) = name else {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "ClientHello without SNI"));
        };

        if validation {
            let key = self.provider.challenge_certificate(&name).ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no pending validation for {}", name))
            })?;
            let config = self.server_config(key, vec![ACME_TLS_ALPN.to_vec()])?;
            start.into_stream(config).await?;
            debug!(host = %name, "Answered TLS-ALPN-01 validation");
            return Ok(None);
        }

        let key = self.provider.certificate(&name).await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no certificate for {}", name))
        })?;
        let config = self.server_config(key, self.alpn.clone())?;
        start.into_stream(config).await.map(Some)
    }
}

/// How the HTTPS listener completes handshakes.
#[derive(Clone)]
pub(crate) enum Handshake {
    Static(TlsAcceptor),
    OnDemand(Arc<OnDemandTls>),
}

impl Handshake {
    pub(crate) async fn accept(&self, stream: TcpStream) -> io::Result<Option<TlsStream<TcpStream>>> {
        match self {
            Handshake::Static(acceptor) => acceptor.accept(stream).await.map(Some),
            Handshake::OnDemand(on_demand) => on_demand.accept(stream).await,
        }
    }
}

/// Loads `<dir>/<host>.crt` and `<dir>/<host>.key` on first use and caches
/// the result.
///
/// Certificates are expected to be kept current by whatever writes the
/// directory; `trellis-acme` uses the same layout for its cache.
pub struct DirectoryCertProvider {
    dir: PathBuf,
    hosts: Option<HashSet<String>>,
    cache: RwLock<HashMap<String, Arc<CertifiedKey>>>,
}

impl DirectoryCertProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            hosts: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Only serve these host names.
    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = Some(
            hosts
                .into_iter()
                .map(|h| h.into().to_ascii_lowercase())
                .collect(),
        );
        self
    }

    /// Forget cached certificates so the next handshake reloads from disk.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }
}

fn load_pair(dir: &Path, host: &str) -> Result<Arc<CertifiedKey>> {
    if host.is_empty() || host.contains(['/', '\\']) || host.contains("..") {
        return Err(Error::TlsConfig(format!("invalid host name {:?}", host)));
    }
    let certs = load_certs(&dir.join(format!("{}.crt", host)))?;
    let key = load_private_key(&dir.join(format!("{}.key", host)))?;
    certified_key(certs, key)
}

#[async_trait]
impl CertificateProvider for DirectoryCertProvider {
    async fn certificate(&self, server_name: &str) -> Option<Arc<CertifiedKey>> {
        let host = server_name.to_ascii_lowercase();
        if let Some(hosts) = &self.hosts {
            if !hosts.contains(&host) {
                debug!(host = %host, "Host not in TLS allowlist");
                return None;
            }
        }

        let cached = self.cache.read().get(&host).cloned();
        if cached.is_some() {
            return cached;
        }

        let dir = self.dir.clone();
        let name = host.clone();
        let loaded = tokio::task::spawn_blocking(move || load_pair(&dir, &name))
            .await
            .map_err(|e| Error::Internal(e.to_string()))
            .and_then(|loaded| loaded);
        match loaded {
            Ok(key) => {
                self.cache.write().insert(host, key.clone());
                Some(key)
            }
            Err(e) => {
                warn!(host = %host, error = %e, "Failed to load certificate");
                None
            }
        }
    }
}

impl fmt::Debug for DirectoryCertProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryCertProvider")
            .field("dir", &self.dir)
            .field("hosts", &self.hosts)
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        Error::TlsConfig(format!("Failed to open certificate file {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);
    read_certs(&mut reader)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| {
        Error::TlsConfig(format!("Failed to open key file {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);
    read_private_key(&mut reader)
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(pem);
    read_certs(&mut reader)
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(pem);
    read_private_key(&mut reader)
}

fn read_certs(reader: &mut dyn std::io::BufRead) -> Result<Vec<CertificateDer<'static>>> {
    let certs = certs(reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::TlsConfig(format!("Failed to parse certificates: {}", e)))?;
    if certs.is_empty() {
        return Err(Error::TlsConfig("No certificates found".to_string()));
    }
    Ok(certs)
}

fn read_private_key(reader: &mut dyn std::io::BufRead) -> Result<PrivateKeyDer<'static>> {
    private_key(reader)
        .map_err(|e| Error::TlsConfig(format!("Failed to read private key: {}", e)))?
        .ok_or_else(|| Error::TlsConfig("No private key found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/localhost.crt");
    const KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/localhost.key");

    #[test]
    fn test_from_pem_files_advertises_h2() {
        let tls = TlsConfig::from_pem_files(CERT, KEY, true).unwrap();
        assert_eq!(
            tls.server_config.alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }

    #[test]
    fn test_http2_disabled_only_advertises_http1() {
        let tls = TlsConfig::from_pem_files(CERT, KEY, false).unwrap();
        assert_eq!(tls.server_config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_missing_file() {
        let err = TlsConfig::from_pem_files("/nonexistent/cert.pem", KEY, true).unwrap_err();
        assert!(matches!(err, Error::TlsConfig(_)));
    }

    #[test]
    fn test_invalid_pem_bytes() {
        assert!(TlsConfig::from_pem_bytes(b"invalid certificate data", b"nope", true).is_err());
        let cert = std::fs::read(CERT).unwrap();
        assert!(TlsConfig::from_pem_bytes(&cert, b"invalid key data", true).is_err());
    }

    #[tokio::test]
    async fn test_directory_provider_loads_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::copy(CERT, dir.path().join("localhost.crt")).unwrap();
        std::fs::copy(KEY, dir.path().join("localhost.key")).unwrap();

        let provider = DirectoryCertProvider::new(dir.path()).with_hosts(["LocalHost"]);
        assert!(provider.certificate("localhost").await.is_some());

        std::fs::remove_file(dir.path().join("localhost.crt")).unwrap();
        assert!(provider.certificate("LOCALHOST").await.is_some());

        assert!(provider.certificate("example.com").await.is_none());
        assert!(provider.challenge_certificate("localhost").is_none());
    }

    #[tokio::test]
    async fn test_directory_provider_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DirectoryCertProvider::new(dir.path());
        assert!(provider.certificate("../etc/passwd").await.is_none());
        assert!(provider.certificate("missing.example").await.is_none());
    }

    #[test]
    fn test_certified_key_from_pem() {
        let cert = std::fs::read(CERT).unwrap();
        let key = std::fs::read(KEY).unwrap();
        assert!(certified_key_from_pem(&cert, &key).is_ok());
    }

    #[test]
    fn test_certified_key_rejects_foreign_key() {
        let ca = std::fs::read(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/ca.crt")).unwrap();
        let key = std::fs::read(KEY).unwrap();
        let err = certified_key_from_pem(&ca, &key).unwrap_err();
        assert!(matches!(err, Error::TlsConfig(_)));
    }
}
