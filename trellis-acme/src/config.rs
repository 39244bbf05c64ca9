// Issuance configuration

use std::path::PathBuf;
use std::time::Duration;

/// Directory URLs of public ACME certificate authorities.
pub mod directories {
    pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

    /// Issues untrusted certificates under generous rate limits.
    pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

    pub const ZEROSSL: &str = "https://acme.zerossl.com/v2/DV90";

    pub const BUYPASS: &str = "https://api.buypass.com/acme/directory";

    pub const GOOGLE: &str = "https://dv.acme-v02.api.pki.goog/directory";
}

/// How domain control is proven to the CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChallengeType {
    /// Key authorization served over plain HTTP on port 80.
    Http01,
    /// Self-signed certificate answered during a TLS handshake on port 443.
    #[default]
    TlsAlpn01,
}

impl ChallengeType {
    /// Challenge type name as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::Http01 => "http-01",
            ChallengeType::TlsAlpn01 => "tls-alpn-01",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AcmeConfig {
    pub directory_url: String,

    /// Contact addresses, without the `mailto:` prefix.
    pub contact_email: Vec<String>,

    /// Host names certificates may be issued for. Anything else is refused.
    pub domains: Vec<String>,

    pub challenge_type: ChallengeType,

    /// Certificates and keys, stored as `<host>.crt` and `<host>.key`.
    pub cache_dir: PathBuf,

    /// Account key storage.
    pub account_dir: PathBuf,

    /// Renew a certificate when this many days remain.
    pub renew_before_days: u32,

    pub accept_tos: bool,

    pub eab_kid: Option<String>,

    /// Base64url HMAC key issued with `eab_kid`.
    pub eab_hmac_key: Option<String>,

    /// Keep the certificate key found in the cache across renewals.
    pub reuse_key: bool,

    /// Delay between status checks of authorizations and orders.
    pub poll_interval: Duration,

    pub poll_attempts: u32,
}

impl AcmeConfig {
    /// # Example
    ///
    /// ```
    /// use trellis_acme::{AcmeConfig, ChallengeType};
    ///
    /// let config = AcmeConfig::new(
    ///     "https://acme-v02.api.letsencrypt.org/directory",
    ///     vec!["admin@example.com".to_string()],
    ///     vec!["example.com".to_string(), "www.example.com".to_string()],
    /// );
    /// assert_eq!(config.challenge_type, ChallengeType::TlsAlpn01);
    /// ```
    pub fn new(
        directory_url: impl Into<String>,
        contact_email: Vec<String>,
        domains: Vec<String>,
    ) -> Self {
        Self {
            directory_url: directory_url.into(),
            contact_email,
            domains,
            challenge_type: ChallengeType::default(),
            cache_dir: PathBuf::from("./certs"),
            account_dir: PathBuf::from("./accounts"),
            renew_before_days: 30,
            accept_tos: false,
            eab_kid: None,
            eab_hmac_key: None,
            reuse_key: false,
            poll_interval: Duration::from_secs(2),
            poll_attempts: 30,
        }
    }

    pub fn lets_encrypt_production(contact_email: Vec<String>, domains: Vec<String>) -> Self {
        Self::new(directories::LETS_ENCRYPT_PRODUCTION, contact_email, domains)
    }

    pub fn lets_encrypt_staging(contact_email: Vec<String>, domains: Vec<String>) -> Self {
        Self::new(directories::LETS_ENCRYPT_STAGING, contact_email, domains)
    }

    /// ZeroSSL only accepts accounts with external account binding.
    pub fn zerossl(
        contact_email: Vec<String>,
        domains: Vec<String>,
        eab_kid: String,
        eab_hmac_key: String,
    ) -> Self {
        Self::new(directories::ZEROSSL, contact_email, domains).with_eab(eab_kid, eab_hmac_key)
    }

    pub fn with_challenge_type(mut self, challenge_type: ChallengeType) -> Self {
        self.challenge_type = challenge_type;
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_account_dir(mut self, account_dir: impl Into<PathBuf>) -> Self {
        self.account_dir = account_dir.into();
        self
    }

    pub fn with_renew_before_days(mut self, days: u32) -> Self {
        self.renew_before_days = days;
        self
    }

    pub fn with_accept_tos(mut self, accept: bool) -> Self {
        self.accept_tos = accept;
        self
    }

    pub fn with_eab(mut self, kid: String, hmac_key: String) -> Self {
        self.eab_kid = Some(kid);
        self.eab_hmac_key = Some(hmac_key);
        self
    }

    pub fn with_reuse_key(mut self, reuse: bool) -> Self {
        self.reuse_key = reuse;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_attempts(mut self, attempts: u32) -> Self {
        self.poll_attempts = attempts;
        self
    }

    /// Whether `host` is one of the configured domains. Comparison ignores case.
    pub fn allows(&self, host: &str) -> bool {
        self.domains.iter().any(|d| d.eq_ignore_ascii_case(host))
    }
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self::lets_encrypt_staging(
            vec!["admin@example.com".to_string()],
            vec!["example.com".to_string()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acme_config_new() {
        let config = AcmeConfig::new(
            directories::LETS_ENCRYPT_PRODUCTION,
            vec!["test@example.com".to_string()],
            vec!["example.com".to_string()],
        );

        assert_eq!(config.directory_url, directories::LETS_ENCRYPT_PRODUCTION);
        assert_eq!(config.contact_email, vec!["test@example.com"]);
        assert_eq!(config.challenge_type, ChallengeType::TlsAlpn01);
        assert_eq!(config.renew_before_days, 30);
        assert!(!config.accept_tos);
        assert!(!config.reuse_key);
    }

    #[test]
    fn test_zerossl_sets_eab() {
        let config = AcmeConfig::zerossl(
            vec!["admin@example.com".to_string()],
            vec!["example.com".to_string()],
            "kid-1".to_string(),
            "c2VjcmV0".to_string(),
        );

        assert_eq!(config.directory_url, directories::ZEROSSL);
        assert_eq!(config.eab_kid.as_deref(), Some("kid-1"));
        assert_eq!(config.eab_hmac_key.as_deref(), Some("c2VjcmV0"));
    }

    #[test]
    fn test_builder_chain() {
        let config = AcmeConfig::default()
            .with_challenge_type(ChallengeType::Http01)
            .with_cache_dir("/var/lib/certs")
            .with_renew_before_days(14)
            .with_poll_interval(Duration::from_millis(500))
            .with_accept_tos(true);

        assert_eq!(config.challenge_type.as_str(), "http-01");
        assert_eq!(config.cache_dir, PathBuf::from("/var/lib/certs"));
        assert_eq!(config.renew_before_days, 14);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert!(config.accept_tos);
    }

    #[test]
    fn test_allows_ignores_case() {
        let config = AcmeConfig::default();
        assert!(config.allows("EXAMPLE.com"));
        assert!(!config.allows("www.example.com"));
    }
}
