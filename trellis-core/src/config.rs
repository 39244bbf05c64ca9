//! Service configuration.
//!
//! A [`Config`] is built once at startup and handed to the [`App`](crate::App)
//! and the [`Server`](crate::Server); nothing in the crate reads process-wide
//! state after that point.
//!
//! # Environment variables
//!
//! | Variable               | Field             | Notes                         |
//! |------------------------|-------------------|-------------------------------|
//! | `APP_NAME`             | `name`            |                               |
//! | `APP_MODE`             | `dev_mode`        | `DEV` enables development mode|
//! | `APP_HTTP2`            | `disable_http2`   | `DISABLE` turns HTTP/2 off    |
//! | `APP_HOST`             | `host`            | listen address                |
//! | `FILE_CERT`            | `cert_file`       | PEM certificate chain         |
//! | `FILE_PEM`             | `key_file`        | PEM private key               |
//! | `APP_KEEP_ALIVE`       | `keep_alive`      | seconds                       |
//! | `APP_DUPLICATE_ROUTES` | `duplicate_routes`| `reject` or `replace`         |
//! | `APP_MAX_BODY`         | `max_body_size`   | bytes                         |
//!
//! ```no_run
//! use trellis_core::Config;
//!
//! # fn example() -> Result<(), trellis_core::Error> {
//! // .env first, then the process environment
//! let config = Config::load()?;
//!
//! // or from a TOML file
//! let config = Config::from_toml_file("trellis.toml")?;
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// What happens when a (method, path) pair is registered twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateRoutePolicy {
    /// Registration fails with [`Error::DuplicateRoute`].
    #[default]
    Reject,
    /// The new handler replaces the old one and a warning is logged.
    Replace,
}

impl FromStr for DuplicateRoutePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "replace" => Ok(Self::Replace),
            other => Err(Error::Config(format!(
                "unknown duplicate route policy: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name, used in log fields.
    pub name: String,
    /// Expose internal error detail and pretty-print JSON.
    pub dev_mode: bool,
    /// Serve HTTP/1.1 only and leave `h2` out of ALPN.
    pub disable_http2: bool,
    /// Default listen address.
    pub host: String,
    pub cert_file: String,
    pub key_file: String,
    /// TCP keep-alive period applied to accepted sockets.
    #[serde(with = "duration_secs")]
    pub keep_alive: Duration,
    pub duplicate_routes: DuplicateRoutePolicy,
    /// Request bodies above this size are rejected with 413.
    pub max_body_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "trellis".to_string(),
            dev_mode: false,
            disable_http2: false,
            host: "0.0.0.0:8080".to_string(),
            cert_file: String::new(),
            key_file: String::new(),
            keep_alive: Duration::from_secs(180),
            duplicate_routes: DuplicateRoutePolicy::Reject,
            max_body_size: 4 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `.env` (if present) into the environment, then call [`Config::from_env`].
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "Loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(Error::Config(e.to_string())),
        }
        Self::from_env()
    }

    /// Build from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Missing variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("APP_NAME") {
            config.name = name;
        }
        if let Some(mode) = lookup("APP_MODE") {
            config.dev_mode = mode.eq_ignore_ascii_case("dev");
        }
        if let Some(http2) = lookup("APP_HTTP2") {
            config.disable_http2 = http2.eq_ignore_ascii_case("disable");
        }
        if let Some(host) = lookup("APP_HOST") {
            config.host = host;
        }
        if let Some(cert) = lookup("FILE_CERT") {
            config.cert_file = cert;
        }
        if let Some(key) = lookup("FILE_PEM") {
            config.key_file = key;
        }
        if let Some(secs) = lookup("APP_KEEP_ALIVE") {
            config.keep_alive = Duration::from_secs(parse_number("APP_KEEP_ALIVE", &secs)?);
        }
        if let Some(policy) = lookup("APP_DUPLICATE_ROUTES") {
            config.duplicate_routes = policy.parse()?;
        }
        if let Some(max) = lookup("APP_MAX_BODY") {
            config.max_body_size = parse_number("APP_MAX_BODY", &max)?;
        }

        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_dev_mode(mut self, enabled: bool) -> Self {
        self.dev_mode = enabled;
        self
    }

    pub fn with_http2(mut self, enabled: bool) -> Self {
        self.disable_http2 = !enabled;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_tls_files(mut self, cert: impl Into<String>, key: impl Into<String>) -> Self {
        self.cert_file = cert.into();
        self.key_file = key.into();
        self
    }

    pub fn with_keep_alive(mut self, period: Duration) -> Self {
        self.keep_alive = period;
        self
    }

    pub fn with_duplicate_routes(mut self, policy: DuplicateRoutePolicy) -> Self {
        self.duplicate_routes = policy;
        self
    }

    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a number, got {:?}", key, value)))
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0:8080");
        assert_eq!(config.keep_alive, Duration::from_secs(180));
        assert_eq!(config.duplicate_routes, DuplicateRoutePolicy::Reject);
        assert!(!config.dev_mode);
        assert!(!config.disable_http2);
    }

    #[test]
    fn test_from_lookup() {
        let config = Config::from_lookup(lookup(&[
            ("APP_NAME", "billing"),
            ("APP_MODE", "DEV"),
            ("APP_HTTP2", "DISABLE"),
            ("APP_HOST", "127.0.0.1:9000"),
            ("FILE_CERT", "cert.pem"),
            ("FILE_PEM", "key.pem"),
            ("APP_KEEP_ALIVE", "30"),
            ("APP_DUPLICATE_ROUTES", "replace"),
        ]))
        .unwrap();

        assert_eq!(config.name, "billing");
        assert!(config.dev_mode);
        assert!(config.disable_http2);
        assert_eq!(config.host, "127.0.0.1:9000");
        assert_eq!(config.cert_file, "cert.pem");
        assert_eq!(config.key_file, "key.pem");
        assert_eq!(config.keep_alive, Duration::from_secs(30));
        assert_eq!(config.duplicate_routes, DuplicateRoutePolicy::Replace);
    }

    #[test]
    fn test_from_lookup_rejects_bad_numbers() {
        let err = Config::from_lookup(lookup(&[("APP_KEEP_ALIVE", "soon")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_app_mode_other_than_dev() {
        let config = Config::from_lookup(lookup(&[("APP_MODE", "PROD")])).unwrap();
        assert!(!config.dev_mode);
    }

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml_str(
            r#"
            name = "catalog"
            dev_mode = true
            keep_alive = 60
            duplicate_routes = "replace"
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "catalog");
        assert!(config.dev_mode);
        assert_eq!(config.keep_alive, Duration::from_secs(60));
        assert_eq!(config.duplicate_routes, DuplicateRoutePolicy::Replace);
        assert_eq!(config.host, "0.0.0.0:8080");
    }

    #[test]
    fn test_builder() {
        let config = Config::new()
            .with_dev_mode(true)
            .with_http2(false)
            .with_tls_files("a.crt", "a.key");
        assert!(config.dev_mode);
        assert!(config.disable_http2);
        assert_eq!(config.cert_file, "a.crt");
    }
}
