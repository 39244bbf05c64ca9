//! # Trellis ACME
//!
//! Certificate issuance for the auto-TLS listener. [`AcmeCertProvider`]
//! implements [`trellis_core::CertificateProvider`]: the first handshake for
//! a configured domain runs an ACME order (RFC 8555) against the CA, and
//! later handshakes are served from memory or from the on-disk cache until
//! the certificate enters its renewal window.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use trellis_acme::{AcmeCertProvider, AcmeConfig};
//! use trellis_core::{App, Server};
//!
//! # async fn example() -> trellis_core::Result<()> {
//! let config = AcmeConfig::lets_encrypt_staging(
//!     vec!["admin@example.com".to_string()],
//!     vec!["example.com".to_string()],
//! )
//! .with_accept_tos(true)
//! .with_cache_dir("/var/lib/myapp/certs");
//!
//! let provider = Arc::new(AcmeCertProvider::new(config));
//! let _renewal = provider.spawn_renewal(std::time::Duration::from_secs(12 * 60 * 60));
//!
//! let server = Server::new(App::new());
//! server.start_auto_tls("0.0.0.0:443", provider).await
//! # }
//! ```
//!
//! ## Challenge types
//!
//! TLS-ALPN-01, the default, is answered by the HTTPS listener itself: the
//! validation handshake negotiates `acme-tls/1` and receives a one-off
//! certificate from [`Challenges`].
//!
//! HTTP-01 needs a plain listener on port 80 with the responder installed:
//!
//! ```no_run
//! use std::sync::Arc;
//! use trellis_acme::{AcmeCertProvider, AcmeConfig, ChallengeType};
//! use trellis_core::{App, Server};
//!
//! # async fn example() -> trellis_core::Result<()> {
//! let config = AcmeConfig::lets_encrypt_production(
//!     vec!["admin@example.com".to_string()],
//!     vec!["example.com".to_string()],
//! )
//! .with_accept_tos(true)
//! .with_challenge_type(ChallengeType::Http01);
//! let provider = Arc::new(AcmeCertProvider::new(config));
//!
//! let mut app = App::new();
//! app.pre(provider.http01_middleware());
//! let server = Server::new(app);
//!
//! let plain = server.clone();
//! tokio::spawn(async move { plain.start("0.0.0.0:80").await });
//! server.start_auto_tls("0.0.0.0:443", provider).await
//! # }
//! ```

pub mod account;
pub mod challenge;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod order;
pub mod provider;

pub use account::{Account, AccountCreate, AccountKey, AccountStatus};
pub use challenge::{
    Authorization, AuthorizationStatus, Challenge, ChallengeStatus, Challenges, HTTP01_PREFIX,
    Published, http01_middleware, tls_alpn01_certificate,
};
pub use client::AcmeClient;
pub use config::{AcmeConfig, ChallengeType, directories};
pub use directory::{Directory, DirectoryMeta};
pub use error::{AcmeError, Problem, Result};
pub use order::{Identifier, NewOrder, Order, OrderStatus};
pub use provider::{AcmeCertProvider, not_after};
