//! Server lifecycle.
//!
//! A [`Server`] owns an [`App`] and runs up to two listeners: plain HTTP and
//! HTTPS. Each listener serves until [`Server::close`] aborts it or
//! [`Server::shutdown`] drains it, after which its `start*` call returns
//! [`Error::ServerClosed`].
//!
//! ```no_run
//! use std::time::Duration;
//! use trellis_core::{App, Server};
//!
//! # async fn run() -> trellis_core::Result<()> {
//! let server = Server::new(App::new());
//! let background = server.clone();
//! let handle = tokio::spawn(async move { background.start("127.0.0.1:8080").await });
//!
//! trellis_core::shutdown::signal().await;
//! server.shutdown(Duration::from_secs(10)).await?;
//! let _ = handle.await;
//! # Ok(())
//! # }
//! ```

use crate::app::App;
use crate::context::ConnectionInfo;
use crate::error::{Error, Result};
use crate::shutdown::{ConnectionTracker, Signal, stopped};
use crate::tls::{CertificateProvider, Handshake, OnDemandTls, TlsConfig};
use http::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use parking_lot::Mutex;
use socket2::{SockRef, TcpKeepalive};
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Http,
    Https,
}

impl Kind {
    fn as_str(&self) -> &'static str {
        match self {
            Kind::Http => "http",
            Kind::Https => "https",
        }
    }
}

/// Per-kind listener state.
struct Slot {
    kind: Kind,
    signal: watch::Sender<Signal>,
    listeners: ConnectionTracker,
    connections: ConnectionTracker,
    prebound: Mutex<Option<TcpListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Slot {
    fn new(kind: Kind) -> Self {
        let (signal, _) = watch::channel(Signal::Running);
        Self {
            kind,
            signal,
            listeners: ConnectionTracker::new(),
            connections: ConnectionTracker::new(),
            prebound: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    fn is_running(&self) -> bool {
        *self.signal.borrow() == Signal::Running
    }

    fn stop_accepting(&self) {
        self.listeners.stop_accepting();
        self.connections.stop_accepting();
        self.prebound.lock().take();
    }
}

struct ServerInner {
    app: Arc<App>,
    http: Slot,
    https: Slot,
}

/// Runs an [`App`] on TCP listeners. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn new(app: App) -> Self {
        Self::from_arc(Arc::new(app))
    }

    pub fn from_arc(app: Arc<App>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                app,
                http: Slot::new(Kind::Http),
                https: Slot::new(Kind::Https),
            }),
        }
    }

    pub fn app(&self) -> &App {
        &self.inner.app
    }

    /// Bind the plain listener now; a later [`Server::start`] serves on it.
    pub async fn listen(&self, addr: &str) -> Result<SocketAddr> {
        self.bind(&self.inner.http, addr).await
    }

    /// Bind the HTTPS listener now.
    pub async fn listen_tls(&self, addr: &str) -> Result<SocketAddr> {
        self.bind(&self.inner.https, addr).await
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.http.local_addr.lock()
    }

    pub fn tls_local_addr(&self) -> Option<SocketAddr> {
        *self.inner.https.local_addr.lock()
    }

    /// Active connections on both listeners.
    pub fn active_connections(&self) -> u64 {
        self.inner.http.connections.active_count() + self.inner.https.connections.active_count()
    }

    /// Serve plain HTTP on `addr` until closed.
    pub async fn start(&self, addr: &str) -> Result<()> {
        let slot = &self.inner.http;
        let listener = self.take_or_bind(slot, addr).await?;
        self.accept_loop(slot, listener, None).await
    }

    /// Serve HTTPS with the key pair in `cert_file` and `key_file`.
    ///
    /// Fails immediately when either path is empty.
    pub async fn start_tls(&self, addr: &str, cert_file: &str, key_file: &str) -> Result<()> {
        if cert_file.is_empty() || key_file.is_empty() {
            return Err(Error::TlsConfig("invalid tls configuration".to_string()));
        }
        let tls = TlsConfig::from_pem_files(cert_file, key_file, !self.app().config().disable_http2)?;
        self.start_with_tls(addr, tls).await
    }

    /// Serve HTTPS, asking `provider` for a certificate once each client's
    /// SNI host name is known.
    ///
    /// The provider may issue certificates on the fly; see `trellis-acme`.
    pub async fn start_auto_tls(
        &self,
        addr: &str,
        provider: Arc<dyn CertificateProvider>,
    ) -> Result<()> {
        let on_demand = OnDemandTls::new(provider, !self.app().config().disable_http2);
        let slot = &self.inner.https;
        let listener = self.take_or_bind(slot, addr).await?;
        self.accept_loop(slot, listener, Some(Handshake::OnDemand(Arc::new(on_demand))))
            .await
    }

    /// Serve HTTPS with a prepared rustls configuration.
    pub async fn start_with_tls(&self, addr: &str, tls: TlsConfig) -> Result<()> {
        let slot = &self.inner.https;
        let listener = self.take_or_bind(slot, addr).await?;
        self.accept_loop(slot, listener, Some(Handshake::Static(tls.acceptor())))
            .await
    }

    /// Start from configuration: HTTPS on `host` when a certificate and key
    /// are configured, plain HTTP otherwise.
    pub async fn run(&self) -> Result<()> {
        let config = self.app().config().clone();
        if config.cert_file.is_empty() && config.key_file.is_empty() {
            self.start(&config.host).await
        } else {
            self.start_tls(&config.host, &config.cert_file, &config.key_file)
                .await
        }
    }

    /// Stop both listeners and drop every open connection immediately.
    pub fn close(&self) -> Result<()> {
        for slot in [&self.inner.https, &self.inner.http] {
            slot.stop_accepting();
            slot.signal.send_replace(Signal::Abort);
        }
        info!("Server closed");
        Ok(())
    }

    /// Stop accepting and wait for in-flight requests to finish.
    ///
    /// Both listener kinds share one deadline. Both are always drained; the
    /// first failure is returned.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        info!(timeout = ?timeout, "Initiating graceful shutdown");

        for slot in [&self.inner.https, &self.inner.http] {
            slot.stop_accepting();
            slot.signal.send_if_modified(|state| {
                if *state == Signal::Running {
                    *state = Signal::Graceful;
                    true
                } else {
                    false
                }
            });
        }

        let mut first_error = None;
        for slot in [&self.inner.https, &self.inner.http] {
            let drained = slot.listeners.drain_until(deadline).await
                && slot.connections.drain_until(deadline).await;
            if !drained {
                let remaining = slot.connections.active_count();
                warn!(kind = slot.kind.as_str(), remaining, "Shutdown deadline reached");
                first_error.get_or_insert(Error::ShutdownTimeout(remaining));
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("Graceful shutdown complete");
                Ok(())
            }
        }
    }

    async fn bind(&self, slot: &Slot, addr: &str) -> Result<SocketAddr> {
        if !slot.is_running() {
            return Err(Error::ServerClosed);
        }
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        *slot.local_addr.lock() = Some(local);
        *slot.prebound.lock() = Some(listener);
        Ok(local)
    }

    async fn take_or_bind(&self, slot: &Slot, addr: &str) -> Result<TcpListener> {
        if !slot.is_running() {
            return Err(Error::ServerClosed);
        }
        let prebound = slot.prebound.lock().take();
        match prebound {
            Some(listener) => Ok(listener),
            None => {
                let listener = TcpListener::bind(addr).await?;
                *slot.local_addr.lock() = Some(listener.local_addr()?);
                Ok(listener)
            }
        }
    }

    async fn accept_loop(
        &self,
        slot: &Slot,
        listener: TcpListener,
        tls: Option<Handshake>,
    ) -> Result<()> {
        let Some(_running) = slot.listeners.increment() else {
            return Err(Error::ServerClosed);
        };
        let mut signal = slot.signal.subscribe();
        let local = listener.local_addr()?;
        let config = self.app().config();
        let keep_alive = config.keep_alive;
        let http2 = !config.disable_http2;
        info!(addr = %local, "{} server started", slot.kind.as_str());

        loop {
            tokio::select! {
                state = stopped(&mut signal) => {
                    debug!(kind = slot.kind.as_str(), ?state, "Listener stopping");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    let Some(guard) = slot.connections.increment() else {
                        break;
                    };
                    if let Err(e) = set_keep_alive(&stream, keep_alive) {
                        debug!(error = %e, "Failed to enable TCP keep-alive");
                    }

                    let app = self.inner.app.clone();
                    let mut conn_signal = slot.signal.subscribe();
                    let handshake = tls.clone();
                    tokio::spawn(async move {
                        let _guard = guard;
                        match handshake {
                            None => {
                                let info = ConnectionInfo { remote_addr, tls: false };
                                serve_connection(app, stream, info, http2, conn_signal).await;
                            }
                            Some(handshake) => {
                                // No request can be in flight before the handshake completes.
                                let accepted = tokio::select! {
                                    result = handshake.accept(stream) => result,
                                    state = stopped(&mut conn_signal) => {
                                        debug!(remote = %remote_addr, ?state, "Dropping connection before TLS handshake");
                                        return;
                                    }
                                };
                                match accepted {
                                    Ok(Some(stream)) => {
                                        let info = ConnectionInfo { remote_addr, tls: true };
                                        serve_connection(app, stream, info, http2, conn_signal).await;
                                    }
                                    Ok(None) => {}
                                    Err(e) => {
                                        debug!(remote = %remote_addr, error = %e, "TLS handshake failed");
                                    }
                                }
                            }
                        }
                    });
                }
            }
        }

        drop(listener);
        info!(addr = %local, "{} server stopped", slot.kind.as_str());
        Err(Error::ServerClosed)
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr())
            .field("tls_local_addr", &self.tls_local_addr())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

fn set_keep_alive(stream: &TcpStream, period: Duration) -> std::io::Result<()> {
    SockRef::from(stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(period))
}

/// Serve one connection until it ends, reacting to lifecycle signals.
async fn serve_connection<S>(
    app: Arc<App>,
    stream: S,
    info: ConnectionInfo,
    http2: bool,
    mut signal: watch::Receiver<Signal>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |mut req: Request<Incoming>| {
        let app = app.clone();
        async move {
            req.extensions_mut().insert(info);
            Ok::<_, Infallible>(app.serve_incoming(req).await)
        }
    });

    let mut builder = auto::Builder::new(TokioExecutor::new());
    if !http2 {
        builder = builder.http1_only();
    }
    let conn = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut draining = false;
    let mut detached = false;
    loop {
        match *signal.borrow_and_update() {
            Signal::Abort => {
                debug!(remote = %info.remote_addr, "Connection aborted");
                return;
            }
            Signal::Graceful if !draining => {
                conn.as_mut().graceful_shutdown();
                draining = true;
            }
            _ => {}
        }

        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(remote = %info.remote_addr, error = %e, "Connection error");
                }
                return;
            }
            changed = signal.changed(), if !detached => {
                if changed.is_err() {
                    detached = true;
                }
            }
        }
    }
}
