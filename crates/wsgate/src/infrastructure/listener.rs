//! Accept loop and per-connection task management.
//!
//! This module is responsible for:
//!
//! 1. Binding the single listening socket (TLS and plaintext share it).
//! 2. Accepting connections and capping how many are handled at once.
//! 3. Spawning one Tokio task per connection, which negotiates the
//!    handshake, connects to the target and runs the proxy loop.
//! 4. Stopping when the shared `running` flag is cleared.
//!
//! A failure inside one connection task is logged and ends that connection
//! only; the accept loop keeps going.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::domain::config::GatewayConfig;
use crate::domain::session::Session;
use crate::infrastructure::negotiator::{negotiate_connection, ConnectionKind};
use crate::infrastructure::proxy_loop::{run_proxy, ProxySettings};
use crate::infrastructure::recorder::FileRecorder;
use crate::infrastructure::target_conn::TargetConnection;
use crate::infrastructure::tls::load_tls_acceptor;
use crate::infrastructure::web::{StaticFiles, WebFallback};

/// How long `accept` waits before the `running` flag is checked again.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Everything a connection task needs, shared read-only by all of them.
pub struct GatewayContext {
    pub config: GatewayConfig,
    /// Present when a certificate is configured.
    pub tls: Option<TlsAcceptor>,
    /// Present when a web root is configured.
    pub web: Option<Arc<dyn WebFallback>>,
    /// Present when a recording file is configured; cloned into each session.
    pub recorder: Option<FileRecorder>,
}

impl GatewayContext {
    /// Loads TLS material and sets up the web fallback and recording file
    /// described by `config`.
    ///
    /// With a recording path this spawns the recording writer task, so it
    /// must then be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate or key cannot be loaded, or the
    /// recording file cannot be opened.
    pub fn from_config(config: GatewayConfig) -> anyhow::Result<Self> {
        let tls = match &config.cert {
            Some(cert) => Some(
                load_tls_acceptor(cert, config.key.as_deref())
                    .with_context(|| format!("failed to load TLS material from {}", cert.display()))?,
            ),
            None => None,
        };
        let web = config
            .web_root
            .as_ref()
            .map(|root| Arc::new(StaticFiles::new(root)) as Arc<dyn WebFallback>);
        let recorder = match &config.record_path {
            Some(path) => Some(
                FileRecorder::spawn(path)
                    .map(|(recorder, _writer)| recorder)
                    .with_context(|| format!("failed to open recording file {}", path.display()))?,
            ),
            None => None,
        };
        Ok(Self {
            config,
            tls,
            web,
            recorder,
        })
    }
}

impl std::fmt::Debug for GatewayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayContext")
            .field("config", &self.config)
            .field("tls", &self.tls.is_some())
            .field("web", &self.web.is_some())
            .field("recorder", &self.recorder.is_some())
            .finish()
    }
}

/// Connection counters, readable while the gateway runs.
#[derive(Debug, Default)]
pub struct GatewayStats {
    pub connections_accepted: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub connections_active: AtomicU64,
    pub sessions_proxied: AtomicU64,
}

/// A bound gateway, ready to [`run`](Gateway::run).
#[derive(Debug)]
pub struct Gateway {
    listener: TcpListener,
    ctx: Arc<GatewayContext>,
    limiter: Arc<Semaphore>,
    stats: Arc<GatewayStats>,
}

// ── Public API ────────────────────────────────────────────────────────────────

impl Gateway {
    /// Loads TLS material and binds the listening socket.
    ///
    /// Binding happens here rather than in [`run`](Gateway::run) so callers
    /// (tests in particular) can bind port 0 and read the real port from
    /// [`local_addr`](Gateway::local_addr).
    ///
    /// # Errors
    ///
    /// Returns an error if TLS material cannot be loaded or the address
    /// cannot be bound.
    pub async fn bind(config: GatewayConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;
        let limiter = Arc::new(Semaphore::new(config.max_connections));
        let ctx = Arc::new(GatewayContext::from_config(config)?);

        Ok(Self {
            listener,
            ctx,
            limiter,
            stats: Arc::new(GatewayStats::default()),
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle to the connection counters.
    pub fn stats(&self) -> Arc<GatewayStats> {
        Arc::clone(&self.stats)
    }

    /// Accepts connections until `running` is set to `false`.
    ///
    /// In-flight connections are not waited for; their tasks finish on
    /// their own (or die with the runtime).
    pub async fn run(self, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        let cfg = &self.ctx.config;
        info!("WebSocket gateway listening on {}", self.local_addr()?);
        info!("proxying to {}", cfg.target_addr());
        match (&self.ctx.tls, cfg.tls_only) {
            (Some(_), true) => info!("TLS only (wss://)"),
            (Some(_), false) => info!("TLS and plaintext (wss:// and ws://)"),
            (None, _) => info!("plaintext only (ws://)"),
        }
        if let Some(root) = &cfg.web_root {
            info!("serving web files from {}", root.display());
        }

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, peer))) => self.dispatch(stream, peer),
                Ok(Err(e)) => {
                    // Usually transient, e.g. out of file descriptors.
                    error!("accept error: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(_) => {}
            }
        }

        Ok(())
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        let permit = match Arc::clone(&self.limiter).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "connection limit ({}) reached; dropping {peer}",
                    self.ctx.config.max_connections
                );
                return;
            }
        };
        self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
        debug!("accepted connection from {peer}");

        let ctx = Arc::clone(&self.ctx);
        let stats = Arc::clone(&self.stats);
        tokio::spawn(
            async move {
                handle_connection(stream, peer, ctx, &stats, permit).await;
                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            }
            .instrument(info_span!("connection", peer = %peer)),
        );
    }
}

/// Binds to `config.listen_addr` and runs the gateway until `running` is
/// cleared.
///
/// # Errors
///
/// Returns an error if startup fails (TLS material, bind).
pub async fn run_server(config: GatewayConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    Gateway::bind(config).await?.run(running).await
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Top-level handler for one accepted connection; logs the outcome of
/// [`run_connection`]. The permit is held until the connection is done.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<GatewayContext>,
    stats: &GatewayStats,
    _permit: OwnedSemaphorePermit,
) {
    match run_connection(stream, peer, &ctx, stats).await {
        Ok(()) => debug!("connection {peer} finished"),
        Err(e) => warn!("connection {peer} closed with error: {e:#}"),
    }
}

/// Runs the complete lifecycle of one connection: negotiation, target
/// connect, proxying.
///
/// # Errors
///
/// Returns an error if the target cannot be reached or the proxy loop fails.
async fn run_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &GatewayContext,
    stats: &GatewayStats,
) -> anyhow::Result<()> {
    let handshake = match negotiate_connection(stream, peer, ctx).await {
        ConnectionKind::FlashPolicy => {
            info!("{peer}: sent Flash policy response");
            return Ok(());
        }
        ConnectionKind::PlainHttp => return Ok(()),
        ConnectionKind::Rejected(reason) => {
            info!("{peer}: {reason}");
            return Ok(());
        }
        kind => match kind.into_websocket() {
            Some(handshake) => handshake,
            None => return Ok(()),
        },
    };

    info!(
        "{peer}: {} WebSocket connection, version {}, encoding {:?}, path {}",
        handshake.scheme, handshake.version, handshake.encoding, handshake.path
    );

    let target_addr = ctx.config.target_addr();
    let target = TargetConnection::connect(&target_addr)
        .await
        .with_context(|| format!("{peer}: cannot proxy without a target connection"))?;
    info!("{peer}: connected to target {target_addr} ({})", target.addr);

    let mut session = Session::new(
        peer,
        handshake.version,
        handshake.encoding,
        handshake.path,
        handshake.leftover,
    );
    if let Some(recorder) = &ctx.recorder {
        session = session.with_recorder(Box::new(recorder.clone()));
    }
    stats.sessions_proxied.fetch_add(1, Ordering::Relaxed);

    let span = info_span!("session", id = %session.id);
    let outcome = run_proxy(
        &mut session,
        handshake.stream,
        target.stream,
        ProxySettings::from(&ctx.config),
    )
    .instrument(span)
    .await;

    let exit = outcome.with_context(|| format!("session {} with {peer} failed", session.id))?;
    info!("{peer}: {exit}; {}", session.stats);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
