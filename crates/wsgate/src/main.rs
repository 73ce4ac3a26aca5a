//! wsgate: WebSocket-to-TCP gateway, entry point.
//!
//! Accepts WebSocket connections (Hixie-75, Hixie-76 and HyBi-07; plaintext
//! or TLS on the same port) and proxies each one to a fresh TCP connection
//! to the target.
//!
//! # Usage
//!
//! ```text
//! wsgate [OPTIONS] [[HOST:]PORT] [TARGET_HOST:TARGET_PORT]
//!
//! Options:
//!   --cert <FILE>               PEM certificate (enables wss://)
//!   --key <FILE>                PEM private key [default: read from --cert]
//!   --ssl-only                  Refuse plaintext ws:// clients
//!   --web <DIR>                 Serve plain HTTP requests from DIR
//!   --record <FILE>             Append session traffic to FILE
//!   --config <FILE>             Read settings from a TOML file
//!   --max-queue-bytes <BYTES>   Backpressure threshold per send queue
//!   --max-connections <N>       Concurrent connection cap
//!   --handshake-timeout <SECS>  Opening handshake deadline
//!   -v, --verbose               Debug logging
//! ```
//!
//! # Environment variable overrides
//!
//! Every option can also come from a `WSGATE_*` environment variable. CLI
//! args take precedence when both are present; either overrides the
//! `--config` file.
//!
//! | Variable               | Option                |
//! |------------------------|-----------------------|
//! | `WSGATE_LISTEN`        | `[HOST:]PORT`         |
//! | `WSGATE_TARGET`        | target                |
//! | `WSGATE_CERT`          | `--cert`              |
//! | `WSGATE_KEY`           | `--key`               |
//! | `WSGATE_SSL_ONLY`      | `--ssl-only`          |
//! | `WSGATE_WEB`           | `--web`               |
//! | `WSGATE_RECORD`        | `--record`            |
//! | `WSGATE_CONFIG`        | `--config`            |
//!
//! Log filtering follows `RUST_LOG` (default `info`; `--verbose` makes the
//! default `debug`).

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wsgate::domain::GatewayConfig;
use wsgate::infrastructure::config_file::{load_config_file, FileConfig};
use wsgate::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket-to-TCP gateway.
///
/// Options left unset fall back to the `--config` file, then to built-in
/// defaults.
#[derive(Debug, Parser)]
#[command(
    name = "wsgate",
    about = "Proxy WebSocket clients to a plain TCP service",
    version
)]
struct Cli {
    /// `[host:]port` to listen on. A bare port binds all interfaces.
    #[arg(env = "WSGATE_LISTEN")]
    listen: Option<String>,

    /// `host:port` of the target service.
    #[arg(env = "WSGATE_TARGET")]
    target: Option<String>,

    /// PEM certificate chain; enables `wss://`.
    #[arg(long, env = "WSGATE_CERT")]
    cert: Option<PathBuf>,

    /// PEM private key, if not contained in `--cert`.
    #[arg(long, env = "WSGATE_KEY")]
    key: Option<PathBuf>,

    /// Disallow plaintext (`ws://`) connections.
    #[arg(long, env = "WSGATE_SSL_ONLY")]
    ssl_only: bool,

    /// Serve plain HTTP GET requests from this directory.
    #[arg(long, env = "WSGATE_WEB")]
    web: Option<PathBuf>,

    /// Append every session's traffic to this file.
    #[arg(long, env = "WSGATE_RECORD")]
    record: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(long, env = "WSGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Bytes a send queue may hold before its source stops being read.
    #[arg(long)]
    max_queue_bytes: Option<usize>,

    /// Maximum number of connections handled at once.
    #[arg(long)]
    max_connections: Option<usize>,

    /// Seconds allowed for the opening handshake, TLS included.
    #[arg(long)]
    handshake_timeout: Option<u64>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Merges the CLI over the `--config` file (or defaults) and validates
    /// the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded, an address is
    /// invalid, no target is given anywhere, or `--ssl-only` lacks a cert.
    fn into_gateway_config(self) -> anyhow::Result<GatewayConfig> {
        let mut file = match &self.config {
            Some(path) => load_config_file(path)?,
            None => FileConfig::default(),
        };

        if let Some(listen) = self.listen {
            file.listen = listen;
        }
        if self.target.is_some() {
            file.target = self.target;
        }
        if self.cert.is_some() {
            file.cert = self.cert;
        }
        if self.key.is_some() {
            file.key = self.key;
        }
        if self.ssl_only {
            file.ssl_only = true;
        }
        if self.web.is_some() {
            file.web = self.web;
        }
        if self.record.is_some() {
            file.record = self.record;
        }
        if let Some(bytes) = self.max_queue_bytes {
            file.max_queue_bytes = bytes;
        }
        if let Some(n) = self.max_connections {
            file.max_connections = n;
        }
        if let Some(secs) = self.handshake_timeout {
            file.handshake_timeout_secs = secs;
        }

        Ok(file.into_gateway_config()?)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// 1. CLI arguments are parsed with `clap` into a [`Cli`] struct.
/// 2. `tracing_subscriber` is initialised; `RUST_LOG` wins over `--verbose`.
/// 3. A [`GatewayConfig`] is built from the CLI and the optional TOML file.
/// 4. A Ctrl+C handler is spawned that clears the shared `running` flag.
/// 5. [`run_server`] accepts connections until the flag is cleared.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ─────────────────────────────────────────────────────────
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = cli.into_gateway_config()?;

    info!(
        "wsgate starting: listen={}, target={}",
        config.listen_addr,
        config.target_addr()
    );

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    // The accept loop checks this flag every 200 ms.
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    // ── Main server loop ───────────────────────────────────────────────────────
    run_server(config, running).await?;

    info!("wsgate stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
