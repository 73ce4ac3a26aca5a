//! Gateway configuration types.
//!
//! [`GatewayConfig`] is the single source of truth for all runtime settings.
//! It is populated from CLI arguments and the optional TOML file (see
//! `main.rs` and [`crate::infrastructure::config_file`]) or from defaults
//! (useful for local development and tests).
//!
//! Keeping configuration as a plain struct with no environment reads inside
//! the domain makes the gateway easy to embed in tests: build a config, hand
//! it to [`crate::infrastructure::Gateway::bind`], done.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default size of each per-direction read buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 65536;

/// Default cap on the bytes waiting in one send queue before the side that
/// feeds it stops being read.
pub const DEFAULT_MAX_QUEUE_BYTES: usize = 4 * 1024 * 1024;

/// Default cap on concurrently handled connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// All runtime configuration for the gateway.
///
/// Build this struct once at startup and then wrap it in an `Arc` so it can
/// be shared cheaply across all connection tasks.
///
/// # Example
///
/// ```rust
/// use wsgate::domain::GatewayConfig;
///
/// let cfg = GatewayConfig::default();
/// assert_eq!(cfg.target_addr(), "127.0.0.1:5900");
/// ```
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the listening socket binds to. TLS and plaintext clients
    /// share this port.
    pub listen_addr: SocketAddr,

    /// Host name or IP of the TCP service behind the gateway. Resolved on
    /// every connect, so DNS changes are picked up without a restart.
    pub target_host: String,

    /// Port of the TCP service behind the gateway.
    pub target_port: u16,

    /// PEM certificate chain for `wss://` clients.
    pub cert: Option<PathBuf>,

    /// PEM private key. When absent the key is read from [`Self::cert`].
    pub key: Option<PathBuf>,

    /// Refuse plaintext (`ws://`) clients.
    pub tls_only: bool,

    /// Serve plain HTTP GET requests from this directory.
    pub web_root: Option<PathBuf>,

    /// Append every session's traffic to this file.
    pub record_path: Option<PathBuf>,

    /// Upper bound on the whole opening handshake, TLS included.
    pub handshake_timeout: Duration,

    /// Housekeeping period of each proxy loop.
    pub poll_interval: Duration,

    /// Size of each read buffer; one read produces at most one frame.
    pub buffer_size: usize,

    /// See [`DEFAULT_MAX_QUEUE_BYTES`].
    pub max_queue_bytes: usize,

    /// See [`DEFAULT_MAX_CONNECTIONS`].
    pub max_connections: usize,
}

impl GatewayConfig {
    /// `host:port` of the target, with IPv6 literals bracketed.
    pub fn target_addr(&self) -> String {
        if self.target_host.contains(':') && !self.target_host.starts_with('[') {
            format!("[{}]:{}", self.target_host, self.target_port)
        } else {
            format!("{}:{}", self.target_host, self.target_port)
        }
    }

    /// Returns `true` when a certificate is configured, i.e. `wss://` works.
    pub fn tls_enabled(&self) -> bool {
        self.cert.is_some()
    }
}

impl Default for GatewayConfig {
    /// Returns a `GatewayConfig` suitable for local development.
    ///
    /// | Field             | Default          |
    /// |-------------------|------------------|
    /// | listen_addr       | `0.0.0.0:6080`   |
    /// | target            | `127.0.0.1:5900` |
    /// | handshake_timeout | 3 seconds        |
    /// | poll_interval     | 1 second         |
    /// | buffer_size       | 65536            |
    /// | max_queue_bytes   | 4 MiB            |
    /// | max_connections   | 1024             |
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 6080)),
            target_host: "127.0.0.1".to_string(),
            target_port: 5900,
            cert: None,
            key: None,
            tls_only: false,
            web_root: None,
            record_path: None,
            handshake_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_secs(1),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_queue_bytes: DEFAULT_MAX_QUEUE_BYTES,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
