//! TOML configuration file and address parsing.
//!
//! Every setting can live in a TOML file passed with `--config`; values given
//! on the command line override the file. Example:
//!
//! ```toml
//! listen = "0.0.0.0:6080"
//! target = "vnc.internal:5900"
//! cert = "/etc/wsgate/self.pem"
//! ssl_only = true
//! web = "/usr/share/novnc"
//! max_connections = 256
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` take `some_fn()`
//! when absent, so a file only needs the settings it changes.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::config::{
    GatewayConfig, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_QUEUE_BYTES,
};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A listen or target address is not `host:port` / `port`.
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    /// No target was given on the command line or in the file.
    #[error("no target given; expected target_host:target_port")]
    MissingTarget,

    /// `ssl_only` was requested without a certificate.
    #[error("ssl_only requires a certificate (--cert)")]
    TlsOnlyWithoutCert,
}

// ── Config schema ─────────────────────────────────────────────────────────────

/// On-disk gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// `[host:]port` to listen on.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// `host:port` of the target service.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
    #[serde(default)]
    pub ssl_only: bool,
    #[serde(default)]
    pub web: Option<PathBuf>,
    #[serde(default)]
    pub record: Option<PathBuf>,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_max_queue_bytes")]
    pub max_queue_bytes: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_listen() -> String {
    "6080".to_string()
}
fn default_handshake_timeout_secs() -> u64 {
    3
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}
fn default_max_queue_bytes() -> usize {
    DEFAULT_MAX_QUEUE_BYTES
}
fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            target: None,
            cert: None,
            key: None,
            ssl_only: false,
            web: None,
            record: None,
            handshake_timeout_secs: default_handshake_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            buffer_size: default_buffer_size(),
            max_queue_bytes: default_max_queue_bytes(),
            max_connections: default_max_connections(),
        }
    }
}

impl FileConfig {
    /// Validates the settings and converts them into a [`GatewayConfig`].
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidAddress`] for unparseable addresses,
    /// [`ConfigError::MissingTarget`] without a target and
    /// [`ConfigError::TlsOnlyWithoutCert`] for `ssl_only` without `cert`.
    pub fn into_gateway_config(self) -> Result<GatewayConfig, ConfigError> {
        let listen_addr = parse_listen(&self.listen)?;
        let target = self.target.ok_or(ConfigError::MissingTarget)?;
        let (target_host, target_port) = parse_target(&target)?;
        if self.ssl_only && self.cert.is_none() {
            return Err(ConfigError::TlsOnlyWithoutCert);
        }

        Ok(GatewayConfig {
            listen_addr,
            target_host,
            target_port,
            cert: self.cert,
            key: self.key,
            tls_only: self.ssl_only,
            web_root: self.web,
            record_path: self.record,
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            buffer_size: self.buffer_size,
            max_queue_bytes: self.max_queue_bytes,
            max_connections: self.max_connections,
        })
    }
}

/// Loads a [`FileConfig`] from `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read (a missing file is
/// an error here: the path was given explicitly) and [`ConfigError::Parse`]
/// if the TOML is malformed or has unknown keys.
pub fn load_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

// ── Address parsing ───────────────────────────────────────────────────────────

/// Parses a listen address: a bare port binds all interfaces, otherwise
/// `host:port` (host names are resolved once, here).
///
/// # Errors
///
/// [`ConfigError::InvalidAddress`] when the string is neither form or the
/// host does not resolve.
pub fn parse_listen(s: &str) -> Result<SocketAddr, ConfigError> {
    if let Ok(port) = s.parse::<u16>() {
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let (host, port) = parse_target(s)?;
    (host.as_str(), port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ConfigError::InvalidAddress(s.to_string()))
}

/// Splits `host:port` into its parts. IPv6 hosts may be bracketed
/// (`[::1]:5900`); the brackets are removed.
///
/// # Errors
///
/// [`ConfigError::InvalidAddress`] when there is no port, the port is not a
/// number or the host is empty.
pub fn parse_target(s: &str) -> Result<(String, u16), ConfigError> {
    let invalid = || ConfigError::InvalidAddress(s.to_string());
    let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
    let port: u16 = port.parse().map_err(|_| invalid())?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
