//! TCP connection to the target service.
//!
//! Each WebSocket session gets its own connection to the target. The target
//! is plain TCP and knows nothing about WebSockets; it just sees the bytes
//! the browser sent.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpStream;
use tracing::debug;

/// An open connection to the target.
#[derive(Debug)]
pub struct TargetConnection {
    pub stream: TcpStream,
    /// The resolved address that was actually connected to.
    pub addr: SocketAddr,
}

impl TargetConnection {
    /// Resolves `target` (a `host:port` string) and connects to it.
    ///
    /// Name resolution happens on every call, so a target behind DNS can
    /// move without restarting the gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution fails or no resolved address accepts
    /// the connection.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use wsgate::infrastructure::target_conn::TargetConnection;
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let conn = TargetConnection::connect("127.0.0.1:5900").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(target: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(target)
            .await
            .with_context(|| format!("failed to connect to target at {target}"))?;
        let addr = stream
            .peer_addr()
            .with_context(|| format!("connected to {target} but peer address is unknown"))?;

        // Interactive protocols (VNC and friends) send many small messages.
        stream
            .set_nodelay(true)
            .with_context(|| format!("failed to set TCP_NODELAY on connection to {target}"))?;

        debug!("connected to target {target} ({addr})");
        Ok(Self { stream, addr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_reports_resolved_address() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Act
        let conn = TargetConnection::connect(&addr.to_string()).await.unwrap();

        // Assert
        assert_eq!(conn.addr, addr);
    }

    #[tokio::test]
    async fn test_connect_refused_is_error_with_context() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let err = TargetConnection::connect(&addr.to_string())
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("failed to connect to target"));
    }
}
