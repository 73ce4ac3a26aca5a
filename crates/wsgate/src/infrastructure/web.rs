//! Fallback for plain HTTP requests arriving on the WebSocket port.
//!
//! Browsers usually load the client page from the same host and port they
//! then open the WebSocket to. When a GET request without an upgrade header
//! arrives, the negotiator hands it to a [`WebFallback`], which writes a
//! complete response; the connection is closed afterwards.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;
use wsgate_core::HandshakeRequest;

/// Serves one plain HTTP request.
#[async_trait]
pub trait WebFallback: Send + Sync {
    /// Writes a full response for `request` to `stream` and returns the
    /// HTTP status code sent.
    async fn serve(
        &self,
        request: &HandshakeRequest,
        stream: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> io::Result<u16>;
}

/// Serves files from a directory.
///
/// Directories resolve to their `index.html`. Paths that try to leave the
/// root are refused with 403; anything missing is a 404.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a request path onto the root, or `None` if it would escape it.
    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let path = request_path.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
        let relative = Path::new(path.trim_start_matches('/'));

        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(resolved)
    }
}

#[async_trait]
impl WebFallback for StaticFiles {
    async fn serve(
        &self,
        request: &HandshakeRequest,
        stream: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> io::Result<u16> {
        let Some(mut path) = self.resolve(&request.path) else {
            debug!("refusing path outside web root: {}", request.path);
            return write_response(stream, 403, "text/plain", b"403 Forbidden\n").await;
        };

        if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
            path.push("index.html");
        }

        match tokio::fs::read(&path).await {
            Ok(body) => write_response(stream, 200, content_type(&path), &body).await,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                write_response(stream, 404, "text/plain", b"404 Not Found\n").await
            }
            Err(e) => {
                debug!("failed to read {}: {e}", path.display());
                write_response(stream, 500, "text/plain", b"500 Internal Server Error\n").await
            }
        }
    }
}

async fn write_response(
    stream: &mut (dyn AsyncWrite + Unpin + Send),
    status: u16,
    content_type: &str,
    body: &[u8],
) -> io::Result<u16> {
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {len}\r\n\
         Connection: close\r\n\r\n",
        reason = reason_phrase(status),
        len = body.len(),
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(status)
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Internal Server Error",
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("swf") => "application/x-shockwave-flash",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
