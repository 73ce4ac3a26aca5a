//! Socket side of the opening handshake.
//!
//! A freshly accepted connection goes through these steps, all under one
//! `handshake_timeout`:
//!
//! 1. Peek (without consuming) the first bytes and classify them.
//! 2. Flash policy requests get the canned policy and are closed.
//! 3. TLS ClientHellos are accepted with the configured certificate;
//!    plaintext is refused when the gateway is TLS-only.
//! 4. The HTTP request is read until its header block (and the Hixie-76
//!    nonce) is complete, then either handed to the web fallback or
//!    negotiated and answered with the WebSocket handshake response.
//!
//! Bytes the client sent after the handshake are returned as `leftover` and
//! become the session's first partial frame.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};
use wsgate_core::handshake::negotiate::{classify_prefix, FLASH_POLICY_RESPONSE};
use wsgate_core::{negotiate, Encoding, HandshakeRequest, PeekClass, ProtocolVersion, Scheme};

use crate::infrastructure::listener::GatewayContext;
use crate::infrastructure::stream::ClientStream;
use crate::infrastructure::web::WebFallback;

/// How many bytes are peeked to classify a connection.
const PEEK_LEN: usize = 1024;

/// A completed WebSocket handshake.
#[derive(Debug)]
pub struct HandshakeResult<S = ClientStream> {
    pub version: ProtocolVersion,
    pub encoding: Encoding,
    pub scheme: Scheme,
    /// Request path, e.g. `/websockify`.
    pub path: String,
    pub stream: S,
    /// Bytes received after the handshake request.
    pub leftover: Vec<u8>,
}

/// What a new connection turned out to be.
#[derive(Debug)]
pub enum ConnectionKind<S = ClientStream> {
    /// A Flash policy request; the policy has been sent.
    FlashPolicy,
    /// A plain HTTP request; the web fallback has answered it.
    PlainHttp,
    WebSocketHixie75(HandshakeResult<S>),
    WebSocketHixie76(HandshakeResult<S>),
    WebSocketHybi07(HandshakeResult<S>),
    /// The connection was refused or the handshake failed.
    Rejected(String),
}

impl<S> ConnectionKind<S> {
    /// The handshake result for WebSocket connections.
    pub fn into_websocket(self) -> Option<HandshakeResult<S>> {
        match self {
            ConnectionKind::WebSocketHixie75(h)
            | ConnectionKind::WebSocketHixie76(h)
            | ConnectionKind::WebSocketHybi07(h) => Some(h),
            _ => None,
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Classifies and negotiates a freshly accepted connection.
///
/// Never fails: every problem, including the handshake timeout, is reported
/// as [`ConnectionKind::Rejected`] with a human-readable reason.
pub async fn negotiate_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &GatewayContext,
) -> ConnectionKind {
    match timeout(ctx.config.handshake_timeout, classify_and_negotiate(stream, peer, ctx)).await {
        Ok(kind) => kind,
        Err(_) => ConnectionKind::Rejected(format!(
            "handshake not completed within {:?}",
            ctx.config.handshake_timeout
        )),
    }
}

/// Reads and answers the HTTP request on an already classified stream.
///
/// Plain GET requests without an upgrade header go to `web` when one is
/// configured and are rejected otherwise.
pub async fn complete_handshake<S>(
    mut stream: S,
    scheme: Scheme,
    web: Option<&dyn WebFallback>,
) -> ConnectionKind<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (request, leftover) = match read_request(&mut stream).await {
        Ok(parsed) => parsed,
        Err(reason) => return ConnectionKind::Rejected(reason),
    };

    if request.is_get() && !request.is_websocket_upgrade() {
        let Some(web) = web else {
            return ConnectionKind::Rejected("plain HTTP request received but disallowed".into());
        };
        return match web.serve(&request, &mut stream).await {
            Ok(status) => {
                info!("{} {} -> {status}", request.method, request.path);
                let _ = stream.shutdown().await;
                ConnectionKind::PlainHttp
            }
            Err(e) => ConnectionKind::Rejected(format!("failed to answer web request: {e}")),
        };
    }

    let negotiated = match negotiate(&request, scheme) {
        Ok(n) => n,
        Err(e) => return ConnectionKind::Rejected(e.to_string()),
    };
    if let Err(e) = write_response(&mut stream, &negotiated.response).await {
        return ConnectionKind::Rejected(format!("failed to send handshake response: {e}"));
    }
    debug!(
        "negotiated {} ({:?}) on {}",
        negotiated.version, negotiated.encoding, request.path
    );

    let result = HandshakeResult {
        version: negotiated.version,
        encoding: negotiated.encoding,
        scheme,
        path: request.path,
        stream,
        leftover,
    };
    match result.version {
        ProtocolVersion::Hixie75 => ConnectionKind::WebSocketHixie75(result),
        ProtocolVersion::Hixie76 => ConnectionKind::WebSocketHixie76(result),
        ProtocolVersion::Hybi07 => ConnectionKind::WebSocketHybi07(result),
    }
}

// ── Internals ─────────────────────────────────────────────────────────────────

async fn classify_and_negotiate(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &GatewayContext,
) -> ConnectionKind {
    let mut peeked = [0u8; PEEK_LEN];
    let n = match stream.peek(&mut peeked).await {
        Ok(n) => n,
        Err(e) => return ConnectionKind::Rejected(format!("failed to peek: {e}")),
    };

    let stream = match classify_prefix(&peeked[..n]) {
        PeekClass::Empty => return ConnectionKind::Rejected("ignoring empty handshake".into()),
        PeekClass::FlashPolicy => return answer_flash_policy(stream, peer).await,
        PeekClass::Tls => {
            let Some(acceptor) = ctx.tls.as_ref() else {
                return ConnectionKind::Rejected(
                    "TLS connection received but no certificate configured".into(),
                );
            };
            match acceptor.accept(stream).await {
                Ok(tls) => ClientStream::Tls(Box::new(tls)),
                Err(e) => return ConnectionKind::Rejected(format!("TLS handshake failed: {e}")),
            }
        }
        PeekClass::Plain if ctx.config.tls_only => {
            return ConnectionKind::Rejected("non-TLS connection received but disallowed".into());
        }
        PeekClass::Plain => ClientStream::Plain(stream),
    };

    let scheme = stream.scheme();
    complete_handshake(stream, scheme, ctx.web.as_deref()).await
}

async fn answer_flash_policy(mut stream: TcpStream, peer: SocketAddr) -> ConnectionKind {
    // Consume the request so closing does not reset the connection.
    let mut discard = [0u8; PEEK_LEN];
    let _ = stream.read(&mut discard).await;
    if let Err(e) = write_response(&mut stream, FLASH_POLICY_RESPONSE).await {
        debug!("failed to send Flash policy to {peer}: {e}");
    }
    let _ = stream.shutdown().await;
    ConnectionKind::FlashPolicy
}

/// Reads until a full request is buffered. Returns the request and the
/// bytes that followed it.
async fn read_request<S: AsyncRead + Unpin>(
    stream: &mut S,
) -> Result<(HandshakeRequest, Vec<u8>), String> {
    let mut buf = Vec::with_capacity(PEEK_LEN);
    let mut chunk = [0u8; PEEK_LEN];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| format!("failed to read handshake: {e}"))?;
        if n == 0 {
            return Err("client closed connection during handshake".into());
        }
        buf.extend_from_slice(&chunk[..n]);

        match HandshakeRequest::parse(&buf) {
            Ok(Some((request, consumed))) => return Ok((request, buf.split_off(consumed))),
            Ok(None) => continue,
            Err(e) => return Err(e.to_string()),
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(stream: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    stream.write_all(bytes).await?;
    stream.flush().await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
