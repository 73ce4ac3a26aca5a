//! Minimal HTTP/1.1 request-head parser for WebSocket opening handshakes.
//!
//! Only what the handshake needs is parsed: the request line, header lines
//! up to the blank line, and for Hixie-76 the 8-byte nonce that follows the
//! headers. Parsing works over a byte buffer that may still be growing; an
//! unterminated head is reported as `Ok(None)` rather than an error.

use super::error::HandshakeError;

/// Upper bound on the request head (request line + headers).
pub const MAX_HANDSHAKE_LEN: usize = 4096;

/// Length of the Hixie-76 nonce ("key3") sent after the headers.
pub const HIXIE76_NONCE_LEN: usize = 8;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// A parsed opening handshake request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub method: String,
    pub path: String,
    headers: Vec<(String, String)>,
    /// The 8 bytes following the head when Hixie-76 keys are present.
    pub key3: Option<[u8; HIXIE76_NONCE_LEN]>,
}

impl HandshakeRequest {
    /// Parses a request head from the front of `buf`.
    ///
    /// Returns `Ok(Some((request, consumed)))` once the head (and, for
    /// Hixie-76, the nonce) is complete. `consumed` counts every byte that
    /// belongs to the handshake; anything after it is early frame data.
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// [`HandshakeError::TooLarge`] when no terminator appears within
    /// [`MAX_HANDSHAKE_LEN`] bytes, [`HandshakeError::Malformed`] for an
    /// unparseable request line or header line.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, HandshakeError> {
        let Some(head_end) = find(buf, HEAD_TERMINATOR) else {
            if buf.len() >= MAX_HANDSHAKE_LEN {
                return Err(HandshakeError::TooLarge(MAX_HANDSHAKE_LEN));
            }
            return Ok(None);
        };
        if head_end > MAX_HANDSHAKE_LEN {
            return Err(HandshakeError::TooLarge(MAX_HANDSHAKE_LEN));
        }

        let head = std::str::from_utf8(&buf[..head_end])
            .map_err(|_| HandshakeError::Malformed("request head is not UTF-8".to_string()))?;
        let mut lines = head.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split(' ').filter(|p| !p.is_empty());
        let (method, path) = match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(path), Some(version)) if version.starts_with("HTTP/") => {
                (method.to_string(), path.to_string())
            }
            _ => {
                return Err(HandshakeError::Malformed(format!(
                    "invalid request line: {request_line:?}"
                )))
            }
        };

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line.split_once(':').ok_or_else(|| {
                HandshakeError::Malformed(format!("invalid header line: {line:?}"))
            })?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        let mut request = Self {
            method,
            path,
            headers,
            key3: None,
        };
        let mut consumed = head_end + HEAD_TERMINATOR.len();

        if request.header("Sec-WebSocket-Key1").is_some()
            && request.header("Sec-WebSocket-Key2").is_some()
        {
            let nonce_end = consumed + HIXIE76_NONCE_LEN;
            if buf.len() < nonce_end {
                return Ok(None);
            }
            let mut key3 = [0u8; HIXIE76_NONCE_LEN];
            key3.copy_from_slice(&buf[consumed..nonce_end]);
            request.key3 = Some(key3);
            consumed = nonce_end;
        }

        Ok(Some((request, consumed)))
    }

    /// Case-insensitive header lookup; the first occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `true` when the request carries `Upgrade: websocket` (any case).
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("Upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    /// Sub-protocols offered by the client.
    ///
    /// Read from `Sec-WebSocket-Protocol`, falling back to the Hixie-75
    /// `WebSocket-Protocol` header; comma-separated, whitespace-trimmed.
    pub fn protocols(&self) -> Vec<&str> {
        self.header("Sec-WebSocket-Protocol")
            .or_else(|| self.header("WebSocket-Protocol"))
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
