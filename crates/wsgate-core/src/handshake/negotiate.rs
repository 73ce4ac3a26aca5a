//! Connection classification and handshake response computation.
//!
//! Everything here is a pure function of the bytes already read; the socket
//! side of negotiation lives in the `wsgate` crate.

use tracing::warn;

use super::error::HandshakeError;
use super::keys::{hixie76_challenge, hybi_accept_key};
use super::request::HandshakeRequest;
use crate::protocol::version::{Encoding, ProtocolVersion, Scheme};

/// Prefix of a Flash socket policy request.
pub const FLASH_POLICY_REQUEST: &[u8] = b"<policy-file-request/>";

/// Canned reply to a Flash socket policy request.
pub const FLASH_POLICY_RESPONSE: &[u8] =
    b"<cross-domain-policy><allow-access-from domain=\"*\" to-ports=\"*\" /></cross-domain-policy>\n";

/// The only `Sec-WebSocket-Version` value accepted.
pub const SUPPORTED_HYBI_VERSION: &str = "7";

/// First-bytes classification of a freshly accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeekClass {
    /// The peer closed without sending anything.
    Empty,
    FlashPolicy,
    /// A TLS (`0x16`) or SSLv2-compatible (`0x80`) ClientHello.
    Tls,
    /// Anything else; expected to be a plaintext HTTP request.
    Plain,
}

/// Classifies a connection from peeked, unconsumed bytes.
pub fn classify_prefix(peeked: &[u8]) -> PeekClass {
    match peeked.first() {
        None => PeekClass::Empty,
        Some(0x16) | Some(0x80) => PeekClass::Tls,
        Some(_) if peeked.starts_with(FLASH_POLICY_REQUEST) => PeekClass::FlashPolicy,
        Some(_) => PeekClass::Plain,
    }
}

/// Outcome of a successful negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub version: ProtocolVersion,
    pub encoding: Encoding,
    /// The complete handshake response, ready to be written in one call.
    pub response: Vec<u8>,
}

/// Picks the protocol revision from the request headers.
///
/// A `Sec-WebSocket-Version` header selects HyBi and must be exactly `7`.
/// Without it, a Hixie-76 nonce selects Hixie-76 and its absence Hixie-75.
///
/// # Errors
///
/// [`HandshakeError::UnsupportedVersion`] for any other version value.
pub fn select_version(request: &HandshakeRequest) -> Result<ProtocolVersion, HandshakeError> {
    match request.header("Sec-WebSocket-Version") {
        Some(SUPPORTED_HYBI_VERSION) => Ok(ProtocolVersion::Hybi07),
        Some(other) => Err(HandshakeError::UnsupportedVersion(other.to_string())),
        None if request.key3.is_some() => Ok(ProtocolVersion::Hixie76),
        None => Ok(ProtocolVersion::Hixie75),
    }
}

/// Picks the payload encoding for `version` from the offered sub-protocols.
///
/// HyBi prefers `binary` over `base64`. Hixie clients always get `base64`.
///
/// # Errors
///
/// [`HandshakeError::NoSubprotocol`] when a HyBi client offers neither.
pub fn select_encoding(
    version: ProtocolVersion,
    protocols: &[&str],
) -> Result<Encoding, HandshakeError> {
    if version.is_hixie() {
        return Ok(Encoding::Base64);
    }
    if protocols.contains(&Encoding::Binary.as_protocol()) {
        Ok(Encoding::Binary)
    } else if protocols.contains(&Encoding::Base64.as_protocol()) {
        Ok(Encoding::Base64)
    } else {
        Err(HandshakeError::NoSubprotocol)
    }
}

/// Runs version and encoding selection and builds the response bytes.
///
/// # Errors
///
/// [`HandshakeError::Rejected`] for any method other than `GET`, any
/// selection error, plus [`HandshakeError::MissingHeader`] when
/// `Sec-WebSocket-Key` (HyBi) or `Host`/`Origin`/keys (Hixie) are absent.
pub fn negotiate(
    request: &HandshakeRequest,
    scheme: Scheme,
) -> Result<Negotiated, HandshakeError> {
    if !request.is_get() {
        return Err(HandshakeError::Rejected(format!(
            "handshake must use GET, not {}",
            request.method
        )));
    }
    let version = select_version(request)?;
    let protocols = request.protocols();
    let encoding = select_encoding(version, &protocols)?;

    let response = match version {
        ProtocolVersion::Hybi07 => hybi_response(request, encoding)?,
        ProtocolVersion::Hixie75 | ProtocolVersion::Hixie76 => {
            if !protocols.contains(&Encoding::Base64.as_protocol()) {
                warn!("client does not report 'base64' protocol support");
            }
            hixie_response(request, version, scheme, &protocols)?
        }
    };

    Ok(Negotiated {
        version,
        encoding,
        response,
    })
}

fn hybi_response(
    request: &HandshakeRequest,
    encoding: Encoding,
) -> Result<Vec<u8>, HandshakeError> {
    let key = request
        .header("Sec-WebSocket-Key")
        .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))?;

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         Sec-WebSocket-Protocol: {protocol}\r\n\
         \r\n",
        accept = hybi_accept_key(key),
        protocol = encoding.as_protocol(),
    );
    Ok(response.into_bytes())
}

fn hixie_response(
    request: &HandshakeRequest,
    version: ProtocolVersion,
    scheme: Scheme,
    protocols: &[&str],
) -> Result<Vec<u8>, HandshakeError> {
    let origin = request
        .header("Origin")
        .ok_or(HandshakeError::MissingHeader("Origin"))?;
    let host = request
        .header("Host")
        .ok_or(HandshakeError::MissingHeader("Host"))?;

    let trailer = match (version, request.key3.as_ref()) {
        (ProtocolVersion::Hixie76, Some(key3)) => {
            let key1 = request
                .header("Sec-WebSocket-Key1")
                .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key1"))?;
            let key2 = request
                .header("Sec-WebSocket-Key2")
                .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key2"))?;
            Some(hixie76_challenge(key1, key2, key3)?)
        }
        _ => None,
    };
    let prefix = if trailer.is_some() { "Sec-" } else { "" };

    let mut head = format!(
        "HTTP/1.1 101 Web Socket Protocol Handshake\r\n\
         Upgrade: WebSocket\r\n\
         Connection: Upgrade\r\n\
         {prefix}WebSocket-Origin: {origin}\r\n\
         {prefix}WebSocket-Location: {scheme}://{host}{path}\r\n",
        path = request.path,
    );
    if protocols.contains(&Encoding::Base64.as_protocol()) {
        head.push_str(&format!("{prefix}WebSocket-Protocol: base64\r\n"));
    }
    head.push_str("\r\n");

    let mut response = head.into_bytes();
    if let Some(trailer) = trailer {
        response.extend_from_slice(&trailer);
    }
    Ok(response)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
