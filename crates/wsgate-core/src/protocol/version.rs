//! Parameters fixed at handshake time and carried by every session.

use std::fmt;

/// Which WebSocket revision a client negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// draft-hixie-thewebsocketprotocol-75: no challenge, no `Sec-` headers.
    Hixie75,
    /// draft-hixie-thewebsocketprotocol-76: MD5 challenge over two keys and
    /// an 8-byte nonce.
    Hixie76,
    /// draft-ietf-hybi-thewebsocketprotocol-07: SHA-1 accept key, binary
    /// framing with client masking.
    Hybi07,
}

impl ProtocolVersion {
    /// Returns `true` for the two Hixie drafts, which share `0x00 .. 0xFF`
    /// framing.
    pub fn is_hixie(self) -> bool {
        matches!(self, ProtocolVersion::Hixie75 | ProtocolVersion::Hixie76)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProtocolVersion::Hixie75 => "hixie-75",
            ProtocolVersion::Hixie76 => "hixie-76",
            ProtocolVersion::Hybi07 => "hybi-07",
        })
    }
}

/// How payload bytes are carried inside frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Raw bytes in binary frames (HyBi `binary` sub-protocol).
    Binary,
    /// Base64 text in text frames. The only option for Hixie clients.
    Base64,
}

impl Encoding {
    /// The sub-protocol token clients offer for this encoding.
    pub fn as_protocol(self) -> &'static str {
        match self {
            Encoding::Binary => "binary",
            Encoding::Base64 => "base64",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_protocol())
    }
}

/// URL scheme of the client connection, used in Hixie `Location` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Ws,
    Wss,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        })
    }
}
