use thiserror::Error;

/// Reasons a connection is refused before any WebSocket frame is exchanged.
///
/// No handshake response is written for any of these; the caller closes the
/// connection.
#[derive(Debug, Error, PartialEq)]
pub enum HandshakeError {
    /// Generic refusal with a human-readable reason.
    #[error("handshake rejected: {0}")]
    Rejected(String),

    /// The request line or a header line could not be parsed.
    #[error("malformed handshake request: {0}")]
    Malformed(String),

    /// The request head did not terminate within the size limit.
    #[error("handshake request exceeds {0} bytes")]
    TooLarge(usize),

    /// A header required by the negotiated revision is absent.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// `Sec-WebSocket-Version` named a revision other than 7.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(String),

    /// A HyBi client offered neither `binary` nor `base64`.
    #[error("client must support 'binary' or 'base64' protocol")]
    NoSubprotocol,

    /// A Hixie-76 key had no spaces or its number overflowed.
    #[error("invalid Hixie-76 key: {0}")]
    BadChallengeKey(&'static str),
}
