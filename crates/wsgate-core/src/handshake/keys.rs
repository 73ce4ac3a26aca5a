//! Handshake key derivations for HyBi-07 and Hixie-76.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::Md5;
use sha1::{Digest, Sha1};

use super::error::HandshakeError;
use super::request::HIXIE76_NONCE_LEN;

/// GUID appended to `Sec-WebSocket-Key` before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` value for a HyBi client key.
///
/// # Examples
///
/// ```rust
/// use wsgate_core::handshake::hybi_accept_key;
///
/// assert_eq!(
///     hybi_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn hybi_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Computes the 16-byte Hixie-76 response trailer.
///
/// Each key contributes `digits(key) / spaces(key)` as a big-endian u32; the
/// two numbers and the 8-byte nonce are hashed with MD5.
///
/// # Errors
///
/// [`HandshakeError::BadChallengeKey`] when a key has no digits, no spaces,
/// or a quotient that does not fit in 32 bits.
pub fn hixie76_challenge(
    key1: &str,
    key2: &str,
    key3: &[u8; HIXIE76_NONCE_LEN],
) -> Result<[u8; 16], HandshakeError> {
    let num1 = key_number(key1)?;
    let num2 = key_number(key2)?;

    let mut hasher = Md5::new();
    hasher.update(num1.to_be_bytes());
    hasher.update(num2.to_be_bytes());
    hasher.update(key3);

    let mut trailer = [0u8; 16];
    trailer.copy_from_slice(&hasher.finalize());
    Ok(trailer)
}

fn key_number(key: &str) -> Result<u32, HandshakeError> {
    let mut digits: Option<u64> = None;
    for c in key.chars() {
        if let Some(d) = c.to_digit(10) {
            let acc = digits.unwrap_or(0);
            digits = Some(
                acc.checked_mul(10)
                    .and_then(|v| v.checked_add(u64::from(d)))
                    .ok_or(HandshakeError::BadChallengeKey("key number overflows"))?,
            );
        }
    }
    let number = digits.ok_or(HandshakeError::BadChallengeKey("key has no digits"))?;

    let spaces = key.chars().filter(|&c| c == ' ').count() as u64;
    if spaces == 0 {
        return Err(HandshakeError::BadChallengeKey("key has no spaces"));
    }

    u32::try_from(number / spaces)
        .map_err(|_| HandshakeError::BadChallengeKey("key quotient exceeds 32 bits"))
}
