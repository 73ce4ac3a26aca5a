//! Frame codec for the Hixie and HyBi WebSocket framing variants.
//!
//! Hixie-75/76 wire format (payload is always base64 text):
//! ```text
//! [0x00][base64 payload ...][0xFF]
//! ```
//!
//! HyBi-07 wire format:
//! ```text
//! [FIN:1|RSV:3|opcode:4][MASK:1|len:7][len16:2 | len64:8]?[mask:4]?[payload:N]
//! ```
//! `len` 0–125 is the payload length itself, 126 announces a 16-bit
//! big-endian length and 127 a 64-bit big-endian length.
//!
//! Every function here is pure: no I/O and no state beyond the arguments.
//! Partial input is never an error; it is reported as
//! [`DecodeOutcome::Incomplete`] so the caller can keep the bytes and retry
//! once more data arrives.

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

/// Largest payload length accepted from a peer.
///
/// A HyBi header may announce up to 2^63 bytes; anything above this limit is
/// refused before buffering starts.
pub const MAX_FRAME_PAYLOAD: u64 = 16 * 1024 * 1024;

/// Status code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// The two bytes of the Hixie-76 closing handshake.
pub const HIXIE_CLOSE: [u8; 2] = [0xFF, 0x00];

/// Errors that make a frame undecodable.
///
/// These terminate the session; they are never a "wait for more bytes"
/// signal.
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    /// The payload of a base64 sub-protocol frame is not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(String),

    /// A close frame carried a reason that is not valid UTF-8.
    #[error("close reason is not valid UTF-8")]
    InvalidCloseReason,

    /// The opcode nibble is one of the reserved values.
    #[error("unknown opcode: 0x{0:X}")]
    UnknownOpcode(u8),

    /// The header announced a payload above [`MAX_FRAME_PAYLOAD`].
    #[error("frame payload of {declared} bytes exceeds the {limit} byte limit")]
    TooLarge { declared: u64, limit: u64 },

    /// A Hixie frame did not start with `0x00` (data) or `0xFF 0x00` (close).
    #[error("malformed Hixie frame: unexpected leading byte 0x{0:02X}")]
    MalformedHixie(u8),
}

/// HyBi frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    /// Returns `true` for the opcodes that carry application data,
    /// continuation fragments included.
    pub fn is_data(self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary | OpCode::Continuation)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

/// One fully decoded WebSocket frame.
///
/// `payload` is already unmasked and, for base64 sub-protocols, already
/// base64-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final-fragment flag. Always `true` on frames this crate encodes.
    pub fin: bool,
    pub opcode: OpCode,
    /// Whether the frame arrived with a masking key.
    pub masked: bool,
    pub payload: Vec<u8>,
    /// Status code of a close frame, when the payload has at least 2 bytes.
    pub close_code: Option<u16>,
    /// Reason text of a close frame, when present after the code.
    pub close_reason: Option<String>,
}

impl Frame {
    fn data(opcode: OpCode, masked: bool, payload: Vec<u8>, fin: bool) -> Self {
        Self {
            fin,
            opcode,
            masked,
            payload,
            close_code: None,
            close_reason: None,
        }
    }
}

/// Result of a decode attempt over a receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A whole frame was decoded from the front of the buffer.
    Complete {
        frame: Frame,
        /// Bytes taken from the front of the buffer, header included.
        consumed: usize,
    },
    /// The buffer holds only part of a frame; nothing was consumed.
    Incomplete {
        /// Bytes currently buffered (all of them are still unconsumed).
        buffered: usize,
        /// Lower bound on the bytes still missing. For HyBi frames whose
        /// header is complete this is exact.
        needed: usize,
    },
}

// ── Masking ───────────────────────────────────────────────────────────────────

/// XORs `data` in place with the 4-byte masking key.
///
/// Byte `i` is combined with `key[i % 4]`, so a payload whose length is not a
/// multiple of four still has its trailing bytes unmasked against the right
/// key position. Applying the mask twice restores the input.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

// ── HyBi ──────────────────────────────────────────────────────────────────────

/// Encodes a server-to-client HyBi frame.
///
/// FIN is always set and the mask bit never is. With `use_base64` the payload
/// is base64-encoded before framing (the `base64` sub-protocol).
///
/// # Examples
///
/// ```rust
/// use wsgate_core::protocol::frame::{decode_hybi, encode_hybi, DecodeOutcome, OpCode};
///
/// let bytes = encode_hybi(b"hello", OpCode::Binary, false);
/// assert_eq!(&bytes[..2], &[0x82, 5]);
///
/// match decode_hybi(&bytes, false).unwrap() {
///     DecodeOutcome::Complete { frame, consumed } => {
///         assert_eq!(frame.payload, b"hello");
///         assert_eq!(consumed, bytes.len());
///     }
///     DecodeOutcome::Incomplete { .. } => unreachable!(),
/// }
/// ```
pub fn encode_hybi(payload: &[u8], opcode: OpCode, use_base64: bool) -> Vec<u8> {
    let body: Cow<'_, [u8]> = if use_base64 {
        Cow::Owned(BASE64.encode(payload).into_bytes())
    } else {
        Cow::Borrowed(payload)
    };

    let mut buf = Vec::with_capacity(body.len() + 10);
    buf.push(0x80 | (opcode as u8 & 0x0F));
    push_length(&mut buf, body.len(), 0);
    buf.extend_from_slice(&body);
    buf
}

/// Encodes a client-to-server HyBi frame masked with `key`.
///
/// The gateway itself never sends masked frames; this is the encoder a
/// browser-side peer uses, exposed for test clients and tooling.
pub fn encode_hybi_masked(payload: &[u8], opcode: OpCode, key: [u8; 4]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 14);
    buf.push(0x80 | (opcode as u8 & 0x0F));
    push_length(&mut buf, payload.len(), 0x80);
    buf.extend_from_slice(&key);
    let start = buf.len();
    buf.extend_from_slice(payload);
    apply_mask(&mut buf[start..], key);
    buf
}

fn push_length(buf: &mut Vec<u8>, len: usize, mask_bit: u8) {
    if len <= 125 {
        buf.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        buf.push(mask_bit | 126);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(mask_bit | 127);
        buf.extend_from_slice(&(len as u64).to_be_bytes());
    }
}

/// Decodes one HyBi frame from the front of `buf`.
///
/// Returns [`DecodeOutcome::Incomplete`] while `buf` is shorter than header +
/// mask + payload. With `use_base64`, text and binary payloads are
/// base64-decoded after unmasking.
///
/// # Errors
///
/// Returns [`FrameError`] for reserved opcodes, oversized frames, invalid
/// base64 and close reasons that are not UTF-8.
pub fn decode_hybi(buf: &[u8], use_base64: bool) -> Result<DecodeOutcome, FrameError> {
    if buf.len() < 2 {
        return Ok(incomplete(buf, 2));
    }

    let fin = buf[0] & 0x80 != 0;
    let opcode = OpCode::try_from(buf[0] & 0x0F)?;
    let masked = buf[1] & 0x80 != 0;

    let (header_len, declared) = match buf[1] & 0x7F {
        126 => {
            if buf.len() < 4 {
                return Ok(incomplete(buf, 4));
            }
            (4, u64::from(u16::from_be_bytes([buf[2], buf[3]])))
        }
        127 => {
            if buf.len() < 10 {
                return Ok(incomplete(buf, 10));
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            (10, u64::from_be_bytes(raw))
        }
        short => (2, u64::from(short)),
    };

    if declared > MAX_FRAME_PAYLOAD {
        return Err(FrameError::TooLarge {
            declared,
            limit: MAX_FRAME_PAYLOAD,
        });
    }

    let payload_start = header_len + if masked { 4 } else { 0 };
    let full_len = payload_start + declared as usize;
    if buf.len() < full_len {
        return Ok(incomplete(buf, full_len));
    }

    let mut payload = buf[payload_start..full_len].to_vec();
    if masked {
        let mut key = [0u8; 4];
        key.copy_from_slice(&buf[header_len..payload_start]);
        apply_mask(&mut payload, key);
    }

    let mut frame = Frame::data(opcode, masked, payload, fin);
    match opcode {
        OpCode::Close => {
            let (code, reason) = parse_close_payload(&frame.payload)?;
            frame.close_code = code;
            frame.close_reason = reason;
        }
        OpCode::Text | OpCode::Binary if use_base64 => {
            frame.payload = BASE64
                .decode(&frame.payload)
                .map_err(|e| FrameError::Base64(e.to_string()))?;
        }
        _ => {}
    }

    Ok(DecodeOutcome::Complete {
        frame,
        consumed: full_len,
    })
}

/// Builds the payload of a HyBi close frame: big-endian code then reason.
pub fn encode_close(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    payload
}

fn parse_close_payload(payload: &[u8]) -> Result<(Option<u16>, Option<String>), FrameError> {
    if payload.len() < 2 {
        return Ok((None, None));
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    if payload.len() == 2 {
        return Ok((Some(code), None));
    }
    let reason = std::str::from_utf8(&payload[2..])
        .map_err(|_| FrameError::InvalidCloseReason)?
        .to_string();
    Ok((Some(code), Some(reason)))
}

// ── Hixie ─────────────────────────────────────────────────────────────────────

/// Encodes a Hixie frame: `0x00 || base64(payload) || 0xFF`.
///
/// The base64 alphabet never contains `0xFF`, so the terminator cannot
/// appear inside the body.
pub fn encode_hixie(payload: &[u8]) -> Vec<u8> {
    let body = BASE64.encode(payload);
    let mut buf = Vec::with_capacity(body.len() + 2);
    buf.push(0x00);
    buf.extend_from_slice(body.as_bytes());
    buf.push(0xFF);
    buf
}

/// Decodes one Hixie frame from the front of `buf`.
///
/// The payload is the base64 decoding of everything between the leading
/// `0x00` and the first `0xFF`; `consumed` includes the terminator. Without a
/// terminator nothing is consumed and the result is
/// [`DecodeOutcome::Incomplete`]. A leading `0xFF 0x00` is the closing
/// handshake and decodes to a [`OpCode::Close`] frame.
///
/// # Errors
///
/// Returns [`FrameError::MalformedHixie`] for any other leading byte and
/// [`FrameError::Base64`] for an invalid body.
pub fn decode_hixie(buf: &[u8]) -> Result<DecodeOutcome, FrameError> {
    match buf.first() {
        None => return Ok(incomplete(buf, 1)),
        Some(0x00) => {}
        Some(0xFF) => {
            if buf.len() < 2 {
                return Ok(incomplete(buf, 2));
            }
            if buf[1] != 0x00 {
                return Err(FrameError::MalformedHixie(0xFF));
            }
            return Ok(DecodeOutcome::Complete {
                frame: Frame::data(OpCode::Close, false, Vec::new(), true),
                consumed: HIXIE_CLOSE.len(),
            });
        }
        Some(&other) => return Err(FrameError::MalformedHixie(other)),
    }

    let Some(end) = buf.iter().position(|&b| b == 0xFF) else {
        return Ok(DecodeOutcome::Incomplete {
            buffered: buf.len(),
            needed: 1,
        });
    };

    let payload = BASE64
        .decode(&buf[1..end])
        .map_err(|e| FrameError::Base64(e.to_string()))?;

    Ok(DecodeOutcome::Complete {
        frame: Frame::data(OpCode::Text, false, payload, true),
        consumed: end + 1,
    })
}

fn incomplete(buf: &[u8], total: usize) -> DecodeOutcome {
    DecodeOutcome::Incomplete {
        buffered: buf.len(),
        needed: total - buf.len(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(outcome: DecodeOutcome) -> (Frame, usize) {
        match outcome {
            DecodeOutcome::Complete { frame, consumed } => (frame, consumed),
            other => panic!("expected a complete frame, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_hybi_short_length_uses_single_byte() {
        let bytes = encode_hybi(&[7u8; 125], OpCode::Binary, false);
        assert_eq!(bytes[0], 0x82);
        assert_eq!(bytes[1], 125);
        assert_eq!(bytes.len(), 2 + 125);
    }

    #[test]
    fn test_encode_hybi_126_uses_16_bit_length() {
        let bytes = encode_hybi(&[0u8; 126], OpCode::Binary, false);
        assert_eq!(bytes[1], 126);
        assert_eq!(&bytes[2..4], &126u16.to_be_bytes());
        assert_eq!(bytes.len(), 4 + 126);
    }

    #[test]
    fn test_encode_hybi_65535_still_uses_16_bit_length() {
        let bytes = encode_hybi(&vec![0u8; 65535], OpCode::Binary, false);
        assert_eq!(bytes[1], 126);
        assert_eq!(&bytes[2..4], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_encode_hybi_65536_uses_64_bit_length() {
        let bytes = encode_hybi(&vec![0u8; 65536], OpCode::Binary, false);
        assert_eq!(bytes[1], 127);
        assert_eq!(&bytes[2..10], &65536u64.to_be_bytes());
        assert_eq!(bytes.len(), 10 + 65536);
    }

    #[test]
    fn test_encode_hybi_never_sets_mask_bit() {
        for len in [0usize, 125, 126, 70_000] {
            let bytes = encode_hybi(&vec![1u8; len], OpCode::Text, false);
            assert_eq!(bytes[1] & 0x80, 0, "mask bit set for length {len}");
        }
    }

    #[test]
    fn test_encode_hybi_base64_encodes_payload() {
        let bytes = encode_hybi(b"hi", OpCode::Text, true);
        assert_eq!(bytes, b"\x81\x04aGk=");
    }

    #[test]
    fn test_decode_hybi_masked_trailing_bytes_use_cyclic_key() {
        // Arrange: 7-byte payload, so the last 3 bytes wrap onto key[0..3]
        let key = [0x37, 0xFA, 0x21, 0x3D];
        let bytes = encode_hybi_masked(b"Hello!!", OpCode::Text, key);

        // Act
        let (frame, consumed) = complete(decode_hybi(&bytes, false).unwrap());

        // Assert
        assert!(frame.masked);
        assert_eq!(frame.payload, b"Hello!!");
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_decode_hybi_rfc_masked_hello_example() {
        // The single-frame masked "Hello" example from RFC 6455 section 5.7.
        let bytes = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let (frame, _) = complete(decode_hybi(&bytes, false).unwrap());
        assert_eq!(frame.payload, b"Hello");
        assert_eq!(frame.opcode, OpCode::Text);
    }

    #[test]
    fn test_decode_hybi_header_only_is_incomplete() {
        let outcome = decode_hybi(&[0x82], false).unwrap();
        assert_eq!(
            outcome,
            DecodeOutcome::Incomplete {
                buffered: 1,
                needed: 1
            }
        );
    }

    #[test]
    fn test_decode_hybi_reports_exact_missing_payload_bytes() {
        let bytes = encode_hybi(&[9u8; 10], OpCode::Binary, false);
        let outcome = decode_hybi(&bytes[..6], false).unwrap();
        assert_eq!(
            outcome,
            DecodeOutcome::Incomplete {
                buffered: 6,
                needed: 6
            }
        );
    }

    #[test]
    fn test_decode_hybi_leaves_following_frame_untouched() {
        let mut bytes = encode_hybi(b"one", OpCode::Binary, false);
        let first_len = bytes.len();
        bytes.extend_from_slice(&encode_hybi(b"two", OpCode::Binary, false));

        let (frame, consumed) = complete(decode_hybi(&bytes, false).unwrap());

        assert_eq!(frame.payload, b"one");
        assert_eq!(consumed, first_len);
    }

    #[test]
    fn test_decode_hybi_close_with_code_and_reason() {
        let payload = encode_close(1001, "going away");
        let bytes = encode_hybi_masked(&payload, OpCode::Close, [1, 2, 3, 4]);

        let (frame, _) = complete(decode_hybi(&bytes, true).unwrap());

        assert_eq!(frame.opcode, OpCode::Close);
        assert_eq!(frame.close_code, Some(1001));
        assert_eq!(frame.close_reason.as_deref(), Some("going away"));
    }

    #[test]
    fn test_decode_hybi_close_without_payload() {
        let bytes = encode_hybi(&[], OpCode::Close, false);
        let (frame, _) = complete(decode_hybi(&bytes, false).unwrap());
        assert_eq!(frame.close_code, None);
        assert_eq!(frame.close_reason, None);
    }

    #[test]
    fn test_decode_hybi_close_payload_is_not_base64_decoded() {
        let bytes = encode_hybi(&encode_close(1000, ""), OpCode::Close, false);
        let (frame, _) = complete(decode_hybi(&bytes, true).unwrap());
        assert_eq!(frame.close_code, Some(1000));
    }

    #[test]
    fn test_decode_hybi_close_reason_invalid_utf8_is_error() {
        let bytes = encode_hybi(&[0x03, 0xE8, 0xFF, 0xFE], OpCode::Close, false);
        assert_eq!(
            decode_hybi(&bytes, false),
            Err(FrameError::InvalidCloseReason)
        );
    }

    #[test]
    fn test_decode_hybi_invalid_base64_is_error_not_incomplete() {
        let bytes = encode_hybi(b"!!not base64!!", OpCode::Text, false);
        assert!(matches!(
            decode_hybi(&bytes, true),
            Err(FrameError::Base64(_))
        ));
    }

    #[test]
    fn test_decode_hybi_reserved_opcode_is_error() {
        assert_eq!(
            decode_hybi(&[0x83, 0x00], false),
            Err(FrameError::UnknownOpcode(0x3))
        );
    }

    #[test]
    fn test_decode_hybi_oversized_length_is_error() {
        let mut bytes = vec![0x82, 127];
        bytes.extend_from_slice(&(MAX_FRAME_PAYLOAD + 1).to_be_bytes());
        assert!(matches!(
            decode_hybi(&bytes, false),
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_hybi_keeps_fin_flag() {
        // FIN clear, binary opcode, 1-byte payload
        let (frame, _) = complete(decode_hybi(&[0x02, 0x01, 0xAA], false).unwrap());
        assert!(!frame.fin);
        assert_eq!(frame.payload, vec![0xAA]);
    }

    #[test]
    fn test_apply_mask_twice_restores_input() {
        let mut data = b"abcdefghij".to_vec();
        apply_mask(&mut data, [9, 8, 7, 6]);
        assert_ne!(data, b"abcdefghij");
        apply_mask(&mut data, [9, 8, 7, 6]);
        assert_eq!(data, b"abcdefghij");
    }

    #[test]
    fn test_encode_hixie_wraps_base64_in_delimiters() {
        assert_eq!(encode_hixie(b"hi"), b"\x00aGk=\xff");
        assert_eq!(encode_hixie(b""), b"\x00\xff");
    }

    #[test]
    fn test_decode_hixie_roundtrip() {
        let bytes = encode_hixie(&[0x00, 0xFF, 0x10, 0x80]);
        let (frame, consumed) = complete(decode_hixie(&bytes).unwrap());
        assert_eq!(frame.payload, vec![0x00, 0xFF, 0x10, 0x80]);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_decode_hixie_without_terminator_consumes_nothing() {
        let outcome = decode_hixie(b"\x00aGk").unwrap();
        assert_eq!(
            outcome,
            DecodeOutcome::Incomplete {
                buffered: 4,
                needed: 1
            }
        );
    }

    #[test]
    fn test_decode_hixie_closing_handshake() {
        let (frame, consumed) = complete(decode_hixie(&HIXIE_CLOSE).unwrap());
        assert_eq!(frame.opcode, OpCode::Close);
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_decode_hixie_lone_ff_waits_for_more() {
        assert!(matches!(
            decode_hixie(&[0xFF]).unwrap(),
            DecodeOutcome::Incomplete { .. }
        ));
    }

    #[test]
    fn test_decode_hixie_bad_leading_byte_is_error() {
        assert_eq!(
            decode_hixie(b"Xabc\xff"),
            Err(FrameError::MalformedHixie(b'X'))
        );
    }

    #[test]
    fn test_opcode_classification() {
        assert!(OpCode::Text.is_data());
        assert!(OpCode::Binary.is_data());
        assert!(OpCode::Continuation.is_data());
        assert!(!OpCode::Close.is_data());
        assert!(!OpCode::Ping.is_data());
        assert!(!OpCode::Pong.is_data());
    }
}
