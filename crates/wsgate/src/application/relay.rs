//! Byte ↔ frame translation for one session.
//!
//! This module knows *what* to send each way but never touches a socket:
//! the proxy loop feeds it whatever a read returned and drains the send
//! queues it fills.
//!
//! # Directions
//!
//! - **Target → client**: every chunk read from the target becomes exactly
//!   one frame (HyBi binary, HyBi base64 text, or Hixie base64 text) pushed
//!   to [`Session::client_queue`].
//! - **Client → target**: bytes from the client are appended to
//!   [`Session::recv_partial`]; every complete frame is decoded and its
//!   payload pushed verbatim to [`Session::target_queue`]. An incomplete
//!   tail stays buffered until the next read.

use thiserror::Error;
use tracing::{debug, trace};

use wsgate_core::protocol::frame::{
    decode_hixie, decode_hybi, encode_close, encode_hixie, encode_hybi, CLOSE_NORMAL, HIXIE_CLOSE,
};
use wsgate_core::{DecodeOutcome, Encoding, FrameError, OpCode, ProtocolVersion};

use crate::domain::recording::Direction;
use crate::domain::session::Session;

/// Errors that end a session because the client broke the protocol.
#[derive(Debug, Error, PartialEq)]
pub enum RelayError {
    /// A client frame could not be decoded.
    #[error("undecodable client frame: {0}")]
    Frame(#[from] FrameError),

    /// HyBi clients must mask every frame they send.
    #[error("client sent an unmasked frame")]
    UnmaskedFrame,
}

/// State of the client's input after a batch of bytes was absorbed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientInput {
    /// More frames may follow.
    Open,
    /// The client sent a close frame. A reply close frame (if the protocol
    /// has one) is already queued; bytes after the close frame are dropped.
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
}

// ── Target → client ───────────────────────────────────────────────────────────

/// Wraps one chunk of target data in a frame and queues it for the client.
///
/// Empty chunks are ignored.
pub fn absorb_target_bytes(session: &mut Session, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }

    let frame = match (session.version, session.encoding) {
        (ProtocolVersion::Hixie75 | ProtocolVersion::Hixie76, _) => encode_hixie(bytes),
        (ProtocolVersion::Hybi07, Encoding::Binary) => encode_hybi(bytes, OpCode::Binary, false),
        (ProtocolVersion::Hybi07, Encoding::Base64) => encode_hybi(bytes, OpCode::Text, true),
    };

    session.stats.frames_to_client += 1;
    session.stats.bytes_to_client += bytes.len() as u64;
    session.record(Direction::ToClient, bytes);
    session.client_queue.push(frame);
}

// ── Client → target ───────────────────────────────────────────────────────────

/// Appends client bytes to the reassembly buffer and processes every
/// complete frame in it.
///
/// Data payloads go to the target queue (empty ones are skipped), pings are
/// answered with pongs, pongs are ignored and a close frame ends input.
///
/// # Errors
///
/// [`RelayError::Frame`] for undecodable frames and
/// [`RelayError::UnmaskedFrame`] for unmasked HyBi frames. Either one ends
/// the session.
pub fn absorb_client_bytes(
    session: &mut Session,
    bytes: &[u8],
) -> Result<ClientInput, RelayError> {
    // Taken out of the session so frames can be decoded from it while the
    // queues are pushed to; put back (minus consumed bytes) below.
    let mut buf = std::mem::take(&mut session.recv_partial);
    buf.extend_from_slice(bytes);

    let mut offset = 0;
    let result = loop {
        let decoded = if session.version.is_hixie() {
            decode_hixie(&buf[offset..])
        } else {
            decode_hybi(&buf[offset..], session.use_base64())
        };
        let (frame, consumed) = match decoded {
            Ok(DecodeOutcome::Complete { frame, consumed }) => (frame, consumed),
            Ok(DecodeOutcome::Incomplete { buffered, needed }) => {
                if buffered > 0 {
                    trace!(session = %session.id, buffered, needed, "partial client frame");
                }
                break Ok(ClientInput::Open);
            }
            Err(e) => break Err(RelayError::Frame(e)),
        };
        offset += consumed;

        if session.version == ProtocolVersion::Hybi07 && !frame.masked {
            break Err(RelayError::UnmaskedFrame);
        }

        if frame.opcode.is_data() {
            // Continuation fragments are not base64-decoded by the codec, so
            // in a base64 session they reach the target still encoded.
            if frame.payload.is_empty() {
                continue;
            }
            session.stats.frames_from_client += 1;
            session.stats.bytes_from_client += frame.payload.len() as u64;
            session.record(Direction::FromClient, &frame.payload);
            session.target_queue.push(frame.payload);
            continue;
        }

        match frame.opcode {
            OpCode::Close => {
                debug!(
                    session = %session.id,
                    code = ?frame.close_code,
                    reason = ?frame.close_reason,
                    "client sent close frame"
                );
                let code = frame.close_code.unwrap_or(CLOSE_NORMAL);
                if let Some(reply) = close_frame(session, code, "") {
                    session.client_queue.push(reply);
                }
                break Ok(ClientInput::Closed {
                    code: frame.close_code,
                    reason: frame.close_reason,
                });
            }
            OpCode::Ping => {
                trace!(session = %session.id, len = frame.payload.len(), "ping");
                session
                    .client_queue
                    .push(encode_hybi(&frame.payload, OpCode::Pong, false));
            }
            // Pongs need no reply.
            _ => {}
        }
    };

    if matches!(result, Ok(ClientInput::Closed { .. })) {
        buf.clear();
    } else {
        buf.drain(..offset);
    }
    session.recv_partial = buf;
    result
}

/// Builds the close frame appropriate for the session's protocol revision.
///
/// HyBi gets a close frame with `code` and `reason`, Hixie-76 the two-byte
/// closing handshake, and Hixie-75 (which has no closing handshake) nothing.
pub fn close_frame(session: &Session, code: u16, reason: &str) -> Option<Vec<u8>> {
    match session.version {
        ProtocolVersion::Hybi07 => Some(encode_hybi(
            &encode_close(code, reason),
            OpCode::Close,
            false,
        )),
        ProtocolVersion::Hixie76 => Some(HIXIE_CLOSE.to_vec()),
        ProtocolVersion::Hixie75 => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
