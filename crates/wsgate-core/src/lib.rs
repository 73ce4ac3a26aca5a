//! # wsgate-core
//!
//! Protocol engine for the wsgate WebSocket-to-TCP gateway: the frame codec
//! and handshake negotiation for the Hixie-75, Hixie-76 and HyBi-07
//! revisions of the WebSocket protocol.
//!
//! This crate does no I/O and has no async runtime dependency. The `wsgate`
//! crate drives it from sockets.
//!
//! # Architecture overview
//!
//! A browser talks WebSocket to the gateway; the gateway talks raw TCP to a
//! server that knows nothing about WebSockets (a VNC host, for instance).
//! Two pieces of that translation are pure byte manipulation and live here:
//!
//! - **`handshake`** – Parses the HTTP upgrade request, decides which
//!   protocol revision and payload encoding the client speaks, and computes
//!   the exact response bytes (SHA-1 accept key for HyBi, MD5 challenge for
//!   Hixie-76).
//!
//! - **`protocol`** – Encodes and decodes frames. Hixie frames are
//!   `0x00 || base64 || 0xFF`; HyBi frames carry an opcode, an optional
//!   masking key and a 7/16/64-bit length. Incomplete input is reported, not
//!   treated as an error, so callers can reassemble frames split across TCP
//!   segments.

pub mod handshake;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `wsgate_core::OpCode` instead of `wsgate_core::protocol::frame::OpCode`.
pub use handshake::{negotiate, HandshakeError, HandshakeRequest, Negotiated, PeekClass};
pub use protocol::frame::{DecodeOutcome, Frame, FrameError, OpCode};
pub use protocol::version::{Encoding, ProtocolVersion, Scheme};
