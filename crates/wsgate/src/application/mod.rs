//! Application layer for wsgate.
//!
//! The application layer knows *what* to forward in each direction; the
//! infrastructure layer decides *when* by driving sockets.
//!
//! # Responsibilities
//!
//! - Turning target bytes into WebSocket frames for the client
//! - Reassembling and decoding client frames into target bytes
//! - Answering control frames (close, ping)
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or waiting on them (that is infrastructure)
//! - Handshake parsing (that is `wsgate-core`)

pub mod relay;

pub use relay::{absorb_client_bytes, absorb_target_bytes, close_frame, ClientInput, RelayError};
