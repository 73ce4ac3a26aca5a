//! WebSocket opening handshake: request parsing, revision selection and
//! response computation for Hixie-75, Hixie-76 and HyBi-07.

pub mod error;
pub mod keys;
pub mod negotiate;
pub mod request;

pub use error::HandshakeError;
pub use keys::{hixie76_challenge, hybi_accept_key, WEBSOCKET_GUID};
pub use negotiate::{
    classify_prefix, negotiate, select_encoding, select_version, Negotiated, PeekClass,
    FLASH_POLICY_REQUEST, FLASH_POLICY_RESPONSE,
};
pub use request::{HandshakeRequest, HIXIE76_NONCE_LEN, MAX_HANDSHAKE_LEN};
