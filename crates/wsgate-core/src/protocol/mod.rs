//! Protocol module containing the frame codec and session parameters.

pub mod frame;
pub mod version;

pub use frame::{
    decode_hixie, decode_hybi, encode_close, encode_hixie, encode_hybi, DecodeOutcome, Frame,
    FrameError, OpCode, MAX_FRAME_PAYLOAD,
};
pub use version::{Encoding, ProtocolVersion, Scheme};
