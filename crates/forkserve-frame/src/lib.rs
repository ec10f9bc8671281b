//! Length-prefixed framing for the router/worker socket.
//!
//! Every frame carries exactly one message:
//! - A 2-byte magic number ("FS") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 2-byte little-endian channel ID ([`CONTROL`] or [`MESSAGE`])
//!
//! Workers use the blocking [`FrameReader`] / [`FrameWriter`]; the router
//! drives the same wire format through [`FrameCodec`] (feature `async`).

pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod framed;

pub use channel::{channel_name, CONTROL, MESSAGE};
pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, FrameHeader, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
    MAX_HANDSHAKE_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use framed::FrameCodec;
