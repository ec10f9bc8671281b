use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Bytes in front of every payload.
///
/// ```text
///  0      2          6        8
///  +------+----------+--------+------------------+
///  | "FS" | len u32  | ch u16 | payload (len)    |
///  +------+----------+--------+------------------+
/// ```
///
/// Integers are little-endian.
pub const HEADER_SIZE: usize = 8;

pub const MAGIC: [u8; 2] = *b"FS";

/// Large enough for a whole JavaScript bundle plus its source map.
pub const DEFAULT_MAX_PAYLOAD: usize = 200 * 1024 * 1024;

/// Peers may not send more than this before they are authenticated.
pub const MAX_HANDSHAKE_PAYLOAD: usize = 16 * 1024;

/// One message on one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(channel: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// Header plus payload, as written to the socket.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// The decoded fixed-size prefix of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub channel: u16,
    pub len: u32,
}

impl FrameHeader {
    fn describing(channel: u16, payload: &[u8]) -> Result<Self> {
        let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        })?;
        Ok(Self { channel, len })
    }

    /// Parse the header at the start of `src` without consuming anything.
    /// `None` until all [`HEADER_SIZE`] bytes are buffered.
    pub fn peek(src: &[u8]) -> Result<Option<Self>> {
        let Some(mut head) = src.get(..HEADER_SIZE) else {
            return Ok(None);
        };
        if head[..MAGIC.len()] != MAGIC {
            return Err(FrameError::InvalidMagic);
        }
        head.advance(MAGIC.len());
        let len = head.get_u32_le();
        let channel = head.get_u16_le();
        Ok(Some(Self { channel, len }))
    }

    fn put(&self, dst: &mut BytesMut) {
        dst.put_slice(&MAGIC);
        dst.put_u32_le(self.len);
        dst.put_u16_le(self.channel);
    }

    fn payload_len(&self) -> usize {
        self.len as usize
    }
}

/// Append one frame to `dst`.
pub fn encode_frame(channel: u16, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let header = FrameHeader::describing(channel, payload)?;
    dst.reserve(HEADER_SIZE + payload.len());
    header.put(dst);
    dst.extend_from_slice(payload);
    Ok(())
}

/// Take one complete frame off the front of `src`.
///
/// Leaves `src` untouched and returns `Ok(None)` while the frame is still
/// partial. The length is checked against `max_payload` as soon as the
/// header is in, so an oversized frame fails before its body arrives.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some(header) = FrameHeader::peek(src)? else {
        return Ok(None);
    };
    let len = header.payload_len();
    if len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: max_payload,
        });
    }

    let needed = HEADER_SIZE + len;
    if let Some(missing) = needed.checked_sub(src.len()).filter(|n| *n > 0) {
        src.reserve(missing);
        return Ok(None);
    }

    let mut raw = src.split_to(needed);
    raw.advance(HEADER_SIZE);
    Ok(Some(Frame::new(header.channel, raw.freeze())))
}

/// Limits and timeouts for the blocking reader and writer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    pub max_payload_size: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
