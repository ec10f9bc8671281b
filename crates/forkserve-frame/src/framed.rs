//! tokio-util codec over the same wire format as [`FrameReader`](crate::FrameReader)
//! and [`FrameWriter`](crate::FrameWriter).

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, Frame, DEFAULT_MAX_PAYLOAD};
use crate::error::{FrameError, Result};

/// Frame codec for `tokio_util::codec::Framed` and friends.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_payload_size: usize,
}

impl FrameCodec {
    /// Codec with an explicit payload cap, applied in both directions.
    pub fn new(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    /// Raise or lower the payload cap, e.g. after the handshake completes.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.max_payload_size = max_payload_size;
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(src, self.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.max_payload_size,
            });
        }
        encode_frame(frame.channel, &frame.payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    use super::*;
    use crate::{FrameReader, FrameWriter, MESSAGE};

    #[tokio::test]
    async fn codec_interoperates_with_blocking_writer() {
        let (ours, theirs) = std::os::unix::net::UnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        let ours = tokio::net::UnixStream::from_std(ours).unwrap();
        let mut framed = Framed::new(ours, FrameCodec::default());

        let worker = std::thread::spawn(move || {
            let mut writer = FrameWriter::new(theirs.try_clone().unwrap());
            writer.send(MESSAGE, b"from-worker").unwrap();
            let mut reader = FrameReader::new(theirs);
            reader.read_frame().unwrap()
        });

        let inbound = framed.next().await.unwrap().unwrap();
        assert_eq!(inbound.payload.as_ref(), b"from-worker");

        framed
            .send(Frame::new(MESSAGE, &b"from-router"[..]))
            .await
            .unwrap();
        let echoed = worker.join().unwrap();
        assert_eq!(echoed.payload.as_ref(), b"from-router");
    }

    #[test]
    fn encoder_enforces_cap() {
        let mut codec = FrameCodec::new(2);
        let mut dst = BytesMut::new();
        let err = codec
            .encode(Frame::new(MESSAGE, &b"abc"[..]), &mut dst)
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(dst.is_empty());
    }

    #[test]
    fn truncated_stream_at_eof_is_an_error() {
        let mut codec = FrameCodec::default();
        let mut src = BytesMut::new();
        encode_frame(MESSAGE, b"abcdef", &mut src).unwrap();
        src.truncate(10);
        assert!(matches!(
            codec.decode_eof(&mut src),
            Err(FrameError::ConnectionClosed)
        ));
    }
}
