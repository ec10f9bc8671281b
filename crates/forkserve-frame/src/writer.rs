use std::io::{self, ErrorKind, Write};

use bytes::BytesMut;
use forkserve_transport::LocalStream;

use crate::codec::{encode_frame, FrameConfig};
use crate::error::{FrameError, Result};

/// Blocking frame sink over any `Write`.
///
/// Each [`send`](FrameWriter::send) writes one whole frame and flushes, so
/// a frame never sits half-written in a userspace buffer.
pub struct FrameWriter<T> {
    inner: T,
    scratch: BytesMut,
    config: FrameConfig,
}

/// Retry `op` across `Interrupted` and `WouldBlock`.
fn retrying<R>(mut op: impl FnMut() -> io::Result<R>) -> io::Result<R> {
    loop {
        match op() {
            Err(err) if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {}
            done => return done,
        }
    }
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            scratch: BytesMut::new(),
            config,
        }
    }

    /// Write `payload` as one frame on `channel`.
    ///
    /// Payloads over the configured cap are refused before anything touches
    /// the stream.
    pub fn send(&mut self, channel: u16, payload: &[u8]) -> Result<()> {
        let max = self.config.max_payload_size;
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        self.scratch.clear();
        encode_frame(channel, payload, &mut self.scratch)?;

        let mut rest: &[u8] = &self.scratch;
        while !rest.is_empty() {
            let inner = &mut self.inner;
            match retrying(|| inner.write(rest))? {
                0 => return Err(FrameError::ConnectionClosed),
                n => rest = &rest[n..],
            }
        }
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        let inner = &mut self.inner;
        retrying(|| inner.flush()).map_err(FrameError::Io)
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }
}

impl FrameWriter<LocalStream> {
    /// Like [`FrameWriter::with_config`], also applying
    /// `config.write_timeout` to the socket.
    pub fn with_config_local(inner: LocalStream, config: FrameConfig) -> Result<Self> {
        inner.set_write_timeout(config.write_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}
