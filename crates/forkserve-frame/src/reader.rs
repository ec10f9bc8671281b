use std::io::{ErrorKind, Read};
use std::time::Duration;

use bytes::BytesMut;
use forkserve_transport::LocalStream;

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const READ_CHUNK: usize = 16 * 1024;

/// Blocking frame source over any `Read`.
///
/// Bytes are read into an internal buffer until [`decode_frame`] yields a
/// whole frame; leftovers carry over to the next call.
pub struct FrameReader<T> {
    inner: T,
    pending: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            pending: BytesMut::new(),
            config,
        }
    }

    /// Block until a frame is available.
    ///
    /// End of stream, whether between frames or inside one, is
    /// [`FrameError::ConnectionClosed`].
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.pending, self.config.max_payload_size)? {
                return Ok(frame);
            }
            self.fill()?;
        }
    }

    /// Append whatever the stream has next to `pending`.
    fn fill(&mut self) -> Result<()> {
        let filled = self.pending.len();
        self.pending.resize(filled + READ_CHUNK, 0);
        let got = loop {
            match self.inner.read(&mut self.pending[filled..]) {
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    self.pending.truncate(filled);
                    return Err(FrameError::Io(err));
                }
            }
        };
        self.pending.truncate(filled + got);
        if got == 0 {
            return Err(FrameError::ConnectionClosed);
        }
        Ok(())
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// The handshake runs under a small cap and lifts it once the peer is
    /// trusted.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<LocalStream> {
    /// Like [`FrameReader::with_config`], also applying `config.read_timeout`
    /// to the socket.
    pub fn with_config_local(inner: LocalStream, config: FrameConfig) -> Result<Self> {
        inner.set_read_timeout(config.read_timeout)?;
        Ok(Self::with_config(inner, config))
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout)?;
        self.config.read_timeout = timeout;
        Ok(())
    }
}
