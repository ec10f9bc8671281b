use std::path::Path;

use forkserve_frame::{
    FrameConfig, FrameError, FrameReader, FrameWriter, DEFAULT_MAX_PAYLOAD, MESSAGE,
};
use forkserve_protocol::{Message, Platform};
use forkserve_transport::LocalStream;
use tracing::debug;

use crate::error::{PeerError, Result};
use crate::handshake::{handshake_client, HandshakeConfig, HandshakeResult};

/// Connect to the router at `path` as the worker for `platform`.
///
/// Blocks until the handshake completes or `config.timeout` elapses.
pub fn connect(
    path: impl AsRef<Path>,
    platform: &Platform,
    config: &HandshakeConfig,
) -> Result<WorkerLink> {
    let stream = forkserve_transport::connect(path)?;
    let reader_stream = stream.try_clone()?;

    let frame_config = FrameConfig {
        max_payload_size: config.max_handshake_payload,
        read_timeout: Some(config.timeout),
        write_timeout: Some(config.timeout),
    };

    let mut reader = FrameReader::with_config_local(reader_stream, frame_config.clone())?;
    let mut writer = FrameWriter::with_config_local(stream, frame_config)?;

    let handshake = handshake_client(&mut reader, &mut writer, platform, config)?;

    // The handshake runs under a tight budget; afterwards the link carries
    // full-size messages and waits as long as the router stays quiet.
    reader.set_max_payload_size(DEFAULT_MAX_PAYLOAD);
    reader.set_read_timeout(None)?;
    writer.set_max_payload_size(DEFAULT_MAX_PAYLOAD);

    debug!(worker_id = %handshake.worker_id, %platform, "worker link established");

    Ok(WorkerLink {
        reader: LinkReader { inner: reader },
        writer: LinkWriter { inner: writer },
        handshake,
    })
}

/// A worker's established connection to the router.
pub struct WorkerLink {
    reader: LinkReader,
    writer: LinkWriter,
    handshake: HandshakeResult,
}

impl WorkerLink {
    pub fn handshake(&self) -> &HandshakeResult {
        &self.handshake
    }

    pub fn send(&mut self, message: &Message) -> Result<()> {
        self.writer.send(message)
    }

    pub fn recv(&mut self) -> Result<Message> {
        self.reader.recv()
    }

    /// Split into independently owned halves, e.g. to answer requests on one
    /// thread while a build reports progress from another.
    pub fn into_split(self) -> (LinkReader, LinkWriter, HandshakeResult) {
        (self.reader, self.writer, self.handshake)
    }
}

/// Receiving half of a [`WorkerLink`].
pub struct LinkReader {
    inner: FrameReader<LocalStream>,
}

impl LinkReader {
    /// Next message from the router. A closed connection is
    /// [`PeerError::Disconnected`].
    pub fn recv(&mut self) -> Result<Message> {
        loop {
            let frame = match self.inner.read_frame() {
                Ok(frame) => frame,
                Err(FrameError::ConnectionClosed) => {
                    return Err(PeerError::Disconnected(
                        "router closed the connection".to_string(),
                    ));
                }
                Err(err) => return Err(err.into()),
            };
            if frame.channel != MESSAGE {
                debug!(channel = frame.channel, "ignoring frame outside MESSAGE channel");
                continue;
            }
            return Ok(Message::decode(&frame.payload)?);
        }
    }
}

/// Sending half of a [`WorkerLink`].
pub struct LinkWriter {
    inner: FrameWriter<LocalStream>,
}

impl LinkWriter {
    pub fn send(&mut self, message: &Message) -> Result<()> {
        let payload = message.encode()?;
        self.inner.send(MESSAGE, &payload)?;
        Ok(())
    }
}
