//! Router side of the socket: one listener shared by every worker.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use forkserve_frame::{Frame, FrameCodec, CONTROL, DEFAULT_MAX_PAYLOAD, MESSAGE};
use forkserve_protocol::{Message, Platform};
use forkserve_transport::{AsyncLocalListener, SocketGuard};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};
use crate::handshake::{control_payload, HandshakeConfig, HandshakeRequest, HandshakeResponse};

type Expectations = Arc<Mutex<ExpectationMap>>;
type FramedStream = Framed<UnixStream, FrameCodec>;

type ExpectationMap = HashMap<Platform, oneshot::Sender<Connection>>;

fn lock(expected: &Expectations) -> MutexGuard<'_, ExpectationMap> {
    expected.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared listening socket that demultiplexes worker connections by the
/// platform token they present.
///
/// Connections for platforms nobody is waiting on are dropped. Dropping the
/// hub stops accepting and removes the socket file.
pub struct TransportHub {
    guard: SocketGuard,
    expected: Expectations,
    accept_task: JoinHandle<()>,
}

impl TransportHub {
    /// Bind `path` and start accepting. Must be called inside a tokio runtime.
    pub fn bind(path: impl AsRef<Path>, config: HandshakeConfig) -> Result<Self> {
        let (listener, guard) = AsyncLocalListener::bind(path)?.into_parts();
        let expected = Expectations::default();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&expected),
            Arc::new(config),
        ));
        Ok(Self {
            guard,
            expected,
            accept_task,
        })
    }

    /// Register interest in the next connection presenting `platform`.
    ///
    /// A later call for the same platform replaces the earlier one; the
    /// earlier receiver then observes a closed channel.
    pub fn expect(&self, platform: &Platform) -> oneshot::Receiver<Connection> {
        let (tx, rx) = oneshot::channel();
        if lock(&self.expected).insert(platform.clone(), tx).is_some() {
            debug!(%platform, "replaced pending attach expectation");
        }
        rx
    }

    /// Withdraw a pending expectation.
    pub fn forget(&self, platform: &Platform) {
        lock(&self.expected).remove(platform);
    }

    pub fn path(&self) -> &Path {
        self.guard.path()
    }

    /// Stop accepting and release the socket file.
    pub fn shutdown(self) {
        info!(path = ?self.guard.path(), "transport hub shutting down");
    }
}

impl Drop for TransportHub {
    fn drop(&mut self) {
        self.accept_task.abort();
        lock(&self.expected).clear();
    }
}

async fn accept_loop(listener: UnixListener, expected: Expectations, config: Arc<HandshakeConfig>) {
    let mut serial = 0u64;
    // Dropped along with the loop, which aborts handshakes still in flight.
    let mut handshakes = JoinSet::new();
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            Some(_) = handshakes.join_next() => continue,
        };
        let stream = match accepted {
            Ok((stream, _addr)) => stream,
            Err(err) => {
                warn!(error = %err, "failed to accept worker connection");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        serial += 1;
        handshakes.spawn(admit(
            stream,
            Arc::clone(&expected),
            Arc::clone(&config),
            serial,
        ));
    }
}

async fn admit(
    stream: UnixStream,
    expected: Expectations,
    config: Arc<HandshakeConfig>,
    serial: u64,
) {
    match tokio::time::timeout(config.timeout, handshake(stream, &expected, &config, serial)).await
    {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "rejected worker connection"),
        Err(_) => warn!(timeout = ?config.timeout, "worker handshake timed out"),
    }
}

async fn handshake(
    stream: UnixStream,
    expected: &Expectations,
    config: &HandshakeConfig,
    serial: u64,
) -> Result<()> {
    let pid = stream
        .peer_cred()
        .ok()
        .and_then(|cred| cred.pid())
        .and_then(|pid| u32::try_from(pid).ok());
    let mut framed = Framed::new(stream, FrameCodec::new(config.max_handshake_payload));

    let frame = framed.next().await.ok_or_else(|| {
        PeerError::Disconnected("worker closed the connection during handshake".to_string())
    })??;
    let frame = control_payload(frame, config.max_handshake_payload)?;
    let request: HandshakeRequest = serde_json::from_slice(&frame.payload)?;
    let platform = request.admit(config)?;

    let sender = lock(expected).remove(&platform).ok_or_else(|| {
        PeerError::HandshakeFailed(format!("no worker expected for platform '{platform}'"))
    })?;

    let worker_id = format!("{platform}-{serial}");
    let response = HandshakeResponse::new(worker_id.clone(), config);
    framed
        .send(Frame::new(CONTROL, serde_json::to_vec(&response)?))
        .await?;
    framed.codec_mut().set_max_payload_size(DEFAULT_MAX_PAYLOAD);

    debug!(%platform, %worker_id, ?pid, "worker attached");
    let connection = Connection {
        framed,
        platform,
        worker_id,
        pid,
    };
    if sender.send(connection).is_err() {
        debug!("attach expectation was abandoned");
    }
    Ok(())
}

/// An admitted worker connection.
pub struct Connection {
    framed: FramedStream,
    platform: Platform,
    worker_id: String,
    pid: Option<u32>,
}

impl Connection {
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Process id of the peer, when the OS reports it.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn split(self) -> (MessageSink, MessageStream) {
        let (sink, stream) = self.framed.split();
        (MessageSink { inner: sink }, MessageStream { inner: stream })
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("platform", &self.platform)
            .field("worker_id", &self.worker_id)
            .field("pid", &self.pid)
            .finish()
    }
}

/// Outbound half of a [`Connection`].
pub struct MessageSink {
    inner: SplitSink<FramedStream, Frame>,
}

impl MessageSink {
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let payload = message.encode()?;
        self.inner.send(Frame::new(MESSAGE, payload)).await?;
        Ok(())
    }
}

/// Inbound half of a [`Connection`].
pub struct MessageStream {
    inner: SplitStream<FramedStream>,
}

impl MessageStream {
    /// Next message, or `None` once the worker closed the connection.
    /// Malformed frames and messages are errors.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        loop {
            let frame = match self.inner.next().await {
                None => return Ok(None),
                Some(frame) => frame?,
            };
            if frame.channel != MESSAGE {
                debug!(channel = frame.channel, "ignoring frame outside MESSAGE channel");
                continue;
            }
            return Ok(Some(Message::decode(&frame.payload)?));
        }
    }
}
