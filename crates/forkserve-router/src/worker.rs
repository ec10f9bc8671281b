use std::collections::HashSet;

use forkserve_peer::Connection;
use forkserve_protocol::{BuildProfile, Message, Platform, TaskId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::launcher::WorkerProcess;
use crate::outcome::BundleResult;
use crate::router::Signal;

/// Whether the worker's output currently reflects a successful build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuildState {
    Building,
    Idle,
}

/// A bundle request parked until the in-flight build finishes.
pub(crate) struct BundleWaiter {
    pub filename: String,
    pub reply: oneshot::Sender<BundleResult>,
}

struct Link {
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Router-side state for one platform's worker process.
pub(crate) struct BuildWorker {
    pub platform: Platform,
    pub generation: u64,
    pub profile: BuildProfile,
    pub state: BuildState,
    pub waiters: Vec<BundleWaiter>,
    /// Tasks this worker was asked about and has not answered yet.
    pub inflight: HashSet<TaskId>,
    process: Box<dyn WorkerProcess>,
    link: Option<Link>,
    outbox: Vec<Message>,
}

impl BuildWorker {
    pub fn new(
        platform: Platform,
        generation: u64,
        profile: BuildProfile,
        process: Box<dyn WorkerProcess>,
    ) -> Self {
        Self {
            platform,
            generation,
            profile,
            state: BuildState::Building,
            waiters: Vec::new(),
            inflight: HashSet::new(),
            process,
            link: None,
            outbox: Vec::new(),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Deliver `message`, or hold it until the connection attaches.
    pub fn send(&mut self, message: Message) {
        match &self.link {
            Some(link) => {
                if let Err(err) = link.outbound.send(message) {
                    debug!(platform = %self.platform, kind = err.0.kind(), "worker writer is gone");
                }
            }
            None => self.outbox.push(message),
        }
    }

    /// Wire up an admitted connection and flush everything queued so far,
    /// in order.
    pub fn attach(&mut self, connection: Connection, signals: mpsc::UnboundedSender<Signal>) {
        let (mut sink, mut stream) = connection.split();
        let (outbound, mut queued) = mpsc::unbounded_channel::<Message>();

        let platform = self.platform.clone();
        let generation = self.generation;
        let writer_signals = signals.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = queued.recv().await {
                if let Err(err) = sink.send(&message).await {
                    let _ = writer_signals.send(Signal::Disconnected {
                        platform,
                        generation,
                        reason: err.to_string(),
                    });
                    return;
                }
            }
        });

        let platform = self.platform.clone();
        let reader = tokio::spawn(async move {
            loop {
                let signal = match stream.recv().await {
                    Ok(Some(message)) => Signal::Inbound {
                        platform: platform.clone(),
                        generation,
                        message,
                    },
                    Ok(None) => Signal::Disconnected {
                        platform: platform.clone(),
                        generation,
                        reason: "worker closed the connection".to_string(),
                    },
                    Err(err) => Signal::Disconnected {
                        platform: platform.clone(),
                        generation,
                        reason: err.to_string(),
                    },
                };
                let more = matches!(signal, Signal::Inbound { .. });
                if signals.send(signal).is_err() || !more {
                    return;
                }
            }
        });

        for message in self.outbox.drain(..) {
            if outbound.send(message).is_err() {
                warn!(platform = %self.platform, "worker writer stopped while flushing");
                break;
            }
        }
        self.link = Some(Link {
            outbound,
            reader,
            writer,
        });
    }

    pub fn is_attached(&self) -> bool {
        self.link.is_some()
    }

    /// Kill the process and drop the connection. Idempotent.
    pub fn terminate(&mut self) {
        self.process.kill();
        if let Some(link) = self.link.take() {
            link.reader.abort();
            link.writer.abort();
        }
        self.outbox.clear();
    }
}

impl Drop for BuildWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}
