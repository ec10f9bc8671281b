use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};

use forkserve_peer::{LinkWriter, PeerError};
use forkserve_protocol::{BuildProfile, LogLevel, Message, Platform};

use crate::error::PipelineError;

/// What a pipeline is building: fixed for the life of the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    pub platform: Platform,
    pub profile: BuildProfile,
}

/// A built artifact the router may read and serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub mime_type: String,
}

/// The build tool behind a worker.
///
/// `start` runs on a dedicated build thread and reports through `events`.
/// It may return as soon as the first build has been kicked off; rebuilds
/// can keep reporting through clones of `events`. `lookup` is called from
/// the worker's request loop, possibly while a build is running.
pub trait BuildPipeline: Send + Sync + 'static {
    fn start(&self, context: &BuildContext, events: BuildEvents) -> Result<(), PipelineError>;

    fn lookup(&self, context: &BuildContext, relative_path: &str) -> Option<OutputFile>;
}

/// Destination for worker-to-router messages.
pub trait EventSink: Send {
    fn deliver(&mut self, message: &Message) -> Result<(), PeerError>;
}

impl EventSink for LinkWriter {
    fn deliver(&mut self, message: &Message) -> Result<(), PeerError> {
        self.send(message)
    }
}

impl EventSink for mpsc::Sender<Message> {
    fn deliver(&mut self, message: &Message) -> Result<(), PeerError> {
        self.send(message.clone())
            .map_err(|_| PeerError::Disconnected("event receiver dropped".to_string()))
    }
}

/// Cloneable handle for reporting build events to the router.
#[derive(Clone)]
pub struct BuildEvents {
    sink: Arc<Mutex<Box<dyn EventSink>>>,
}

impl BuildEvents {
    pub fn new(sink: impl EventSink + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }

    /// An in-memory handle and the receiver it writes to.
    pub fn channel() -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }

    pub fn start(&self) -> Result<(), PipelineError> {
        self.emit(&Message::BuildStart)
    }

    /// Report progress; values are clamped to `0..=1`.
    pub fn progress(&self, progress: f64) -> Result<(), PipelineError> {
        let progress = if progress.is_finite() {
            progress.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.emit(&Message::BuildProgress { progress })
    }

    /// Report a completed build. Empty `errors` means success.
    pub fn finished(&self, errors: Vec<String>) -> Result<(), PipelineError> {
        self.emit(&Message::BuildFinished { errors })
    }

    pub fn failed(&self, message: impl Into<String>) -> Result<(), PipelineError> {
        self.emit(&Message::BuildFailed {
            message: message.into(),
        })
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> Result<(), PipelineError> {
        self.emit(&Message::Log {
            message: message.into(),
            level,
        })
    }

    pub fn emit(&self, message: &Message) -> Result<(), PipelineError> {
        let mut sink = self.sink.lock().unwrap_or_else(|p| p.into_inner());
        sink.deliver(message)?;
        Ok(())
    }
}

impl std::fmt::Debug for BuildEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildEvents").finish_non_exhaustive()
    }
}
